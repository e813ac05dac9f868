//! Contains the functionality for [`SCRAM`](https://tools.ietf.org/html/rfc5802)
//! authorization and authentication.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::{
    bson::{Binary, Bson, Document},
    client::auth::{mongo_password_digest, Credential},
    cmap::{Command, Connection},
    doc,
    error::{Error, Result},
};

// The single letter attribute keys in SCRAM messages.
const ITERATION_COUNT_KEY: char = 'i';
const ERROR_KEY: char = 'e';
const PROOF_KEY: char = 'p';
const VERIFIER_KEY: char = 'v';
const NONCE_KEY: char = 'r';
const SALT_KEY: char = 's';

/// The minimum number of iterations of the hash function that we will accept from the
/// server.
const MIN_ITERATION_COUNT: u32 = 4096;

const NO_CHANNEL_BINDING: &str = "n,,";

/// The versions of SCRAM supported by the driver (classified according to hash function
/// used).
#[derive(Clone, Copy, Debug)]
pub(crate) enum ScramVersion {
    Sha1,
    Sha256,
}

impl ScramVersion {
    fn mechanism_name(&self) -> &'static str {
        match self {
            ScramVersion::Sha1 => "SCRAM-SHA-1",
            ScramVersion::Sha256 => "SCRAM-SHA-256",
        }
    }

    /// HMAC with the hash function of this version.
    fn hmac(&self, key: &[u8], input: &[u8]) -> Result<Vec<u8>> {
        let bytes = match self {
            ScramVersion::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key)
                    .map_err(|_| Error::unknown_scram("invalid hmac key length"))?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
            ScramVersion::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|_| Error::unknown_scram("invalid hmac key length"))?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(bytes)
    }

    /// The hash function of this version.
    fn h(&self, input: &[u8]) -> Vec<u8> {
        match self {
            ScramVersion::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(input);
                hasher.finalize().to_vec()
            }
            ScramVersion::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(input);
                hasher.finalize().to_vec()
            }
        }
    }

    /// PBKDF2 with the hash function of this version.
    fn h_i(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>> {
        match self {
            ScramVersion::Sha1 => {
                let mut out = vec![0u8; 20];
                pbkdf2::pbkdf2::<Hmac<Sha1>>(password, salt, iterations, &mut out)
                    .map_err(|_| Error::unknown_scram("pbkdf2 failure"))?;
                Ok(out)
            }
            ScramVersion::Sha256 => {
                let mut out = vec![0u8; 32];
                pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
                    .map_err(|_| Error::unknown_scram("pbkdf2 failure"))?;
                Ok(out)
            }
        }
    }

    /// Computes the salted password, differing between versions: SCRAM-SHA-1 hashes the
    /// legacy MONGODB-CR digest, SCRAM-SHA-256 the SASLprep-normalized password.
    fn compute_salted_password(
        &self,
        username: &str,
        password: &str,
        i: u32,
        salt: &[u8],
    ) -> Result<Vec<u8>> {
        match self {
            ScramVersion::Sha1 => {
                let digest = mongo_password_digest(username, password);
                self.h_i(digest.as_bytes(), salt, i)
            }
            ScramVersion::Sha256 => {
                let normalized = stringprep::saslprep(password)
                    .map_err(|_| Error::unknown_scram("password failed SASLprep"))?;
                self.h_i(normalized.as_bytes(), salt, i)
            }
        }
    }

    /// Runs the full SCRAM conversation for `credential` over `conn`.
    pub(crate) async fn authenticate(
        &self,
        conn: &mut Connection,
        credential: &Credential,
    ) -> Result<()> {
        let username = escaped_username(credential.username()?);
        let password = credential.password()?;
        let source = credential.resolved_source().to_string();

        let nonce = generate_nonce();
        let client_first_bare = format!("n={},r={}", username, nonce);

        let sasl_start = Command::new(
            "saslStart",
            &source,
            doc! {
                "saslStart": 1,
                "mechanism": self.mechanism_name(),
                "payload": binary(format!("{}{}", NO_CHANNEL_BINDING, client_first_bare)),
                "options": doc! { "skipEmptyExchange": true },
            },
        );
        let first_response = conn.send_command(sasl_start).await?.checked_body()?;
        let (conversation_id, server_first, mut done) = parse_sasl_response(self, &first_response)?;

        let parsed = parse_server_first(self, &server_first)?;
        if !parsed.nonce.starts_with(nonce.as_str()) {
            return Err(Error::authentication_error(
                self.mechanism_name(),
                "server did not echo the client nonce",
            ));
        }
        if done {
            return Err(Error::authentication_error(
                self.mechanism_name(),
                "SASL conversation ended early",
            ));
        }

        let salted_password = self.compute_salted_password(
            &username,
            password,
            parsed.iteration_count,
            &parsed.salt,
        )?;

        let client_final_without_proof = format!("c={},r={}", BASE64.encode(NO_CHANNEL_BINDING), parsed.nonce);
        let auth_message = format!(
            "{},{},{}",
            client_first_bare, server_first, client_final_without_proof
        );

        let client_key = self.hmac(&salted_password, b"Client Key")?;
        let stored_key = self.h(&client_key);
        let client_signature = self.hmac(&stored_key, auth_message.as_bytes())?;
        let client_proof = BASE64.encode(xor(&client_key, &client_signature));

        let client_final = format!("{},p={}", client_final_without_proof, client_proof);

        let sasl_continue = Command::new(
            "saslContinue",
            &source,
            doc! {
                "saslContinue": 1,
                "conversationId": conversation_id.clone(),
                "payload": binary(client_final),
            },
        );
        let second_response = conn.send_command(sasl_continue).await?.checked_body()?;
        let (_, server_final, second_done) = parse_sasl_response(self, &second_response)?;
        done = second_done;

        let server_key = self.hmac(&salted_password, b"Server Key")?;
        let server_signature = BASE64.encode(self.hmac(&server_key, auth_message.as_bytes())?);
        let verifier = parse_attribute(&server_final, VERIFIER_KEY).ok_or_else(|| {
            Error::invalid_authentication_response(self.mechanism_name())
        })?;
        if verifier != server_signature {
            return Err(Error::authentication_error(
                self.mechanism_name(),
                "server signature mismatch",
            ));
        }

        // Servers without skipEmptyExchange support need one final empty round trip.
        if !done {
            let sasl_finish = Command::new(
                "saslContinue",
                &source,
                doc! {
                    "saslContinue": 1,
                    "conversationId": conversation_id,
                    "payload": binary(String::new()),
                },
            );
            let final_response = conn.send_command(sasl_finish).await?.checked_body()?;
            let (_, _, done) = parse_sasl_response(self, &final_response)?;
            if !done {
                return Err(Error::authentication_error(
                    self.mechanism_name(),
                    "SASL conversation did not terminate",
                ));
            }
        }

        Ok(())
    }
}

impl Error {
    fn unknown_scram(reason: &str) -> Self {
        Error::authentication_error("SCRAM", reason)
    }
}

struct ServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iteration_count: u32,
}

fn parse_server_first(scram: &ScramVersion, payload: &str) -> Result<ServerFirst> {
    if parse_attribute(payload, ERROR_KEY).is_some() {
        return Err(Error::authentication_error(
            scram.mechanism_name(),
            &format!("server returned SASL error: {}", payload),
        ));
    }
    let nonce = parse_attribute(payload, NONCE_KEY)
        .ok_or_else(|| Error::invalid_authentication_response(scram.mechanism_name()))?;
    let salt = parse_attribute(payload, SALT_KEY)
        .and_then(|s| BASE64.decode(s).ok())
        .ok_or_else(|| Error::invalid_authentication_response(scram.mechanism_name()))?;
    let iteration_count: u32 = parse_attribute(payload, ITERATION_COUNT_KEY)
        .and_then(|i| i.parse().ok())
        .ok_or_else(|| Error::invalid_authentication_response(scram.mechanism_name()))?;

    if iteration_count < MIN_ITERATION_COUNT {
        return Err(Error::authentication_error(
            scram.mechanism_name(),
            "iteration count too low",
        ));
    }

    Ok(ServerFirst {
        nonce: nonce.to_string(),
        salt,
        iteration_count,
    })
}

/// Pulls `(conversationId, payload-as-string, done)` out of a saslStart/saslContinue reply.
fn parse_sasl_response(
    scram: &ScramVersion,
    response: &Document,
) -> Result<(Bson, String, bool)> {
    let conversation_id = response
        .get("conversationId")
        .cloned()
        .ok_or_else(|| Error::invalid_authentication_response(scram.mechanism_name()))?;
    let done = response.get_bool("done").unwrap_or(false);
    let payload = match response.get("payload") {
        Some(Bson::Binary(binary)) => String::from_utf8(binary.bytes.clone())
            .map_err(|_| Error::invalid_authentication_response(scram.mechanism_name()))?,
        Some(Bson::String(s)) => s.clone(),
        _ => return Err(Error::invalid_authentication_response(scram.mechanism_name())),
    };
    Ok((conversation_id, payload, done))
}

/// Finds `<key>=` in a comma-separated SCRAM message and returns its value.
fn parse_attribute(message: &str, key: char) -> Option<&str> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        if chars.next() == Some(key) && chars.next() == Some('=') {
            Some(&part[2..])
        } else {
            None
        }
    })
}

fn xor(lhs: &[u8], rhs: &[u8]) -> Vec<u8> {
    debug_assert_eq!(lhs.len(), rhs.len());
    lhs.iter().zip(rhs.iter()).map(|(l, r)| l ^ r).collect()
}

fn generate_nonce() -> String {
    let mut rng = SmallRng::from_os_rng();
    let bytes: [u8; 32] = rng.random();
    BASE64.encode(bytes)
}

/// Usernames embed into the SCRAM message, so `=` and `,` must be escaped per RFC 5802.
fn escaped_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn binary(payload: String) -> Binary {
    Binary {
        subtype: crate::bson::BinarySubtype::Generic,
        bytes: payload.into_bytes(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn attribute_parsing() {
        let message = "r=abc123,s=c2FsdA==,i=4096";
        assert_eq!(parse_attribute(message, 'r'), Some("abc123"));
        assert_eq!(parse_attribute(message, 's'), Some("c2FsdA=="));
        assert_eq!(parse_attribute(message, 'i'), Some("4096"));
        assert_eq!(parse_attribute(message, 'p'), None);
    }

    #[test]
    fn username_escaping() {
        assert_eq!(escaped_username("a=b,c"), "a=3Db=2Cc");
    }

    // Test vectors from RFC 5802 (SCRAM-SHA-1, user "user", password "pencil"), adjusted
    // for the MongoDB password digest step.
    #[test]
    fn salted_password_is_deterministic() {
        let scram = ScramVersion::Sha1;
        let salt = BASE64.decode("QSXCR+Q6sek8bf92").unwrap();
        let a = scram
            .compute_salted_password("user", "pencil", 4096, &salt)
            .unwrap();
        let b = scram
            .compute_salted_password("user", "pencil", 4096, &salt)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn xor_is_elementwise() {
        assert_eq!(xor(&[0b1100, 0b1010], &[0b1010, 0b1010]), vec![0b0110, 0]);
    }
}
