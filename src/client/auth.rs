//! Contains the types needed to specify the auth configuration for a
//! [`Client`](crate::Client).

pub(crate) mod scram;

use md5::{Digest, Md5};
use typed_builder::TypedBuilder;

use crate::{
    bson::Document,
    cmap::{Command, Connection},
    doc,
    error::{Error, ErrorKind, Result},
};

use self::scram::ScramVersion;

/// The authentication mechanisms supported by this driver.
///
/// See the [MongoDB documentation](https://www.mongodb.com/docs/manual/core/authentication-mechanisms/) for more information about each mechanism.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthMechanism {
    /// SCRAM-SHA-1 as defined in [RFC 5802](http://tools.ietf.org/html/rfc5802).
    ScramSha1,

    /// SCRAM-SHA-256, which extends SCRAM-SHA-1 with the SHA-256 digest and requires the
    /// password to be SASLprep-normalized.
    ScramSha256,

    /// The legacy challenge-response mechanism of servers predating SCRAM. Removed from
    /// modern servers but still spoken by old deployments.
    MongoDbCr,
}

impl AuthMechanism {
    /// Parses a mechanism name as it appears in options and `saslSupportedMechs`.
    pub fn from_str(s: impl AsRef<str>) -> Result<Self> {
        match s.as_ref() {
            "SCRAM-SHA-1" => Ok(AuthMechanism::ScramSha1),
            "SCRAM-SHA-256" => Ok(AuthMechanism::ScramSha256),
            "MONGODB-CR" => Ok(AuthMechanism::MongoDbCr),
            other => Err(ErrorKind::InvalidArgument {
                message: format!("invalid mechanism string: {}", other),
            }
            .into()),
        }
    }

    /// The name of the mechanism as it appears in the server's API.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::ScramSha1 => "SCRAM-SHA-1",
            AuthMechanism::ScramSha256 => "SCRAM-SHA-256",
            AuthMechanism::MongoDbCr => "MONGODB-CR",
        }
    }

    /// Picks the mechanism to use for a server that advertised `sasl_supported_mechs`.
    /// SCRAM-SHA-256 is preferred when the user's credential supports it.
    pub(crate) fn from_stream_description(sasl_supported_mechs: Option<&Vec<String>>) -> Self {
        let supports_sha_256 = sasl_supported_mechs
            .map(|mechs| mechs.iter().any(|m| m == AuthMechanism::ScramSha256.as_str()))
            .unwrap_or(false);
        if supports_sha_256 {
            AuthMechanism::ScramSha256
        } else {
            AuthMechanism::ScramSha1
        }
    }
}

/// A struct containing authentication information.
///
/// Some fields (mechanism properties, external sources) of the full driver surface are not
/// carried here; this core speaks the password-based mechanisms the wire protocol itself
/// requires.
#[derive(Clone, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct Credential {
    /// The username to authenticate with. This applies to all mechanisms but may be
    /// omitted when authentication is not required.
    pub username: Option<String>,

    /// The database used to authenticate. This applies to all mechanisms and defaults to
    /// "admin".
    pub source: Option<String>,

    /// The password to authenticate with. This does not apply to all mechanisms.
    pub password: Option<String>,

    /// Which authentication mechanism to use. If not provided, one will be negotiated with
    /// the server.
    pub mechanism: Option<AuthMechanism>,
}

impl Credential {
    pub(crate) fn resolved_source(&self) -> &str {
        self.source.as_deref().unwrap_or("admin")
    }

    pub(crate) fn username(&self) -> Result<&str> {
        self.username
            .as_deref()
            .ok_or_else(|| Error::invalid_argument("credential has no username"))
    }

    pub(crate) fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::invalid_argument("credential has no password"))
    }

    /// Runs the authentication handshake for this credential on a freshly connected,
    /// hello-handshaked connection.
    pub(crate) async fn authenticate(&self, conn: &mut Connection) -> Result<()> {
        let mechanism = match self.mechanism {
            Some(ref mechanism) => mechanism.clone(),
            None => {
                let sasl_supported_mechs = conn
                    .stream_description()?
                    .sasl_supported_mechs
                    .clone();
                AuthMechanism::from_stream_description(sasl_supported_mechs.as_ref())
            }
        };

        match mechanism {
            AuthMechanism::ScramSha1 => {
                ScramVersion::Sha1.authenticate(conn, self).await
            }
            AuthMechanism::ScramSha256 => {
                ScramVersion::Sha256.authenticate(conn, self).await
            }
            AuthMechanism::MongoDbCr => self.authenticate_cr(conn).await,
        }
    }

    /// The getnonce/authenticate digest exchange of pre-SCRAM servers.
    async fn authenticate_cr(&self, conn: &mut Connection) -> Result<()> {
        const MECH: &str = "MONGODB-CR";

        let username = self.username()?;
        let source = self.resolved_source().to_string();

        let nonce_response = conn
            .send_command(Command::new("getnonce", &source, doc! { "getnonce": 1 }))
            .await?;
        let nonce = nonce_response
            .checked_body()?
            .get_str("nonce")
            .map(String::from)
            .ok_or_else(|| Error::invalid_authentication_response(MECH))?;

        let digest = mongo_password_digest(username, self.password()?);
        let key = md5_hex(format!("{}{}{}", nonce, username, digest).as_bytes());

        let body = doc! {
            "authenticate": 1,
            "user": username,
            "nonce": nonce,
            "key": key,
        };
        let response = conn.send_command(Command::new("authenticate", &source, body)).await?;
        response
            .checked_body()
            .map_err(|_| Error::authentication_error(MECH, "authentication failed"))?;
        Ok(())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // The password never appears in logs.
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("source", &self.source)
            .field("mechanism", &self.mechanism)
            .finish()
    }
}

pub(crate) fn md5_hex(input: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// The password digest both MONGODB-CR and SCRAM-SHA-1 start from:
/// `md5("<user>:mongo:<password>")` in hex.
pub(crate) fn mongo_password_digest(username: &str, password: &str) -> String {
    md5_hex(format!("{}:mongo:{}", username, password).as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn password_digest_matches_known_value() {
        // Well-known digest test vector: user "user", password "pencil".
        assert_eq!(
            mongo_password_digest("user", "pencil"),
            "1c33006ec1ffd90f9cadcbcc0e118200"
        );
    }

    #[test]
    fn mechanism_negotiation_prefers_sha256() {
        let mechs = vec!["SCRAM-SHA-1".to_string(), "SCRAM-SHA-256".to_string()];
        assert_eq!(
            AuthMechanism::from_stream_description(Some(&mechs)),
            AuthMechanism::ScramSha256
        );
        assert_eq!(
            AuthMechanism::from_stream_description(None),
            AuthMechanism::ScramSha1
        );
    }
}
