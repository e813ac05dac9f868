//! Options for configuring a [`Client`](crate::Client).
//!
//! Connection-string *parsing* is out of scope for this crate: [`ClientOptions`] is the
//! parsed-URI structure the core consumes, populated by the caller or an external parser.

use std::{fmt, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    client::auth::Credential,
    compression::Compressor,
    concern::WriteConcern,
    error::{Error, ErrorKind, Result},
    selection_criteria::SelectionCriteria,
};

/// The default port a MongoDB server listens on.
pub const DEFAULT_PORT: u16 = 27017;

/// An address a server in the deployment can be reached at.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port.
    #[non_exhaustive]
    Tcp {
        /// The hostname or IP to connect to.
        host: String,

        /// The port to connect to. `None` selects the default of 27017.
        port: Option<u16>,
    },
}

impl ServerAddress {
    /// Parses a `host[:port]` string. This handles a single address, not a full connection
    /// string.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let mut parts = address.split(':');
        let hostname = match parts.next() {
            Some(part) if !part.is_empty() => part,
            _ => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("invalid server address: \"{}\"", address),
                }
                .into())
            }
        };
        let port = match parts.next() {
            None => None,
            Some(part) => {
                if parts.next().is_some() {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!("invalid server address: \"{}\"", address),
                    }
                    .into());
                }
                match part.parse::<u16>() {
                    Ok(port) if port > 0 => Some(port),
                    _ => {
                        return Err(Error::invalid_argument(format!(
                            "port must be valid 16-bit unsigned integer, instead got: {}",
                            part
                        )))
                    }
                }
            }
        };
        Ok(ServerAddress::Tcp {
            host: hostname.to_lowercase(),
            port,
        })
    }

    /// The hostname of this address.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    /// The port of this address, defaulting to 27017.
    pub fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => port.unwrap_or(DEFAULT_PORT),
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".to_string(),
            port: None,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host(), self.port())
    }
}

/// Contains the options that can be used to create a new [`Client`](crate::Client).
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seed addresses that the [`Client`](crate::Client) will attempt
    /// to connect to.
    ///
    /// The Client will monitor these (and any topology members it discovers through them)
    /// in the background.
    #[builder(!default)]
    pub hosts: Vec<ServerAddress>,

    /// The application name reported to the server in the handshake.
    pub app_name: Option<String>,

    /// The compressors that the Client is willing to use, in order of preference. The
    /// handshake intersects this list with the server's; the first common entry wins.
    pub compressors: Option<Vec<Compressor>>,

    /// The connect timeout passed to each TCP connect call. The default is no timeout.
    pub connect_timeout: Option<Duration>,

    /// The credential to authenticate connections with, if any.
    pub credential: Option<Credential>,

    /// The default database this client should operate on.
    pub default_database: Option<String>,

    /// Whether the Client should connect directly to a single host rather than discover and
    /// monitor all servers in the topology.
    pub direct_connection: Option<bool>,

    /// The amount of time each monitoring thread should wait between performing server
    /// checks. Defaults to 10 seconds.
    pub heartbeat_freq: Option<Duration>,

    /// When running a read operation with a ReadPreference that allows selecting secondaries,
    /// the maximum RTT beyond that of the fastest suitable server that a server may have to
    /// remain eligible. Defaults to 15 ms.
    pub local_threshold: Option<Duration>,

    /// The name of the replica set that the Client should connect to. When set, topology
    /// monitoring starts in the replica-set-no-primary state.
    pub repl_set_name: Option<String>,

    /// The default selection criteria for read operations.
    pub selection_criteria: Option<SelectionCriteria>,

    /// The amount of time the Client should attempt to select a server when performing an
    /// operation before giving up with a timeout error. Defaults to 30 seconds.
    pub server_selection_timeout: Option<Duration>,

    /// The per-RPC timeout applied to socket reads and writes. The default is no timeout.
    pub socket_timeout: Option<Duration>,

    /// The default write concern for write operations.
    pub write_concern: Option<WriteConcern>,
}

impl ClientOptions {
    /// Ensure the options are internally consistent before a client is built from them.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "cannot specify an empty list of seed addresses".to_string(),
            }
            .into());
        }
        if self.direct_connection == Some(true) && self.hosts.len() > 1 {
            return Err(ErrorKind::InvalidArgument {
                message: "cannot specify multiple seeds with directConnection".to_string(),
            }
            .into());
        }
        if let Some(ref write_concern) = self.write_concern {
            write_concern.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_parsing() {
        let address = ServerAddress::parse("Example.com:12345").unwrap();
        assert_eq!(address.host(), "example.com");
        assert_eq!(address.port(), 12345);

        let address = ServerAddress::parse("localhost").unwrap();
        assert_eq!(address.port(), DEFAULT_PORT);

        assert!(ServerAddress::parse(":27017").is_err());
        assert!(ServerAddress::parse("host:notaport").is_err());
        assert!(ServerAddress::parse("host:1:2").is_err());
    }

    #[test]
    fn direct_connection_requires_single_seed() {
        let options = ClientOptions::builder()
            .hosts(vec![
                ServerAddress::parse("a:27017").unwrap(),
                ServerAddress::parse("b:27017").unwrap(),
            ])
            .direct_connection(Some(true))
            .build();
        assert!(options.validate().is_err());
    }
}
