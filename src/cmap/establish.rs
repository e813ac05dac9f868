//! Turning a raw TCP stream into a usable connection: the hello handshake, limit
//! adoption, compression negotiation, and authentication.

use std::time::Duration;

use super::{conn::Connection, StreamDescription};
use crate::{
    client::{auth::Credential, options::ClientOptions, options::ServerAddress},
    compression::Compressor,
    error::Result,
    hello::{hello_command, run_hello, HelloReply},
};

/// Establishes and handshakes connections according to the client's options.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionEstablisher {
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    app_name: Option<String>,
    compressors: Option<Vec<Compressor>>,
    credential: Option<Credential>,
}

impl ConnectionEstablisher {
    pub(crate) fn new(options: &ClientOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout,
            socket_timeout: options.socket_timeout,
            app_name: options.app_name.clone(),
            compressors: options.compressors.clone(),
            credential: options.credential.clone(),
        }
    }

    /// Opens a connection to `address` and runs the full handshake on it.
    pub(crate) async fn establish_connection(
        &self,
        id: u32,
        address: ServerAddress,
    ) -> Result<Connection> {
        let mut connection =
            Connection::connect(id, address, self.connect_timeout, self.socket_timeout).await?;
        self.handshake(&mut connection).await?;
        Ok(connection)
    }

    /// Runs the handshake on an already-connected stream: hello, then authentication if a
    /// credential is configured. Used both for fresh connections and after
    /// [`Connection::reconnect`].
    pub(crate) async fn handshake(&self, connection: &mut Connection) -> Result<HelloReply> {
        let command = hello_command(
            None,
            self.app_name.as_deref(),
            self.compressors.as_deref(),
        );
        let reply = run_hello(connection, command).await?;

        connection.stream_description = Some(StreamDescription::from_hello_reply(&reply));
        connection.compressor = self.negotiate_compression(&reply);

        if let Some(ref credential) = self.credential {
            credential.authenticate(connection).await?;
        }

        Ok(reply)
    }

    /// The first client-configured compressor the server also supports wins.
    fn negotiate_compression(&self, reply: &HelloReply) -> Option<Compressor> {
        let ours = self.compressors.as_ref()?;
        let theirs = reply.command_response.compressors.as_ref()?;
        ours.iter()
            .find(|compressor| theirs.iter().any(|name| name == compressor.name()))
            .cloned()
    }
}
