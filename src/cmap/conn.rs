pub(crate) mod command;
pub(crate) mod stream_description;
pub(crate) mod wire;

use std::time::Duration;

use self::{
    command::{Command, RawCommandResponse},
    stream_description::StreamDescription,
    wire::{Message, MessageBody},
};
use crate::{
    client::options::ServerAddress,
    compression::Compressor,
    error::{Error, ErrorKind, Result},
    runtime::{self, AsyncStream},
};

/// The most recent server-reported error observed on a connection, in the shape the legacy
/// getLastError command reports it.
#[derive(Debug, Clone, Default)]
pub(crate) struct LastError {
    pub(crate) code: i32,
    pub(crate) message: String,
    pub(crate) n: i32,
}

/// A single TCP stream to one server, plus the request-id counter and cached negotiated
/// limits that go with it.
///
/// Exactly one request may be in flight at a time; every method that performs I/O takes
/// `&mut self`, so the type system enforces the invariant. After a network error the
/// connection is **broken**: all further operations fail until [`reconnect`](Self::reconnect)
/// re-establishes the stream and the owner re-runs the handshake.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: u32,
    pub(crate) address: ServerAddress,
    stream: AsyncStream,
    next_request_id: i32,
    broken: bool,

    /// The limits negotiated by the handshake. `None` until the handshake runs.
    pub(crate) stream_description: Option<StreamDescription>,

    /// The compressor negotiated by the handshake, if any.
    pub(crate) compressor: Option<Compressor>,

    /// The most recent error cached from a getLastError round trip.
    pub(crate) last_error: Option<LastError>,

    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
}

impl Connection {
    /// Opens a TCP stream to `address`. The connect timeout applies to the TCP dial; the
    /// socket timeout applies to every subsequent read and write. Both default to none.
    pub(crate) async fn connect(
        id: u32,
        address: ServerAddress,
        connect_timeout: Option<Duration>,
        socket_timeout: Option<Duration>,
    ) -> Result<Self> {
        let stream = AsyncStream::connect(&address, connect_timeout).await?;
        Ok(Self {
            id,
            address,
            stream,
            next_request_id: 1,
            broken: false,
            stream_description: None,
            compressor: None,
            last_error: None,
            connect_timeout,
            socket_timeout,
        })
    }

    /// Re-establishes the TCP stream after a network error, clearing the broken state and
    /// all negotiated state. The owner must re-run the handshake (and any authentication)
    /// before issuing application operations.
    pub(crate) async fn reconnect(&mut self) -> Result<()> {
        self.stream = AsyncStream::connect(&self.address, self.connect_timeout).await?;
        self.broken = false;
        self.stream_description = None;
        self.compressor = None;
        self.last_error = None;
        Ok(())
    }

    pub(crate) fn stream_description(&self) -> Result<&StreamDescription> {
        self.stream_description.as_ref().ok_or_else(|| {
            Error::internal("Stream checked out but not handshaked")
        })
    }

    /// Whether a previous network error left this connection unusable.
    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    fn next_request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn check_usable(&self) -> Result<()> {
        if self.broken {
            return Err(ErrorKind::ConnectionBroken {
                message: format!(
                    "connection {} to {} hit a network error and must be re-established",
                    self.id, self.address
                ),
            }
            .into());
        }
        Ok(())
    }

    /// Sends `message` and reads the reply, enforcing request/response correlation: the
    /// reply's `responseTo` must equal the request id, and a mismatch is a protocol error
    /// that breaks the connection.
    pub(crate) async fn send_message(&mut self, message: Message) -> Result<Message> {
        self.check_usable()?;

        let request_id = message.request_id;

        if let Err(e) = self.write_message(&message).await {
            self.broken = true;
            return Err(e);
        }

        let reply = match runtime::timeout(self.socket_timeout, Message::read_from(&mut self.stream))
            .await
            .and_then(std::convert::identity)
        {
            Ok(reply) => reply,
            Err(e) => {
                self.broken = true;
                let e = if matches!(e.kind.as_ref(), ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof)
                {
                    Error::unexpected_eof()
                } else {
                    e
                };
                return Err(e);
            }
        };

        if reply.response_to != request_id {
            self.broken = true;
            return Err(ErrorKind::InvalidResponse {
                message: format!(
                    "reply correlates to request {}, but request {} was in flight",
                    reply.response_to, request_id
                ),
            }
            .into());
        }

        Ok(reply)
    }

    /// Sends `message` without reading a reply. Used for the legacy write opcodes and
    /// `w:0` commands.
    pub(crate) async fn send_fire_and_forget(&mut self, message: Message) -> Result<()> {
        self.check_usable()?;
        if let Err(e) = self.write_message(&message).await {
            self.broken = true;
            return Err(e);
        }
        Ok(())
    }

    async fn write_message(&mut self, message: &Message) -> Result<()> {
        match self.compressor {
            Some(ref compressor) if message.body.op_code() == wire::OpCode::Message => {
                runtime::timeout(
                    self.socket_timeout,
                    message.write_compressed_to(&mut self.stream, compressor),
                )
                .await
                .and_then(std::convert::identity)
            }
            _ => runtime::timeout(self.socket_timeout, message.write_to(&mut self.stream))
                .await
                .and_then(std::convert::identity),
        }
    }

    /// Executes a command round trip: serializes to OP_MSG (compressed when negotiated and
    /// the command is eligible), reads the correlated reply, and returns its body document.
    /// The body is *not* checked for `ok: 0` here.
    pub(crate) async fn send_command(&mut self, command: Command) -> Result<RawCommandResponse> {
        let eligible_for_compression = command.should_compress();
        let request_id = self.next_request_id();
        let message = command.into_message(request_id)?;

        // Hello and auth commands go uncompressed even when a compressor is negotiated.
        let reply = if eligible_for_compression {
            self.send_message(message).await?
        } else {
            let saved = self.compressor.take();
            let result = self.send_message(message).await;
            self.compressor = saved;
            result?
        };

        self.reply_body(reply)
    }

    /// Sends a command without awaiting a reply (`moreToCome` set).
    pub(crate) async fn send_command_fire_and_forget(&mut self, command: Command) -> Result<()> {
        let request_id = self.next_request_id();
        let message = command.into_fire_and_forget_message(request_id)?;
        self.send_fire_and_forget(message).await
    }

    /// Sends a raw opcode body without awaiting a reply. The legacy write opcodes have no
    /// reply to wait for.
    pub(crate) async fn send_body_fire_and_forget(&mut self, body: MessageBody) -> Result<()> {
        let request_id = self.next_request_id();
        self.send_fire_and_forget(Message::new(request_id, body)).await
    }

    fn reply_body(&mut self, reply: Message) -> Result<RawCommandResponse> {
        match reply.body {
            MessageBody::Msg(msg) => Ok(RawCommandResponse::new(msg.document()?.clone())),
            // Pre-OP_MSG servers reply to `$cmd` queries with OP_REPLY.
            MessageBody::Reply(mut legacy) => match legacy.documents.pop() {
                Some(doc) if legacy.documents.is_empty() => Ok(RawCommandResponse::new(doc)),
                _ => {
                    self.broken = true;
                    Err(Error::invalid_response(
                        "legacy command reply did not carry exactly one document",
                    ))
                }
            },
            other => {
                self.broken = true;
                Err(Error::invalid_response(format!(
                    "server replied to a command with {:?}",
                    other.op_code()
                )))
            }
        }
    }

    /// Records the result of a getLastError round trip.
    pub(crate) fn record_last_error(&mut self, code: i32, message: String, n: i32) {
        self.last_error = Some(LastError { code, message, n });
    }

    #[cfg(test)]
    pub(crate) fn new_mock(stream: tokio::io::DuplexStream) -> Self {
        Self {
            id: 0,
            address: ServerAddress::default(),
            stream: AsyncStream::Mock(stream),
            next_request_id: 1,
            broken: false,
            stream_description: Some(StreamDescription::new_testing()),
            compressor: None,
            last_error: None,
            connect_timeout: None,
            socket_timeout: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{
        wire::{Message, MessageBody, MessageFlags, MessageSection, OpMsg},
        *,
    };
    use crate::{bson::RawDocumentBuf, doc};

    fn ok_reply(response_to: i32) -> Message {
        Message {
            request_id: 99,
            response_to,
            body: MessageBody::Msg(OpMsg {
                flags: MessageFlags::empty(),
                sections: vec![MessageSection::Body(
                    RawDocumentBuf::from_document(&doc! { "ok": 1 }).unwrap(),
                )],
                checksum: None,
            }),
        }
    }

    #[tokio::test]
    async fn rpc_correlation_success_and_mismatch() {
        // Matching response_to succeeds.
        let (client_end, mut server_end) = tokio::io::duplex(1024 * 1024);
        let mut conn = Connection::new_mock(client_end);

        let server = tokio::spawn(async move {
            let request = Message::read_from(&mut server_end).await.unwrap();
            ok_reply(request.request_id)
                .write_to(&mut server_end)
                .await
                .unwrap();
            // Second exchange: reply with the wrong correlation id.
            let request = Message::read_from(&mut server_end).await.unwrap();
            ok_reply(request.request_id + 1)
                .write_to(&mut server_end)
                .await
                .unwrap();
        });

        let response = conn
            .send_command(Command::new("ping", "admin", doc! { "ping": 1 }))
            .await
            .unwrap();
        assert_eq!(response.checked_body().unwrap().get_i32("ok"), Some(1));

        let err = conn
            .send_command(Command::new("ping", "admin", doc! { "ping": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind.as_ref(),
            ErrorKind::InvalidResponse { .. }
        ));

        // The mismatch broke the connection; further use fails fast.
        let err = conn
            .send_command(Command::new("ping", "admin", doc! { "ping": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind.as_ref(),
            ErrorKind::ConnectionBroken { .. }
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn eof_after_send_is_a_network_error() {
        let (client_end, mut server_end) = tokio::io::duplex(1024 * 1024);
        let mut conn = Connection::new_mock(client_end);

        let server = tokio::spawn(async move {
            // Read the full request, then hang up without replying.
            let _ = Message::read_from(&mut server_end).await.unwrap();
            drop(server_end);
        });

        let err = conn
            .send_command(Command::new("ping", "admin", doc! { "ping": 1 }))
            .await
            .unwrap_err();
        assert!(err.is_network_error());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn request_ids_strictly_increase() {
        let (client_end, mut server_end) = tokio::io::duplex(1024 * 1024);
        let mut conn = Connection::new_mock(client_end);

        let server = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..3 {
                let request = Message::read_from(&mut server_end).await.unwrap();
                ids.push(request.request_id);
                ok_reply(request.request_id)
                    .write_to(&mut server_end)
                    .await
                    .unwrap();
            }
            ids
        });

        for _ in 0..3 {
            conn.send_command(Command::new("ping", "admin", doc! { "ping": 1 }))
                .await
                .unwrap();
        }

        let ids = server.await.unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
