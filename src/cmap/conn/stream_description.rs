use crate::{bson::DEFAULT_MAX_BSON_OBJECT_SIZE, hello::HelloReply, sdam::ServerType};

/// The default number of operations permitted in a single write command batch, used until a
/// handshake negotiates a different `maxWriteBatchSize`.
pub(crate) const DEFAULT_MAX_WRITE_BATCH_SIZE: i64 = 1000;

/// The default cap on a full wire message, used until a handshake negotiates a different
/// `maxMessageSizeBytes`.
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i64 = 48 * 1024 * 1024;

/// Contains the negotiated limits and versions of a given server, in a format digestible by
/// a connection.
#[derive(Debug, Clone)]
pub(crate) struct StreamDescription {
    /// The type of the server, as reported by the handshake.
    pub(crate) initial_server_type: ServerType,

    /// The maximum wire version that the server understands.
    pub(crate) max_wire_version: Option<i32>,

    /// The minimum wire version that the server understands.
    pub(crate) min_wire_version: Option<i32>,

    /// The supported authentication mechanisms advertised for the handshake credential.
    pub(crate) sasl_supported_mechs: Option<Vec<String>>,

    /// The maximum size of a single BSON document the server accepts.
    pub(crate) max_bson_object_size: i64,

    /// The maximum size of a full wire message the server accepts.
    pub(crate) max_message_size_bytes: i64,

    /// The maximum number of write operations the server accepts in one write command.
    pub(crate) max_write_batch_size: i64,

    /// Whether the server understands the modern `hello` command.
    pub(crate) hello_ok: bool,
}

impl StreamDescription {
    /// Constructs a new StreamDescription from a hello reply.
    pub(crate) fn from_hello_reply(reply: &HelloReply) -> Self {
        let response = &reply.command_response;
        Self {
            initial_server_type: response.server_type(),
            max_wire_version: response.max_wire_version,
            min_wire_version: response.min_wire_version,
            sasl_supported_mechs: response.sasl_supported_mechs.clone(),
            max_bson_object_size: response
                .max_bson_object_size
                .unwrap_or(DEFAULT_MAX_BSON_OBJECT_SIZE as i64),
            max_message_size_bytes: response
                .max_message_size_bytes
                .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE_BYTES),
            max_write_batch_size: response
                .max_write_batch_size
                .unwrap_or(DEFAULT_MAX_WRITE_BATCH_SIZE),
            hello_ok: response.hello_ok.unwrap_or(false),
        }
    }

    /// Whether the server supports OP_MSG write commands. Wire version 0 servers only speak
    /// the legacy opcodes.
    pub(crate) fn supports_write_commands(&self) -> bool {
        self.max_wire_version.unwrap_or(0) >= 2
    }

    /// Whether the deployment advertises retryable-writes support (sessions + 4.0+).
    pub(crate) fn supports_retryable_writes(&self) -> bool {
        self.max_wire_version.unwrap_or(0) >= 7
    }

    /// Gets a description of a stream for a 4.2 server. For testing purposes only.
    #[cfg(test)]
    pub(crate) fn new_testing() -> Self {
        Self {
            initial_server_type: ServerType::Standalone,
            max_wire_version: Some(8),
            min_wire_version: Some(0),
            sasl_supported_mechs: None,
            max_bson_object_size: DEFAULT_MAX_BSON_OBJECT_SIZE as i64,
            max_message_size_bytes: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
            max_write_batch_size: 100_000,
            hello_ok: false,
        }
    }
}
