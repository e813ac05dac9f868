use std::collections::HashSet;
use std::sync::OnceLock;

use super::wire::{Message, MessageBody, MessageFlags, MessageSection, OpMsg};
use crate::{
    bson::{Document, RawDocumentBuf},
    error::{CommandError, Error, ErrorKind, Result},
    selection_criteria::ReadPreference,
};

/// The command names that drive the handshake/heartbeat and must never be compressed.
pub(crate) fn hello_command_names() -> &'static HashSet<&'static str> {
    static NAMES: OnceLock<HashSet<&'static str>> = OnceLock::new();
    NAMES.get_or_init(|| ["hello", "ismaster"].into_iter().collect())
}

/// Commands carrying credentials; never compressed and never logged verbatim.
pub(crate) fn sensitive_command_names() -> &'static HashSet<&'static str> {
    static NAMES: OnceLock<HashSet<&'static str>> = OnceLock::new();
    NAMES.get_or_init(|| {
        [
            "authenticate",
            "saslstart",
            "saslcontinue",
            "getnonce",
            "createuser",
            "updateuser",
            "copydbgetnonce",
            "copydbsaslstart",
            "copydb",
        ]
        .into_iter()
        .collect()
    })
}

/// `Command` is a driver side abstraction of a server command containing all the
/// information necessary to serialize it to a wire message.
#[derive(Debug, Clone)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) target_db: String,
    pub(crate) body: Document,
    document_sequences: Vec<(String, Vec<RawDocumentBuf>)>,
}

impl Command {
    /// Constructs a new command.
    pub(crate) fn new(name: impl ToString, target_db: impl ToString, body: Document) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            body,
            document_sequences: Vec::new(),
        }
    }

    /// Attaches a payload-type-1 document sequence, keeping the documents out of the body
    /// document so only the 48 MiB frame cap applies to them.
    pub(crate) fn add_document_sequence(
        &mut self,
        identifier: impl ToString,
        documents: Vec<RawDocumentBuf>,
    ) {
        self.document_sequences
            .push((identifier.to_string(), documents));
    }

    pub(crate) fn set_read_preference(&mut self, read_pref: ReadPreference) {
        self.body
            .insert("$readPreference", read_pref.into_document());
    }

    /// Whether this command is eligible for wire compression.
    pub(crate) fn should_compress(&self) -> bool {
        let name = self.name.to_lowercase();
        !sensitive_command_names().contains(name.as_str())
            && !hello_command_names().contains(name.as_str())
    }

    /// Serializes this command into an OP_MSG body with the `$db` field appended.
    pub(crate) fn into_message(mut self, request_id: i32) -> Result<Message> {
        self.body.insert("$db", self.target_db.clone());
        let body = RawDocumentBuf::from_document(&self.body)?;

        let mut sections = vec![MessageSection::Body(body)];
        for (identifier, documents) in self.document_sequences {
            sections.push(MessageSection::Sequence {
                identifier,
                documents,
            });
        }

        Ok(Message::new(
            request_id,
            MessageBody::Msg(OpMsg {
                flags: MessageFlags::empty(),
                sections,
                checksum: None,
            }),
        ))
    }

    /// Like [`into_message`](Self::into_message), but with `moreToCome` set so the server
    /// sends no reply. Used for unacknowledged (`w:0`) writes.
    pub(crate) fn into_fire_and_forget_message(mut self, request_id: i32) -> Result<Message> {
        self.body.insert("$db", self.target_db.clone());
        let body = RawDocumentBuf::from_document(&self.body)?;

        let mut sections = vec![MessageSection::Body(body)];
        for (identifier, documents) in self.document_sequences {
            sections.push(MessageSection::Sequence {
                identifier,
                documents,
            });
        }

        Ok(Message::new(
            request_id,
            MessageBody::Msg(OpMsg {
                flags: MessageFlags::MORE_TO_COME,
                sections,
                checksum: None,
            }),
        ))
    }
}

/// A response to a command, owning the reply's body document bytes.
#[derive(Debug, Clone)]
pub(crate) struct RawCommandResponse {
    raw: RawDocumentBuf,
}

impl RawCommandResponse {
    pub(crate) fn new(raw: RawDocumentBuf) -> Self {
        Self { raw }
    }

    /// Decodes the reply into a document tree without inspecting `ok`.
    pub(crate) fn body(&self) -> Result<Document> {
        self.raw
            .to_document()
            .map_err(|e| Error::invalid_response(e.to_string()))
    }

    /// Decodes the reply and surfaces `ok: 0` replies as command errors, preserving the
    /// server's `code` and `errmsg` verbatim.
    pub(crate) fn checked_body(&self) -> Result<Document> {
        let doc = self.body()?;
        match ok_from(&doc) {
            Some(1) => Ok(doc),
            Some(_) => Err(command_error_from(&doc)),
            None => Err(Error::invalid_response(
                "reply is missing the `ok` field".to_string(),
            )),
        }
    }
}

/// Coerces the reply's `ok` field, which servers variously send as a double, i32, or i64.
pub(crate) fn ok_from(doc: &Document) -> Option<i64> {
    crate::bson_util::get_int(doc.get("ok")?)
}

/// Builds the command error for an `ok: 0` reply, including any error labels.
pub(crate) fn command_error_from(doc: &Document) -> Error {
    let labels: Option<Vec<String>> = doc.get_array("errorLabels").map(|arr| {
        arr.iter()
            .filter_map(crate::bson::Bson::as_str)
            .map(String::from)
            .collect()
    });
    Error::new(
        ErrorKind::Command(CommandError::from_document(doc)),
        labels,
    )
}
