//! Helpers for driving the full operation path against a scripted in-memory server.

use tokio::io::DuplexStream;

use crate::{
    bson::{Bson, Document, RawDocumentBuf},
    cmap::{
        wire::{Message, MessageBody, MessageFlags, MessageSection, OpMsg},
        Connection,
    },
    doc,
    Client,
};

/// A mock client plus the server half of its stream.
pub(crate) async fn mock_client() -> (Client, DuplexStream) {
    let (client_end, server_end) = tokio::io::duplex(1 << 20);
    let client = Client::mocked(Connection::new_mock(client_end)).await;
    (client, server_end)
}

/// Like [`mock_client`], but with the mock connection's negotiated limits adjusted first.
pub(crate) async fn mock_client_with<F>(tweak: F) -> (Client, DuplexStream)
where
    F: FnOnce(&mut crate::cmap::StreamDescription),
{
    let (client_end, server_end) = tokio::io::duplex(1 << 20);
    let mut connection = Connection::new_mock(client_end);
    tweak(
        connection
            .stream_description
            .as_mut()
            .expect("mock connections are pre-handshaked"),
    );
    let client = Client::mocked(connection).await;
    (client, server_end)
}

/// Reads one OP_MSG command from the wire, returning `(request_id, flags, body)`.
pub(crate) async fn read_command(stream: &mut DuplexStream) -> (i32, MessageFlags, Document) {
    let message = Message::read_from(stream).await.expect("a command frame");
    match message.body {
        MessageBody::Msg(msg) => {
            let mut body = msg
                .document()
                .expect("command has a body section")
                .to_document()
                .expect("body decodes");
            // Fold any document sequences back into the body so assertions can treat the
            // command as one document.
            for section in &msg.sections {
                if let MessageSection::Sequence {
                    identifier,
                    documents,
                } = section
                {
                    let docs: Vec<Bson> = documents
                        .iter()
                        .map(|d| Bson::Document(d.to_document().expect("sequence doc decodes")))
                        .collect();
                    body.insert(identifier.clone(), docs);
                }
            }
            (message.request_id, msg.flags, body)
        }
        other => panic!("expected an OP_MSG command, got {:?}", other.op_code()),
    }
}

/// Writes an OP_MSG reply correlated to `response_to`.
pub(crate) async fn write_reply(stream: &mut DuplexStream, response_to: i32, body: Document) {
    let message = Message {
        request_id: 1_000_000 + response_to,
        response_to,
        body: MessageBody::Msg(OpMsg {
            flags: MessageFlags::empty(),
            sections: vec![MessageSection::Body(
                RawDocumentBuf::from_document(&body).expect("reply encodes"),
            )],
            checksum: None,
        }),
    };
    message.write_to(stream).await.expect("reply frame writes");
}

/// A `{ok: 1, cursor: ...}` reply body.
pub(crate) fn cursor_reply(id: i64, ns: &str, batch_key: &str, docs: Vec<Document>) -> Document {
    doc! {
        "ok": 1,
        "cursor": doc! {
            "id": id,
            "ns": ns,
            batch_key: docs.into_iter().map(Bson::Document).collect::<Vec<_>>(),
        },
    }
}
