use pretty_assertions::assert_eq;

use super::{
    header::{Header, OpCode},
    message::*,
};
use crate::{
    bson::RawDocumentBuf,
    doc,
    error::ErrorKind,
};

async fn encode(message: &Message) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    message.write_to(&mut cursor).await.unwrap();
    cursor.into_inner()
}

async fn decode(mut bytes: &[u8]) -> Message {
    Message::read_from(&mut bytes).await.unwrap()
}

fn raw(doc: crate::bson::Document) -> RawDocumentBuf {
    RawDocumentBuf::from_document(&doc).unwrap()
}

// A reference OP_QUERY frame, byte for byte.
#[tokio::test]
async fn query_frame_reference_bytes() {
    let message = Message::new(
        7,
        MessageBody::Query(QueryMessage {
            flags: QueryFlags::SLAVE_OK,
            namespace: "admin.$cmd".to_string(),
            number_to_skip: 0,
            number_to_return: -1,
            query: raw(doc! { "ping": 1 }),
            return_fields: None,
        }),
    );
    let bytes = encode(&message).await;

    #[rustfmt::skip]
    let expected: Vec<u8> = vec![
        // header: length 54, request id 7, response_to -1, opcode 2004
        54, 0, 0, 0,
        7, 0, 0, 0,
        0xff, 0xff, 0xff, 0xff,
        0xd4, 0x07, 0, 0,
        // flags: slave_ok
        4, 0, 0, 0,
        // cstring namespace
        b'a', b'd', b'm', b'i', b'n', b'.', b'$', b'c', b'm', b'd', 0,
        // skip 0, return -1
        0, 0, 0, 0,
        0xff, 0xff, 0xff, 0xff,
        // {"ping": 1}
        15, 0, 0, 0, 0x10, b'p', b'i', b'n', b'g', 0, 1, 0, 0, 0, 0,
    ];
    assert_eq!(bytes, expected);
}

#[tokio::test]
async fn header_fields_are_little_endian() {
    let header = Header {
        length: 16,
        request_id: 0x01020304,
        response_to: 0,
        op_code: OpCode::Reply,
    };
    let bytes = header.to_bytes();
    assert_eq!(&bytes[0..4], &[16, 0, 0, 0]);
    assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&bytes[12..16], &[1, 0, 0, 0]);
}

// Gather-then-scatter round trips byte-identically for every opcode.
#[tokio::test]
async fn each_opcode_round_trips() {
    let selector = raw(doc! { "_id": 1 });
    let update = raw(doc! { "$set": doc! { "a": 2 } });
    let bodies = vec![
        MessageBody::Reply(ReplyMessage {
            flags: ReplyFlags::AWAIT_CAPABLE,
            cursor_id: 1234,
            starting_from: 0,
            number_returned: 2,
            documents: vec![raw(doc! { "a": 1 }), raw(doc! { "a": 2 })],
        }),
        MessageBody::Msg(OpMsg {
            flags: MessageFlags::empty(),
            sections: vec![
                MessageSection::Body(raw(doc! { "insert": "coll", "$db": "test" })),
                MessageSection::Sequence {
                    identifier: "documents".to_string(),
                    documents: vec![raw(doc! { "x": 1 }), raw(doc! { "x": 2 })],
                },
            ],
            checksum: None,
        }),
        MessageBody::LegacyMsg {
            message: "deprecated".to_string(),
        },
        MessageBody::Query(QueryMessage {
            flags: QueryFlags::TAILABLE_CURSOR | QueryFlags::AWAIT_DATA,
            namespace: "db.coll".to_string(),
            number_to_skip: 3,
            number_to_return: 10,
            query: raw(doc! { "a": doc! { "$gt": 1 } }),
            return_fields: Some(raw(doc! { "a": 1 })),
        }),
        MessageBody::Insert(InsertMessage {
            flags: InsertFlags::CONTINUE_ON_ERROR,
            namespace: "db.coll".to_string(),
            documents: vec![raw(doc! { "x": 1 })],
        }),
        MessageBody::Update(UpdateMessage {
            namespace: "db.coll".to_string(),
            flags: UpdateFlags::UPSERT | UpdateFlags::MULTI,
            selector: selector.clone(),
            update,
        }),
        MessageBody::Delete(DeleteMessage {
            namespace: "db.coll".to_string(),
            flags: DeleteFlags::SINGLE_REMOVE,
            selector,
        }),
        MessageBody::GetMore(GetMoreMessage {
            namespace: "db.coll".to_string(),
            number_to_return: 100,
            cursor_id: 987654321,
        }),
        MessageBody::KillCursors(KillCursorsMessage {
            cursor_ids: vec![1, 2, 3],
        }),
    ];

    for body in bodies {
        let message = Message::new(42, body);
        let bytes = encode(&message).await;

        // The header declares the exact frame length.
        let declared = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(declared as usize, bytes.len());

        let decoded = decode(&bytes).await;
        assert_eq!(decoded.request_id, 42);
        let reencoded = encode(&Message {
            request_id: decoded.request_id,
            response_to: decoded.response_to,
            body: decoded.body,
        })
        .await;
        assert_eq!(reencoded, bytes);
    }
}

#[tokio::test]
async fn legacy_opcodes_carry_response_to_minus_one() {
    let query = Message::new(
        1,
        MessageBody::Query(QueryMessage {
            flags: QueryFlags::empty(),
            namespace: "db.coll".to_string(),
            number_to_skip: 0,
            number_to_return: 0,
            query: raw(doc! {}),
            return_fields: None,
        }),
    );
    assert_eq!(query.response_to, -1);

    let msg = Message::new(
        2,
        MessageBody::Msg(OpMsg {
            flags: MessageFlags::empty(),
            sections: vec![MessageSection::Body(raw(doc! { "ping": 1 }))],
            checksum: None,
        }),
    );
    assert_eq!(msg.response_to, 0);
}

#[tokio::test]
async fn oversized_length_is_a_protocol_error() {
    let bytes = Header {
        length: MAX_MESSAGE_SIZE_BYTES + 1,
        request_id: 1,
        response_to: 0,
        op_code: OpCode::Reply,
    }
    .to_bytes()
    .to_vec();

    let err = Message::read_from(&mut bytes.as_slice()).await.unwrap_err();
    assert!(matches!(
        err.kind.as_ref(),
        ErrorKind::InvalidResponse { .. }
    ));
}

#[tokio::test]
async fn undersized_length_is_a_protocol_error() {
    let bytes = Header {
        length: 12,
        request_id: 1,
        response_to: 0,
        op_code: OpCode::Reply,
    }
    .to_bytes()
    .to_vec();

    let err = Message::read_from(&mut bytes.as_slice()).await.unwrap_err();
    assert!(matches!(
        err.kind.as_ref(),
        ErrorKind::InvalidResponse { .. }
    ));
}

#[tokio::test]
async fn unknown_opcode_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&16i32.to_le_bytes());
    bytes.extend_from_slice(&1i32.to_le_bytes());
    bytes.extend_from_slice(&0i32.to_le_bytes());
    bytes.extend_from_slice(&9999i32.to_le_bytes());

    let err = Message::read_from(&mut bytes.as_slice()).await.unwrap_err();
    assert!(matches!(
        err.kind.as_ref(),
        ErrorKind::InvalidResponse { .. }
    ));
}

#[tokio::test]
async fn truncated_body_is_a_protocol_error() {
    let message = Message::new(
        5,
        MessageBody::Reply(ReplyMessage {
            flags: ReplyFlags::empty(),
            cursor_id: 0,
            starting_from: 0,
            number_returned: 1,
            documents: vec![raw(doc! { "ok": 1 })],
        }),
    );
    let mut bytes = encode(&message).await;
    // Shorten the payload but keep the declared length: the doc parse runs off the end.
    let len = bytes.len();
    bytes.truncate(len - 3);
    bytes[0..4].copy_from_slice(&((len - 3) as i32).to_le_bytes());

    let err = Message::read_from(&mut bytes.as_slice()).await.unwrap_err();
    assert!(matches!(
        err.kind.as_ref(),
        ErrorKind::InvalidResponse { .. }
    ));
}

#[cfg(feature = "zlib-compression")]
#[tokio::test]
async fn compressed_message_round_trips_once() {
    use crate::compression::Compressor;

    let message = Message::new(
        9,
        MessageBody::Msg(OpMsg {
            flags: MessageFlags::empty(),
            sections: vec![MessageSection::Body(raw(doc! { "ping": 1, "$db": "admin" }))],
            checksum: None,
        }),
    );

    let mut cursor = std::io::Cursor::new(Vec::new());
    message
        .write_compressed_to(&mut cursor, &Compressor::Zlib { level: None })
        .await
        .unwrap();
    let bytes = cursor.into_inner();

    // The outer opcode is OP_COMPRESSED.
    let opcode = i32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    assert_eq!(opcode, OpCode::Compressed as i32);

    let decoded = decode(&bytes).await;
    match decoded.body {
        MessageBody::Msg(msg) => {
            let doc = msg.document().unwrap().to_document().unwrap();
            assert_eq!(doc.get_i32("ping"), Some(1));
        }
        other => panic!("expected OP_MSG after inflation, got {:?}", other),
    }
}

#[cfg(feature = "zlib-compression")]
#[tokio::test]
async fn nested_compression_is_rejected() {
    use crate::compression::Compressor;

    let inner = Message::new(
        9,
        MessageBody::Msg(OpMsg {
            flags: MessageFlags::empty(),
            sections: vec![MessageSection::Body(raw(doc! { "ping": 1 }))],
            checksum: None,
        }),
    );
    let mut cursor = std::io::Cursor::new(Vec::new());
    inner
        .write_compressed_to(&mut cursor, &Compressor::Zlib { level: None })
        .await
        .unwrap();
    let inner_bytes = cursor.into_inner();

    // Wrap the compressed frame in another OP_COMPRESSED by hand.
    let compressor = Compressor::Zlib { level: None };
    let inner_body = &inner_bytes[16..];
    let payload = compressor.compress(inner_body).unwrap();
    let mut outer = Vec::new();
    let total = 16 + 4 + 4 + 1 + payload.len();
    outer.extend_from_slice(&(total as i32).to_le_bytes());
    outer.extend_from_slice(&9i32.to_le_bytes());
    outer.extend_from_slice(&0i32.to_le_bytes());
    outer.extend_from_slice(&(OpCode::Compressed as i32).to_le_bytes());
    outer.extend_from_slice(&(OpCode::Compressed as i32).to_le_bytes());
    outer.extend_from_slice(&(inner_body.len() as i32).to_le_bytes());
    outer.push(2);
    outer.extend_from_slice(&payload);

    let err = Message::read_from(&mut outer.as_slice()).await.unwrap_err();
    assert!(matches!(
        err.kind.as_ref(),
        ErrorKind::InvalidResponse { .. }
    ));
}
