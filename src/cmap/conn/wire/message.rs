use std::borrow::Cow;

use bitflags::bitflags;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::header::{Header, OpCode};
use crate::{
    bson::RawDocumentBuf,
    compression::{self, Compressor},
    error::{ErrorKind, Result},
};

/// The hard cap on a single wire message, independent of any negotiated limits.
pub(crate) const MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

const NUL_BYTE: [u8; 1] = [0];
const ZERO_I32: [u8; 4] = [0; 4];

/// A full wire protocol message: the header's correlation fields plus an opcode-specific
/// body.
#[derive(Debug, Clone)]
pub(crate) struct Message {
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) body: MessageBody,
}

impl Message {
    /// Creates an outgoing message. Legacy opcodes go out with `response_to = -1`, matching
    /// the convention of servers that predate OP_MSG; OP_MSG carries 0.
    pub(crate) fn new(request_id: i32, body: MessageBody) -> Self {
        let response_to = if body.is_legacy() { -1 } else { 0 };
        Self {
            request_id,
            response_to,
            body,
        }
    }

    fn validate_length(length: i32) -> Result<()> {
        if length < Header::LENGTH as i32 || length > MAX_MESSAGE_SIZE_BYTES {
            return Err(ErrorKind::InvalidResponse {
                message: format!(
                    "message length {} out of bounds [{}, {}]",
                    length,
                    Header::LENGTH,
                    MAX_MESSAGE_SIZE_BYTES
                ),
            }
            .into());
        }
        Ok(())
    }

    /// Reads a full message from `reader`, transparently inflating OP_COMPRESSED. Exactly
    /// one level of compression nesting is permitted.
    pub(crate) async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = Header::read_from(reader).await?;
        Self::validate_length(header.length)?;

        let mut body = vec![0u8; header.length as usize - Header::LENGTH];
        reader.read_exact(&mut body).await?;

        let message_body = if header.op_code == OpCode::Compressed {
            let mut reader = SliceReader::new(&body);
            let original_opcode = OpCode::from_i32(reader.read_i32()?)?;
            if original_opcode == OpCode::Compressed {
                return Err(ErrorKind::InvalidResponse {
                    message: "OP_COMPRESSED may not wrap another OP_COMPRESSED".to_string(),
                }
                .into());
            }
            let uncompressed_size = reader.read_i32()?;
            let compressor_id = reader.read_u8()?;
            let inflated = compression::decompress(compressor_id, reader.rest())?;
            if inflated.len() != uncompressed_size as usize {
                return Err(ErrorKind::InvalidResponse {
                    message: format!(
                        "compressed message inflated to {} bytes, expected {}",
                        inflated.len(),
                        uncompressed_size
                    ),
                }
                .into());
            }
            MessageBody::decode(original_opcode, &inflated)?
        } else {
            MessageBody::decode(header.op_code, &body)?
        };

        Ok(Self {
            request_id: header.request_id,
            response_to: header.response_to,
            body: message_body,
        })
    }

    /// Serializes this message and writes it to `writer`: the body fields are gathered into
    /// a vector of byte slices, `msg_len` is computed from the gather, and the header and
    /// slices are then written in order.
    pub(crate) async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let segments = self.body.gather();
        let total_length =
            Header::LENGTH + segments.iter().map(|s| s.len()).sum::<usize>();
        if total_length > MAX_MESSAGE_SIZE_BYTES as usize {
            return Err(ErrorKind::InvalidArgument {
                message: format!(
                    "attempted to send a {} byte message, over the {} byte wire cap",
                    total_length, MAX_MESSAGE_SIZE_BYTES
                ),
            }
            .into());
        }

        let header = Header {
            length: total_length as i32,
            request_id: self.request_id,
            response_to: self.response_to,
            op_code: self.body.op_code(),
        };

        header.write_to(writer).await?;
        for segment in &segments {
            writer.write_all(segment).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Serializes this message with the body compressed under `compressor`.
    pub(crate) async fn write_compressed_to<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        compressor: &Compressor,
    ) -> Result<()> {
        let segments = self.body.gather();
        let uncompressed: Vec<u8> = segments.concat();
        let payload = compressor.compress(&uncompressed)?;

        let total_length = Header::LENGTH + 4 + 4 + 1 + payload.len();
        if total_length > MAX_MESSAGE_SIZE_BYTES as usize {
            return Err(ErrorKind::InvalidArgument {
                message: format!(
                    "attempted to send a {} byte message, over the {} byte wire cap",
                    total_length, MAX_MESSAGE_SIZE_BYTES
                ),
            }
            .into());
        }

        let header = Header {
            length: total_length as i32,
            request_id: self.request_id,
            response_to: self.response_to,
            op_code: OpCode::Compressed,
        };

        header.write_to(writer).await?;
        writer
            .write_all(&(self.body.op_code() as i32).to_le_bytes())
            .await?;
        writer
            .write_all(&(uncompressed.len() as i32).to_le_bytes())
            .await?;
        writer.write_all(&[compressor.id() as u8]).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// The opcode-specific body of a wire message, modeled as a sum type: each variant carries
/// only the fields that apply.
#[derive(Debug, Clone)]
pub(crate) enum MessageBody {
    Reply(ReplyMessage),
    Msg(OpMsg),
    LegacyMsg { message: String },
    Query(QueryMessage),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    GetMore(GetMoreMessage),
    KillCursors(KillCursorsMessage),
}

impl MessageBody {
    pub(crate) fn op_code(&self) -> OpCode {
        match self {
            MessageBody::Reply(_) => OpCode::Reply,
            MessageBody::Msg(_) => OpCode::Message,
            MessageBody::LegacyMsg { .. } => OpCode::Msg,
            MessageBody::Query(_) => OpCode::Query,
            MessageBody::Insert(_) => OpCode::Insert,
            MessageBody::Update(_) => OpCode::Update,
            MessageBody::Delete(_) => OpCode::Delete,
            MessageBody::GetMore(_) => OpCode::GetMore,
            MessageBody::KillCursors(_) => OpCode::KillCursors,
        }
    }

    fn is_legacy(&self) -> bool {
        !matches!(self, MessageBody::Msg(_))
    }

    fn decode(op_code: OpCode, body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body);
        let message = match op_code {
            OpCode::Reply => MessageBody::Reply(ReplyMessage::decode(&mut reader)?),
            OpCode::Message => MessageBody::Msg(OpMsg::decode(&mut reader)?),
            OpCode::Msg => MessageBody::LegacyMsg {
                message: reader.read_cstr()?,
            },
            OpCode::Query => MessageBody::Query(QueryMessage::decode(&mut reader)?),
            OpCode::Insert => MessageBody::Insert(InsertMessage::decode(&mut reader)?),
            OpCode::Update => MessageBody::Update(UpdateMessage::decode(&mut reader)?),
            OpCode::Delete => MessageBody::Delete(DeleteMessage::decode(&mut reader)?),
            OpCode::GetMore => MessageBody::GetMore(GetMoreMessage::decode(&mut reader)?),
            OpCode::KillCursors => {
                MessageBody::KillCursors(KillCursorsMessage::decode(&mut reader)?)
            }
            OpCode::Compressed => {
                return Err(ErrorKind::InvalidResponse {
                    message: "OP_COMPRESSED may not wrap another OP_COMPRESSED".to_string(),
                }
                .into())
            }
        };
        if !reader.is_empty() {
            return Err(ErrorKind::InvalidResponse {
                message: format!(
                    "{} trailing bytes after {:?} body",
                    reader.remaining(),
                    op_code
                ),
            }
            .into());
        }
        Ok(message)
    }

    fn gather(&self) -> Vec<Cow<'_, [u8]>> {
        let mut segments: Vec<Cow<'_, [u8]>> = Vec::new();
        match self {
            MessageBody::Reply(reply) => reply.gather(&mut segments),
            MessageBody::Msg(msg) => msg.gather(&mut segments),
            MessageBody::LegacyMsg { message } => {
                segments.push(Cow::Borrowed(message.as_bytes()));
                segments.push(Cow::Borrowed(&NUL_BYTE));
            }
            MessageBody::Query(query) => query.gather(&mut segments),
            MessageBody::Insert(insert) => insert.gather(&mut segments),
            MessageBody::Update(update) => update.gather(&mut segments),
            MessageBody::Delete(delete) => delete.gather(&mut segments),
            MessageBody::GetMore(get_more) => get_more.gather(&mut segments),
            MessageBody::KillCursors(kill) => kill.gather(&mut segments),
        }
        segments
    }
}

bitflags! {
    /// The bitwise flags of an OP_QUERY.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct QueryFlags: i32 {
        const TAILABLE_CURSOR   = 0b0000_0010;
        const SLAVE_OK          = 0b0000_0100;
        const OPLOG_REPLAY      = 0b0000_1000;
        const NO_CURSOR_TIMEOUT = 0b0001_0000;
        const AWAIT_DATA        = 0b0010_0000;
        const EXHAUST           = 0b0100_0000;
        const PARTIAL           = 0b1000_0000;
    }
}

bitflags! {
    /// The bitwise flags of an OP_REPLY.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct ReplyFlags: i32 {
        const CURSOR_NOT_FOUND   = 0b0001;
        const QUERY_FAILURE      = 0b0010;
        const SHARD_CONFIG_STALE = 0b0100;
        const AWAIT_CAPABLE      = 0b1000;
    }
}

bitflags! {
    /// The bitwise flags of an OP_UPDATE.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct UpdateFlags: i32 {
        const UPSERT = 0b01;
        const MULTI  = 0b10;
    }
}

bitflags! {
    /// The bitwise flags of an OP_DELETE.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct DeleteFlags: i32 {
        const SINGLE_REMOVE = 0b1;
    }
}

bitflags! {
    /// The bitwise flags of an OP_INSERT.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct InsertFlags: i32 {
        const CONTINUE_ON_ERROR = 0b1;
    }
}

bitflags! {
    /// The bitwise flags of an OP_MSG.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

/// An OP_REPLY body.
#[derive(Debug, Clone)]
pub(crate) struct ReplyMessage {
    pub(crate) flags: ReplyFlags,
    pub(crate) cursor_id: i64,
    pub(crate) starting_from: i32,
    pub(crate) number_returned: i32,
    pub(crate) documents: Vec<RawDocumentBuf>,
}

impl ReplyMessage {
    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let flags = ReplyFlags::from_bits_truncate(reader.read_i32()?);
        let cursor_id = reader.read_i64()?;
        let starting_from = reader.read_i32()?;
        let number_returned = reader.read_i32()?;
        let mut documents = Vec::new();
        while !reader.is_empty() {
            documents.push(reader.read_document()?);
        }
        if documents.len() != number_returned.max(0) as usize {
            return Err(ErrorKind::InvalidResponse {
                message: format!(
                    "OP_REPLY declared {} documents but carried {}",
                    number_returned,
                    documents.len()
                ),
            }
            .into());
        }
        Ok(Self {
            flags,
            cursor_id,
            starting_from,
            number_returned,
            documents,
        })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Owned(self.flags.bits().to_le_bytes().to_vec()));
        segments.push(Cow::Owned(self.cursor_id.to_le_bytes().to_vec()));
        segments.push(Cow::Owned(self.starting_from.to_le_bytes().to_vec()));
        segments.push(Cow::Owned(self.number_returned.to_le_bytes().to_vec()));
        for doc in &self.documents {
            segments.push(Cow::Borrowed(doc.as_bytes()));
        }
    }
}

/// A section of an OP_MSG.
#[derive(Debug, Clone)]
pub(crate) enum MessageSection {
    /// Payload type 0: a single document.
    Body(RawDocumentBuf),

    /// Payload type 1: an identified sequence of documents, pulled out of the body
    /// document to dodge its size limit.
    Sequence {
        identifier: String,
        documents: Vec<RawDocumentBuf>,
    },
}

/// A modern OP_MSG body.
#[derive(Debug, Clone)]
pub(crate) struct OpMsg {
    pub(crate) flags: MessageFlags,
    pub(crate) sections: Vec<MessageSection>,
    pub(crate) checksum: Option<u32>,
}

impl OpMsg {
    /// The body section (payload type 0). Every valid OP_MSG has exactly one.
    pub(crate) fn document(&self) -> Result<&RawDocumentBuf> {
        self.sections
            .iter()
            .find_map(|section| match section {
                MessageSection::Body(doc) => Some(doc),
                MessageSection::Sequence { .. } => None,
            })
            .ok_or_else(|| {
                ErrorKind::InvalidResponse {
                    message: "OP_MSG contained no body section".to_string(),
                }
                .into()
            })
    }

    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let flags = MessageFlags::from_bits_truncate(reader.read_u32()?);
        let mut sections = Vec::new();
        let mut checksum = None;

        loop {
            let remaining = reader.remaining();
            if remaining == 0 {
                break;
            }
            if remaining == 4 && flags.contains(MessageFlags::CHECKSUM_PRESENT) {
                checksum = Some(reader.read_u32()?);
                break;
            }
            match reader.read_u8()? {
                0 => sections.push(MessageSection::Body(reader.read_document()?)),
                1 => {
                    let size = reader.read_i32()?;
                    if size < 4 {
                        return Err(ErrorKind::InvalidResponse {
                            message: format!("OP_MSG sequence section of size {}", size),
                        }
                        .into());
                    }
                    let end = reader
                        .pos
                        .checked_add(size as usize - 4)
                        .filter(|end| *end <= reader.buf.len())
                        .ok_or_else(|| {
                            crate::error::Error::invalid_response(
                                "OP_MSG sequence section extends past end of message",
                            )
                        })?;
                    let identifier = reader.read_cstr()?;
                    let mut documents = Vec::new();
                    while reader.pos < end {
                        documents.push(reader.read_document()?);
                    }
                    if reader.pos != end {
                        return Err(ErrorKind::InvalidResponse {
                            message: "OP_MSG sequence section length mismatch".to_string(),
                        }
                        .into());
                    }
                    sections.push(MessageSection::Sequence {
                        identifier,
                        documents,
                    });
                }
                other => {
                    return Err(ErrorKind::InvalidResponse {
                        message: format!("invalid OP_MSG payload type: {}", other),
                    }
                    .into())
                }
            }
        }

        Ok(Self {
            flags,
            sections,
            checksum,
        })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Owned(self.flags.bits().to_le_bytes().to_vec()));
        for section in &self.sections {
            match section {
                MessageSection::Body(doc) => {
                    segments.push(Cow::Owned(vec![0u8]));
                    segments.push(Cow::Borrowed(doc.as_bytes()));
                }
                MessageSection::Sequence {
                    identifier,
                    documents,
                } => {
                    segments.push(Cow::Owned(vec![1u8]));
                    let size = 4
                        + identifier.len()
                        + 1
                        + documents.iter().map(|d| d.as_bytes().len()).sum::<usize>();
                    segments.push(Cow::Owned((size as i32).to_le_bytes().to_vec()));
                    segments.push(Cow::Borrowed(identifier.as_bytes()));
                    segments.push(Cow::Borrowed(&NUL_BYTE));
                    for doc in documents {
                        segments.push(Cow::Borrowed(doc.as_bytes()));
                    }
                }
            }
        }
        if let Some(checksum) = self.checksum {
            segments.push(Cow::Owned(checksum.to_le_bytes().to_vec()));
        }
    }
}

/// An OP_QUERY body.
#[derive(Debug, Clone)]
pub(crate) struct QueryMessage {
    pub(crate) flags: QueryFlags,
    pub(crate) namespace: String,
    pub(crate) number_to_skip: i32,
    pub(crate) number_to_return: i32,
    pub(crate) query: RawDocumentBuf,
    pub(crate) return_fields: Option<RawDocumentBuf>,
}

impl QueryMessage {
    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let flags = QueryFlags::from_bits_truncate(reader.read_i32()?);
        let namespace = reader.read_cstr()?;
        let number_to_skip = reader.read_i32()?;
        let number_to_return = reader.read_i32()?;
        let query = reader.read_document()?;
        let return_fields = if reader.is_empty() {
            None
        } else {
            Some(reader.read_document()?)
        };
        Ok(Self {
            flags,
            namespace,
            number_to_skip,
            number_to_return,
            query,
            return_fields,
        })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Owned(self.flags.bits().to_le_bytes().to_vec()));
        segments.push(Cow::Borrowed(self.namespace.as_bytes()));
        segments.push(Cow::Borrowed(&NUL_BYTE));
        segments.push(Cow::Owned(self.number_to_skip.to_le_bytes().to_vec()));
        segments.push(Cow::Owned(self.number_to_return.to_le_bytes().to_vec()));
        segments.push(Cow::Borrowed(self.query.as_bytes()));
        if let Some(ref fields) = self.return_fields {
            segments.push(Cow::Borrowed(fields.as_bytes()));
        }
    }
}

/// An OP_INSERT body.
#[derive(Debug, Clone)]
pub(crate) struct InsertMessage {
    pub(crate) flags: InsertFlags,
    pub(crate) namespace: String,
    pub(crate) documents: Vec<RawDocumentBuf>,
}

impl InsertMessage {
    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let flags = InsertFlags::from_bits_truncate(reader.read_i32()?);
        let namespace = reader.read_cstr()?;
        let mut documents = Vec::new();
        while !reader.is_empty() {
            documents.push(reader.read_document()?);
        }
        Ok(Self {
            flags,
            namespace,
            documents,
        })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Owned(self.flags.bits().to_le_bytes().to_vec()));
        segments.push(Cow::Borrowed(self.namespace.as_bytes()));
        segments.push(Cow::Borrowed(&NUL_BYTE));
        for doc in &self.documents {
            segments.push(Cow::Borrowed(doc.as_bytes()));
        }
    }
}

/// An OP_UPDATE body.
#[derive(Debug, Clone)]
pub(crate) struct UpdateMessage {
    pub(crate) namespace: String,
    pub(crate) flags: UpdateFlags,
    pub(crate) selector: RawDocumentBuf,
    pub(crate) update: RawDocumentBuf,
}

impl UpdateMessage {
    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let _zero = reader.read_i32()?;
        let namespace = reader.read_cstr()?;
        let flags = UpdateFlags::from_bits_truncate(reader.read_i32()?);
        let selector = reader.read_document()?;
        let update = reader.read_document()?;
        Ok(Self {
            namespace,
            flags,
            selector,
            update,
        })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Borrowed(&ZERO_I32));
        segments.push(Cow::Borrowed(self.namespace.as_bytes()));
        segments.push(Cow::Borrowed(&NUL_BYTE));
        segments.push(Cow::Owned(self.flags.bits().to_le_bytes().to_vec()));
        segments.push(Cow::Borrowed(self.selector.as_bytes()));
        segments.push(Cow::Borrowed(self.update.as_bytes()));
    }
}

/// An OP_DELETE body.
#[derive(Debug, Clone)]
pub(crate) struct DeleteMessage {
    pub(crate) namespace: String,
    pub(crate) flags: DeleteFlags,
    pub(crate) selector: RawDocumentBuf,
}

impl DeleteMessage {
    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let _zero = reader.read_i32()?;
        let namespace = reader.read_cstr()?;
        let flags = DeleteFlags::from_bits_truncate(reader.read_i32()?);
        let selector = reader.read_document()?;
        Ok(Self {
            namespace,
            flags,
            selector,
        })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Borrowed(&ZERO_I32));
        segments.push(Cow::Borrowed(self.namespace.as_bytes()));
        segments.push(Cow::Borrowed(&NUL_BYTE));
        segments.push(Cow::Owned(self.flags.bits().to_le_bytes().to_vec()));
        segments.push(Cow::Borrowed(self.selector.as_bytes()));
    }
}

/// An OP_GET_MORE body.
#[derive(Debug, Clone)]
pub(crate) struct GetMoreMessage {
    pub(crate) namespace: String,
    pub(crate) number_to_return: i32,
    pub(crate) cursor_id: i64,
}

impl GetMoreMessage {
    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let _zero = reader.read_i32()?;
        let namespace = reader.read_cstr()?;
        let number_to_return = reader.read_i32()?;
        let cursor_id = reader.read_i64()?;
        Ok(Self {
            namespace,
            number_to_return,
            cursor_id,
        })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Borrowed(&ZERO_I32));
        segments.push(Cow::Borrowed(self.namespace.as_bytes()));
        segments.push(Cow::Borrowed(&NUL_BYTE));
        segments.push(Cow::Owned(self.number_to_return.to_le_bytes().to_vec()));
        segments.push(Cow::Owned(self.cursor_id.to_le_bytes().to_vec()));
    }
}

/// An OP_KILL_CURSORS body.
#[derive(Debug, Clone)]
pub(crate) struct KillCursorsMessage {
    pub(crate) cursor_ids: Vec<i64>,
}

impl KillCursorsMessage {
    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let _zero = reader.read_i32()?;
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(ErrorKind::InvalidResponse {
                message: format!("OP_KILL_CURSORS with negative count {}", count),
            }
            .into());
        }
        let mut cursor_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cursor_ids.push(reader.read_i64()?);
        }
        Ok(Self { cursor_ids })
    }

    fn gather<'a>(&'a self, segments: &mut Vec<Cow<'a, [u8]>>) {
        segments.push(Cow::Borrowed(&ZERO_I32));
        segments.push(Cow::Owned(
            (self.cursor_ids.len() as i32).to_le_bytes().to_vec(),
        ));
        for id in &self.cursor_ids {
            segments.push(Cow::Owned(id.to_le_bytes().to_vec()));
        }
    }
}

/// Parses opcode-specific fields in place, producing views into the body buffer that are
/// copied out only where the decoded message owns them.
struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ErrorKind::InvalidResponse {
                message: "message body truncated".to_string(),
            }
            .into());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_cstr(&mut self) -> Result<String> {
        let nul = self.buf[self.pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| crate::error::Error::invalid_response("unterminated cstring"))?;
        let bytes = self.take(nul + 1)?;
        std::str::from_utf8(&bytes[..nul])
            .map(String::from)
            .map_err(|_| crate::error::Error::invalid_response("cstring is not valid UTF-8"))
    }

    fn read_document(&mut self) -> Result<RawDocumentBuf> {
        if self.remaining() < 4 {
            return Err(crate::error::Error::invalid_response(
                "truncated document length",
            ));
        }
        let len = i32::from_le_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        if len < 5 || len as usize > self.remaining() {
            return Err(crate::error::Error::invalid_response(format!(
                "document length {} out of bounds",
                len
            )));
        }
        let bytes = self.take(len as usize)?;
        RawDocumentBuf::from_bytes(bytes.to_vec())
            .map_err(|e| crate::error::Error::invalid_response(e.to_string()))
    }
}
