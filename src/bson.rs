//! The BSON document model: a typed value tree ([`Bson`]/[`Document`]) with a canonical
//! byte form ([`raw::RawDocumentBuf`]), plus the streaming builder and iterator that
//! convert between the two.

pub mod document;
mod macros;
pub mod oid;
pub mod raw;
pub mod spec;
mod value;

pub use self::{
    document::Document,
    oid::ObjectId,
    raw::{DocumentBuilder, RawBsonRef, RawDocument, RawDocumentBuf, RawIter, ValidationBits},
    spec::{BinarySubtype, ElementType},
    value::{Binary, Bson, DateTime, DbPointer, JavaScriptCodeWithScope, Regex, Timestamp},
};

/// The default cap on a single BSON document, used until a server handshake negotiates a
/// different `maxBsonObjectSize`.
pub const DEFAULT_MAX_BSON_OBJECT_SIZE: usize = 16 * 1024 * 1024;

/// The minimum number of bytes in a valid document: the length prefix plus the trailing NUL.
pub(crate) const MIN_BSON_DOCUMENT_SIZE: usize = 5;
