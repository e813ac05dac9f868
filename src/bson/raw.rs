//! The canonical byte form of BSON documents: an append-only builder with streaming
//! construction of nested scopes, and a zero-copy iterator over encoded bytes.

use std::fmt;

use bitflags::bitflags;
use thiserror::Error as ThisError;

use super::{
    document::Document,
    oid::ObjectId,
    spec::{BinarySubtype, ElementType},
    value::{Binary, Bson, DateTime, DbPointer, JavaScriptCodeWithScope, Regex, Timestamp},
    DEFAULT_MAX_BSON_OBJECT_SIZE,
    MIN_BSON_DOCUMENT_SIZE,
};

/// An error produced while building or reading encoded document bytes.
#[derive(Clone, Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// The document grew past the size cap. Once this is returned the builder is poisoned
    /// and refuses all further appends.
    #[error("document of {len} bytes exceeds the maximum size of {max} bytes")]
    #[non_exhaustive]
    TooLarge { len: usize, max: usize },

    /// A typed accessor was called on an element of a different type.
    #[error("expected element of type {expected:?}, found {actual:?}")]
    #[non_exhaustive]
    TypeMismatch {
        expected: ElementType,
        actual: ElementType,
    },

    /// A string or key in the encoded bytes is not well-formed UTF-8.
    #[error("string is not valid UTF-8")]
    NotUtf8,

    /// The encoded bytes do not form a valid document.
    #[error("malformed document bytes: {message}")]
    #[non_exhaustive]
    MalformedValue { message: String },

    /// The builder was used out of order (e.g. `finish` with an open sub-document).
    #[error("builder misuse: {message}")]
    #[non_exhaustive]
    BuilderMisuse { message: String },
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedValue {
            message: message.into(),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

bitflags! {
    /// Warnings accumulated while building a document. These are never fatal at append
    /// time; callers that hand the finished document to a write command decide which bits
    /// to reject.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ValidationBits: u8 {
        /// A key or string value was not well-formed UTF-8 (in this crate: a key
        /// contained an interior NUL and was truncated at it).
        const NOT_UTF8 = 0b001;
        /// A top-level key contained a `.`.
        const DOT_IN_KEY = 0b010;
        /// A top-level key began with `$`.
        const DOLLAR_INIT_KEY = 0b100;
    }
}

/// An append-only builder for encoded documents.
///
/// The builder starts with the root document open. Nested scopes are opened with
/// [`begin_document`](Self::begin_document) / [`begin_array`](Self::begin_array), which push
/// the offset of the pending length prefix onto an explicit stack; the matching
/// [`end_document`](Self::end_document) writes the scope terminator and patches the length.
/// [`finish`](Self::finish) closes the root and returns the read-only form together with the
/// accumulated [`ValidationBits`].
///
/// The backing buffer grows by doubling up to a hard cap; an append that would exceed the
/// cap fails with [`Error::TooLarge`] and poisons the builder.
pub struct DocumentBuilder {
    data: Vec<u8>,
    open: Vec<usize>,
    validation: ValidationBits,
    poisoned: bool,
    max_size: usize,
}

impl DocumentBuilder {
    /// Creates a builder capped at [`DEFAULT_MAX_BSON_OBJECT_SIZE`].
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_BSON_OBJECT_SIZE)
    }

    /// Creates a builder capped at the given document size, typically the negotiated
    /// `maxBsonObjectSize` of the selected server.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            data: vec![0u8; 4],
            open: vec![0],
            validation: ValidationBits::empty(),
            poisoned: false,
            max_size,
        }
    }

    /// The validation bits raised so far.
    pub fn validation(&self) -> ValidationBits {
        self.validation
    }

    fn ensure_capacity(&mut self, additional: usize) -> Result<()> {
        if self.poisoned {
            return Err(Error::TooLarge {
                len: self.data.len(),
                max: self.max_size,
            });
        }
        // One terminator byte per open scope is still owed.
        let projected = self.data.len() + additional + self.open.len();
        if projected > self.max_size {
            self.poisoned = true;
            return Err(Error::TooLarge {
                len: projected,
                max: self.max_size,
            });
        }
        Ok(())
    }

    fn append_key(&mut self, tag: ElementType, key: &str) {
        if self.open.len() == 1 {
            if key.contains('.') {
                self.validation |= ValidationBits::DOT_IN_KEY;
            }
            if key.starts_with('$') {
                self.validation |= ValidationBits::DOLLAR_INIT_KEY;
            }
        }
        self.data.push(tag as u8);
        match key.as_bytes().iter().position(|&b| b == 0) {
            // A key with an interior NUL cannot be a cstring; it is truncated at the NUL
            // and flagged, matching the warning-bit contract.
            Some(idx) => {
                self.validation |= ValidationBits::NOT_UTF8;
                self.data.extend_from_slice(&key.as_bytes()[..idx]);
            }
            None => self.data.extend_from_slice(key.as_bytes()),
        }
        self.data.push(0);
    }

    fn key_overhead(key: &str) -> usize {
        1 + key.len() + 1
    }

    fn push_lenstr(&mut self, s: &str) {
        self.data
            .extend_from_slice(&((s.len() as i32) + 1).to_le_bytes());
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
    }

    fn push_cstr(&mut self, s: &str) {
        match s.as_bytes().iter().position(|&b| b == 0) {
            Some(idx) => {
                self.validation |= ValidationBits::NOT_UTF8;
                self.data.extend_from_slice(&s.as_bytes()[..idx]);
            }
            None => self.data.extend_from_slice(s.as_bytes()),
        }
        self.data.push(0);
    }

    /// Appends a 64-bit floating point element.
    pub fn append_f64(&mut self, key: &str, value: f64) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 8)?;
        self.append_key(ElementType::Double, key);
        self.data.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Appends a UTF-8 string element.
    pub fn append_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 4 + value.len() + 1)?;
        self.append_key(ElementType::String, key);
        self.push_lenstr(value);
        Ok(())
    }

    /// Appends an already-encoded document element.
    pub fn append_document(&mut self, key: &str, value: &RawDocument) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + value.as_bytes().len())?;
        self.append_key(ElementType::EmbeddedDocument, key);
        self.data.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Appends a binary element.
    pub fn append_binary(&mut self, key: &str, subtype: BinarySubtype, bytes: &[u8]) -> Result<()> {
        let old = matches!(subtype, BinarySubtype::BinaryOld);
        let payload_len = bytes.len() + if old { 4 } else { 0 };
        self.ensure_capacity(Self::key_overhead(key) + 4 + 1 + payload_len)?;
        self.append_key(ElementType::Binary, key);
        self.data.extend_from_slice(&(payload_len as i32).to_le_bytes());
        self.data.push(subtype.into());
        if old {
            // The deprecated 0x02 subtype carries a redundant inner length.
            self.data.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends an ObjectId element.
    pub fn append_object_id(&mut self, key: &str, value: ObjectId) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 12)?;
        self.append_key(ElementType::ObjectId, key);
        self.data.extend_from_slice(&value.bytes());
        Ok(())
    }

    /// Appends a boolean element.
    pub fn append_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 1)?;
        self.append_key(ElementType::Boolean, key);
        self.data.push(value as u8);
        Ok(())
    }

    /// Appends a UTC datetime element.
    pub fn append_datetime(&mut self, key: &str, value: DateTime) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 8)?;
        self.append_key(ElementType::DateTime, key);
        self.data
            .extend_from_slice(&value.timestamp_millis().to_le_bytes());
        Ok(())
    }

    /// Appends a null element.
    pub fn append_null(&mut self, key: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key))?;
        self.append_key(ElementType::Null, key);
        Ok(())
    }

    /// Appends a regular expression element.
    pub fn append_regex(&mut self, key: &str, pattern: &str, options: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + pattern.len() + 1 + options.len() + 1)?;
        self.append_key(ElementType::RegularExpression, key);
        self.push_cstr(pattern);
        self.push_cstr(options);
        Ok(())
    }

    /// Appends a JavaScript code element.
    pub fn append_javascript(&mut self, key: &str, code: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 4 + code.len() + 1)?;
        self.append_key(ElementType::JavaScriptCode, key);
        self.push_lenstr(code);
        Ok(())
    }

    /// Appends a code-with-scope element.
    pub fn append_javascript_with_scope(
        &mut self,
        key: &str,
        code: &str,
        scope: &RawDocument,
    ) -> Result<()> {
        let total = 4 + 4 + code.len() + 1 + scope.as_bytes().len();
        self.ensure_capacity(Self::key_overhead(key) + total)?;
        self.append_key(ElementType::JavaScriptCodeWithScope, key);
        self.data.extend_from_slice(&(total as i32).to_le_bytes());
        self.push_lenstr(code);
        self.data.extend_from_slice(scope.as_bytes());
        Ok(())
    }

    /// Appends a 32-bit integer element.
    pub fn append_i32(&mut self, key: &str, value: i32) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 4)?;
        self.append_key(ElementType::Int32, key);
        self.data.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Appends a timestamp element.
    pub fn append_timestamp(&mut self, key: &str, value: Timestamp) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 8)?;
        self.append_key(ElementType::Timestamp, key);
        self.data.extend_from_slice(&value.to_u64().to_le_bytes());
        Ok(())
    }

    /// Appends a 64-bit integer element.
    pub fn append_i64(&mut self, key: &str, value: i64) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 8)?;
        self.append_key(ElementType::Int64, key);
        self.data.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Appends a min-key element.
    pub fn append_min_key(&mut self, key: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key))?;
        self.append_key(ElementType::MinKey, key);
        Ok(())
    }

    /// Appends a max-key element.
    pub fn append_max_key(&mut self, key: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key))?;
        self.append_key(ElementType::MaxKey, key);
        Ok(())
    }

    fn append_undefined(&mut self, key: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key))?;
        self.append_key(ElementType::Undefined, key);
        Ok(())
    }

    fn append_symbol(&mut self, key: &str, value: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 4 + value.len() + 1)?;
        self.append_key(ElementType::Symbol, key);
        self.push_lenstr(value);
        Ok(())
    }

    fn append_db_pointer(&mut self, key: &str, value: &DbPointer) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 4 + value.namespace.len() + 1 + 12)?;
        self.append_key(ElementType::DbPointer, key);
        self.push_lenstr(&value.namespace);
        self.data.extend_from_slice(&value.id.bytes());
        Ok(())
    }

    /// Opens a nested document scope. Elements appended until the matching
    /// [`end_document`](Self::end_document) land inside it.
    pub fn begin_document(&mut self, key: &str) -> Result<()> {
        self.begin_scope(ElementType::EmbeddedDocument, key)
    }

    /// Opens a nested array scope. The caller appends elements under decimal-string index
    /// keys, or uses [`append_bson`](Self::append_bson) with an array value instead.
    pub fn begin_array(&mut self, key: &str) -> Result<()> {
        self.begin_scope(ElementType::Array, key)
    }

    fn begin_scope(&mut self, tag: ElementType, key: &str) -> Result<()> {
        self.ensure_capacity(Self::key_overhead(key) + 4)?;
        self.append_key(tag, key);
        self.open.push(self.data.len());
        self.data.extend_from_slice(&[0u8; 4]);
        Ok(())
    }

    /// Closes the innermost open scope: writes the terminator and patches the pending
    /// length prefix recorded when the scope was opened.
    pub fn end_document(&mut self) -> Result<()> {
        if self.open.len() <= 1 {
            return Err(Error::BuilderMisuse {
                message: "end_document with no open sub-document".to_string(),
            });
        }
        self.ensure_capacity(1)?;
        let offset = self.open.pop().expect("stack is non-empty");
        self.data.push(0);
        let len = (self.data.len() - offset) as i32;
        self.data[offset..offset + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Closes the innermost open array scope.
    pub fn end_array(&mut self) -> Result<()> {
        self.end_document()
    }

    /// Appends any [`Bson`] value under the given key.
    pub fn append_bson(&mut self, key: &str, value: &Bson) -> Result<()> {
        match value {
            Bson::Double(v) => self.append_f64(key, *v),
            Bson::String(v) => self.append_str(key, v),
            Bson::Document(doc) => {
                self.begin_document(key)?;
                for (k, v) in doc.iter() {
                    self.append_bson(k, v)?;
                }
                self.end_document()
            }
            Bson::Array(values) => {
                self.begin_array(key)?;
                let mut index_buf = itoa_buffer();
                for (i, v) in values.iter().enumerate() {
                    self.append_bson(write_index(&mut index_buf, i), v)?;
                }
                self.end_array()
            }
            Bson::Binary(b) => self.append_binary(key, b.subtype, &b.bytes),
            Bson::ObjectId(oid) => self.append_object_id(key, *oid),
            Bson::Boolean(v) => self.append_bool(key, *v),
            Bson::DateTime(v) => self.append_datetime(key, *v),
            Bson::Null => self.append_null(key),
            Bson::RegularExpression(r) => self.append_regex(key, &r.pattern, &r.options),
            Bson::JavaScriptCode(code) => self.append_javascript(key, code),
            Bson::JavaScriptCodeWithScope(cws) => {
                let scope = RawDocumentBuf::from_document(&cws.scope)?;
                self.append_javascript_with_scope(key, &cws.code, &scope)
            }
            Bson::Int32(v) => self.append_i32(key, *v),
            Bson::Timestamp(v) => self.append_timestamp(key, *v),
            Bson::Int64(v) => self.append_i64(key, *v),
            Bson::MinKey => self.append_min_key(key),
            Bson::MaxKey => self.append_max_key(key),
            Bson::Undefined => self.append_undefined(key),
            Bson::Symbol(v) => self.append_symbol(key, v),
            Bson::DbPointer(v) => self.append_db_pointer(key, v),
        }
    }

    /// Writes the root terminator, patches the outer length, and returns the read-only
    /// form. The accumulated validation bits travel with the returned document.
    pub fn finish(mut self) -> Result<RawDocumentBuf> {
        if self.poisoned {
            return Err(Error::TooLarge {
                len: self.data.len(),
                max: self.max_size,
            });
        }
        if self.open.len() != 1 {
            return Err(Error::BuilderMisuse {
                message: format!("finish with {} open sub-documents", self.open.len() - 1),
            });
        }
        self.data.push(0);
        let len = self.data.len() as i32;
        self.data[0..4].copy_from_slice(&len.to_le_bytes());
        Ok(RawDocumentBuf {
            data: self.data,
            validation: self.validation,
        })
    }
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Decimal array-index keys without a heap allocation per element.
fn itoa_buffer() -> [u8; 20] {
    [0u8; 20]
}

fn write_index(buf: &mut [u8; 20], mut i: usize) -> &str {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (i % 10) as u8;
        i /= 10;
        if i == 0 {
            break;
        }
    }
    std::str::from_utf8(&buf[pos..]).expect("digits are ASCII")
}

/// An owned, encoded BSON document.
#[derive(Clone, PartialEq)]
pub struct RawDocumentBuf {
    data: Vec<u8>,
    validation: ValidationBits,
}

impl RawDocumentBuf {
    /// An encoded empty document.
    pub fn empty() -> Self {
        Self {
            data: vec![5, 0, 0, 0, 0],
            validation: ValidationBits::empty(),
        }
    }

    /// Encodes a [`Document`] tree, capped at [`DEFAULT_MAX_BSON_OBJECT_SIZE`].
    pub fn from_document(doc: &Document) -> Result<Self> {
        Self::from_document_with_max_size(doc, DEFAULT_MAX_BSON_OBJECT_SIZE)
    }

    /// Encodes a [`Document`] tree with an explicit size cap.
    pub fn from_document_with_max_size(doc: &Document, max_size: usize) -> Result<Self> {
        let mut builder = DocumentBuilder::with_max_size(max_size);
        for (k, v) in doc.iter() {
            builder.append_bson(k, v)?;
        }
        builder.finish()
    }

    /// Takes ownership of already-encoded bytes, verifying the framing invariants (length
    /// prefix, minimum size, trailing NUL).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        RawDocument::from_bytes(&data)?;
        Ok(Self {
            data,
            validation: ValidationBits::empty(),
        })
    }

    /// The validation bits accumulated while this document was built. Empty for documents
    /// decoded from bytes.
    pub fn validation(&self) -> ValidationBits {
        self.validation
    }

    /// The encoded bytes, including length prefix and trailing NUL.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the document, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl std::ops::Deref for RawDocumentBuf {
    type Target = RawDocument;

    fn deref(&self) -> &RawDocument {
        // The bytes were validated on construction.
        RawDocument::from_bytes_unchecked(&self.data)
    }
}

impl fmt::Debug for RawDocumentBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RawDocumentBuf")
            .field("len", &self.data.len())
            .field("validation", &self.validation)
            .finish()
    }
}

/// A view into encoded BSON document bytes.
#[repr(transparent)]
pub struct RawDocument {
    data: [u8],
}

impl RawDocument {
    /// Reinterprets a byte slice as a document view, verifying the framing invariants.
    pub fn from_bytes(data: &[u8]) -> Result<&RawDocument> {
        if data.len() < MIN_BSON_DOCUMENT_SIZE {
            return Err(Error::malformed(format!(
                "document of {} bytes is below the minimum of {}",
                data.len(),
                MIN_BSON_DOCUMENT_SIZE
            )));
        }
        let length = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if length as usize != data.len() {
            return Err(Error::malformed(format!(
                "document length prefix {} does not match byte count {}",
                length,
                data.len()
            )));
        }
        if data[data.len() - 1] != 0 {
            return Err(Error::malformed("document missing trailing NUL"));
        }
        Ok(Self::from_bytes_unchecked(data))
    }

    fn from_bytes_unchecked(data: &[u8]) -> &RawDocument {
        // Safety: RawDocument is repr(transparent) over [u8].
        unsafe { &*(data as *const [u8] as *const RawDocument) }
    }

    /// The underlying encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// An iterator positioned before the first element.
    pub fn iter(&self) -> RawIter<'_> {
        RawIter::new(self)
    }

    /// Linearly scans for `key`, returning its value view if present.
    pub fn get(&self, key: &str) -> Result<Option<RawBsonRef<'_>>> {
        for element in self.iter() {
            let (k, v) = element?;
            if k == key {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    fn get_with<'a, T>(
        &'a self,
        key: &str,
        expected: ElementType,
        f: impl FnOnce(RawBsonRef<'a>) -> Option<T>,
    ) -> Result<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(val) => {
                let actual = val.element_type();
                match f(val) {
                    Some(v) => Ok(Some(v)),
                    None => Err(Error::TypeMismatch { expected, actual }),
                }
            }
        }
    }

    /// Gets a string value, failing with a type mismatch if the key holds another type.
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        self.get_with(key, ElementType::String, |v| v.as_str())
    }

    /// Gets an i32 value, failing with a type mismatch if the key holds another type.
    pub fn get_i32(&self, key: &str) -> Result<Option<i32>> {
        self.get_with(key, ElementType::Int32, |v| v.as_i32())
    }

    /// Gets an i64 value, failing with a type mismatch if the key holds another type.
    pub fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_with(key, ElementType::Int64, |v| v.as_i64())
    }

    /// Gets a boolean value, failing with a type mismatch if the key holds another type.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_with(key, ElementType::Boolean, |v| v.as_bool())
    }

    /// Gets an embedded document view, failing with a type mismatch if the key holds
    /// another type.
    pub fn get_document(&self, key: &str) -> Result<Option<&RawDocument>> {
        self.get_with(key, ElementType::EmbeddedDocument, |v| v.as_document())
    }

    /// Gets an ObjectId, failing with a type mismatch if the key holds another type.
    pub fn get_object_id(&self, key: &str) -> Result<Option<ObjectId>> {
        self.get_with(key, ElementType::ObjectId, |v| v.as_object_id())
    }

    /// Fully decodes these bytes into a [`Document`] tree.
    pub fn to_document(&self) -> Result<Document> {
        let mut doc = Document::new();
        for element in self.iter() {
            let (key, value) = element?;
            doc.insert(key, value.to_bson()?);
        }
        Ok(doc)
    }

    fn to_array(&self) -> Result<Vec<Bson>> {
        // Array documents carry decimal index keys; only the order is meaningful.
        let mut values = Vec::new();
        for element in self.iter() {
            let (_, value) = element?;
            values.push(value.to_bson()?);
        }
        Ok(values)
    }
}

impl fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RawDocument")
            .field("len", &self.data.len())
            .finish()
    }
}

impl PartialEq for RawDocument {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

/// A zero-copy view of a single BSON value inside encoded bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum RawBsonRef<'a> {
    /// 64-bit binary floating point
    Double(f64),
    /// UTF-8 string
    String(&'a str),
    /// Embedded document
    Document(&'a RawDocument),
    /// Array (a document with decimal index keys)
    Array(&'a RawDocument),
    /// Binary data
    Binary(BinarySubtype, &'a [u8]),
    /// ObjectId
    ObjectId(ObjectId),
    /// Boolean
    Boolean(bool),
    /// UTC datetime
    DateTime(DateTime),
    /// Null
    Null,
    /// Regular expression
    RegularExpression(&'a str, &'a str),
    /// JavaScript code
    JavaScriptCode(&'a str),
    /// JavaScript code with scope
    JavaScriptCodeWithScope(&'a str, &'a RawDocument),
    /// 32-bit integer
    Int32(i32),
    /// Timestamp
    Timestamp(Timestamp),
    /// 64-bit integer
    Int64(i64),
    /// Min key
    MinKey,
    /// Max key
    MaxKey,
    /// Deprecated undefined value
    Undefined,
    /// Deprecated symbol
    Symbol(&'a str),
    /// Deprecated DBPointer
    DbPointer(&'a str, ObjectId),
}

impl<'a> RawBsonRef<'a> {
    /// The wire tag of this value.
    pub fn element_type(&self) -> ElementType {
        match self {
            RawBsonRef::Double(..) => ElementType::Double,
            RawBsonRef::String(..) => ElementType::String,
            RawBsonRef::Document(..) => ElementType::EmbeddedDocument,
            RawBsonRef::Array(..) => ElementType::Array,
            RawBsonRef::Binary(..) => ElementType::Binary,
            RawBsonRef::ObjectId(..) => ElementType::ObjectId,
            RawBsonRef::Boolean(..) => ElementType::Boolean,
            RawBsonRef::DateTime(..) => ElementType::DateTime,
            RawBsonRef::Null => ElementType::Null,
            RawBsonRef::RegularExpression(..) => ElementType::RegularExpression,
            RawBsonRef::JavaScriptCode(..) => ElementType::JavaScriptCode,
            RawBsonRef::JavaScriptCodeWithScope(..) => ElementType::JavaScriptCodeWithScope,
            RawBsonRef::Int32(..) => ElementType::Int32,
            RawBsonRef::Timestamp(..) => ElementType::Timestamp,
            RawBsonRef::Int64(..) => ElementType::Int64,
            RawBsonRef::MinKey => ElementType::MinKey,
            RawBsonRef::MaxKey => ElementType::MaxKey,
            RawBsonRef::Undefined => ElementType::Undefined,
            RawBsonRef::Symbol(..) => ElementType::Symbol,
            RawBsonRef::DbPointer(..) => ElementType::DbPointer,
        }
    }

    /// If this is a string, return it.
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            RawBsonRef::String(v) => Some(v),
            _ => None,
        }
    }

    /// If this is an i32, return it.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            RawBsonRef::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// If this is an i64, return it.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawBsonRef::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// If this is a boolean, return it.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawBsonRef::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// If this is an embedded document, return the view.
    pub fn as_document(&self) -> Option<&'a RawDocument> {
        match self {
            RawBsonRef::Document(v) => Some(v),
            _ => None,
        }
    }

    /// If this is an array, return the underlying document view.
    pub fn as_array(&self) -> Option<&'a RawDocument> {
        match self {
            RawBsonRef::Array(v) => Some(v),
            _ => None,
        }
    }

    /// If this is an ObjectId, return it.
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            RawBsonRef::ObjectId(v) => Some(*v),
            _ => None,
        }
    }

    /// Decodes this view into an owned [`Bson`] value.
    pub fn to_bson(&self) -> Result<Bson> {
        Ok(match *self {
            RawBsonRef::Double(v) => Bson::Double(v),
            RawBsonRef::String(v) => Bson::String(v.to_string()),
            RawBsonRef::Document(v) => Bson::Document(v.to_document()?),
            RawBsonRef::Array(v) => Bson::Array(v.to_array()?),
            RawBsonRef::Binary(subtype, bytes) => Bson::Binary(Binary {
                subtype,
                bytes: bytes.to_vec(),
            }),
            RawBsonRef::ObjectId(v) => Bson::ObjectId(v),
            RawBsonRef::Boolean(v) => Bson::Boolean(v),
            RawBsonRef::DateTime(v) => Bson::DateTime(v),
            RawBsonRef::Null => Bson::Null,
            RawBsonRef::RegularExpression(pattern, options) => Bson::RegularExpression(Regex {
                pattern: pattern.to_string(),
                options: options.to_string(),
            }),
            RawBsonRef::JavaScriptCode(v) => Bson::JavaScriptCode(v.to_string()),
            RawBsonRef::JavaScriptCodeWithScope(code, scope) => {
                Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                    code: code.to_string(),
                    scope: scope.to_document()?,
                })
            }
            RawBsonRef::Int32(v) => Bson::Int32(v),
            RawBsonRef::Timestamp(v) => Bson::Timestamp(v),
            RawBsonRef::Int64(v) => Bson::Int64(v),
            RawBsonRef::MinKey => Bson::MinKey,
            RawBsonRef::MaxKey => Bson::MaxKey,
            RawBsonRef::Undefined => Bson::Undefined,
            RawBsonRef::Symbol(v) => Bson::Symbol(v.to_string()),
            RawBsonRef::DbPointer(namespace, id) => Bson::DbPointer(DbPointer {
                namespace: namespace.to_string(),
                id,
            }),
        })
    }
}

/// An iterator over the elements of an encoded document.
///
/// Positioned before the first element; each step yields `(key, value-view)` without
/// copying. All lookups by key are linear scans from the current position.
pub struct RawIter<'a> {
    doc: &'a RawDocument,
    offset: usize,
    done: bool,
}

impl<'a> RawIter<'a> {
    fn new(doc: &'a RawDocument) -> Self {
        Self {
            doc,
            offset: 4,
            done: false,
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.doc.as_bytes()
    }

    fn read_cstr(&mut self) -> Result<&'a str> {
        let bytes = self.bytes();
        let start = self.offset;
        let nul = bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::malformed("unterminated cstring"))?;
        let s = std::str::from_utf8(&bytes[start..start + nul]).map_err(|_| Error::NotUtf8)?;
        self.offset = start + nul + 1;
        Ok(s)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self.bytes();
        if self.offset + n > bytes.len() {
            return Err(Error::malformed("value extends past end of document"));
        }
        let out = &bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.read_bytes(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_lenstr(&mut self) -> Result<&'a str> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(Error::malformed("string with non-positive length"));
        }
        let bytes = self.read_bytes(len as usize)?;
        if bytes[bytes.len() - 1] != 0 {
            return Err(Error::malformed("string missing NUL terminator"));
        }
        std::str::from_utf8(&bytes[..bytes.len() - 1]).map_err(|_| Error::NotUtf8)
    }

    fn read_subdocument(&mut self, array: bool) -> Result<RawBsonRef<'a>> {
        let bytes = self.bytes();
        if self.offset + 4 > bytes.len() {
            return Err(Error::malformed("truncated sub-document length"));
        }
        let len = i32::from_le_bytes([
            bytes[self.offset],
            bytes[self.offset + 1],
            bytes[self.offset + 2],
            bytes[self.offset + 3],
        ]);
        if len < MIN_BSON_DOCUMENT_SIZE as i32 || self.offset + len as usize > bytes.len() {
            return Err(Error::malformed("sub-document length out of bounds"));
        }
        let sub = RawDocument::from_bytes(&bytes[self.offset..self.offset + len as usize])?;
        self.offset += len as usize;
        Ok(if array {
            RawBsonRef::Array(sub)
        } else {
            RawBsonRef::Document(sub)
        })
    }

    fn next_element(&mut self) -> Result<Option<(&'a str, RawBsonRef<'a>)>> {
        let bytes = self.bytes();
        if self.offset >= bytes.len() {
            return Err(Error::malformed("iterator ran past end of document"));
        }
        let tag_byte = bytes[self.offset];
        if tag_byte == 0 {
            if self.offset != bytes.len() - 1 {
                return Err(Error::malformed("terminator before end of document"));
            }
            return Ok(None);
        }
        self.offset += 1;
        let tag = ElementType::from_u8(tag_byte)
            .ok_or_else(|| Error::malformed(format!("unknown element tag {:#x}", tag_byte)))?;
        let key = self.read_cstr()?;

        let value = match tag {
            ElementType::Double => {
                let b = self.read_bytes(8)?;
                RawBsonRef::Double(f64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            }
            ElementType::String => RawBsonRef::String(self.read_lenstr()?),
            ElementType::EmbeddedDocument => self.read_subdocument(false)?,
            ElementType::Array => self.read_subdocument(true)?,
            ElementType::Binary => {
                let len = self.read_i32()?;
                if len < 0 {
                    return Err(Error::malformed("binary with negative length"));
                }
                let subtype = BinarySubtype::from(self.read_bytes(1)?[0]);
                let mut payload = self.read_bytes(len as usize)?;
                if matches!(subtype, BinarySubtype::BinaryOld) {
                    // Strip the deprecated redundant inner length.
                    if payload.len() < 4 {
                        return Err(Error::malformed("old binary missing inner length"));
                    }
                    payload = &payload[4..];
                }
                RawBsonRef::Binary(subtype, payload)
            }
            ElementType::Undefined => RawBsonRef::Undefined,
            ElementType::ObjectId => {
                let b = self.read_bytes(12)?;
                let mut id = [0u8; 12];
                id.copy_from_slice(b);
                RawBsonRef::ObjectId(ObjectId::from_bytes(id))
            }
            ElementType::Boolean => match self.read_bytes(1)?[0] {
                0 => RawBsonRef::Boolean(false),
                1 => RawBsonRef::Boolean(true),
                other => {
                    return Err(Error::malformed(format!("invalid boolean byte {}", other)))
                }
            },
            ElementType::DateTime => RawBsonRef::DateTime(DateTime::from_millis(self.read_i64()?)),
            ElementType::Null => RawBsonRef::Null,
            ElementType::RegularExpression => {
                let pattern = self.read_cstr()?;
                let options = self.read_cstr()?;
                RawBsonRef::RegularExpression(pattern, options)
            }
            ElementType::DbPointer => {
                let namespace = self.read_lenstr()?;
                let b = self.read_bytes(12)?;
                let mut id = [0u8; 12];
                id.copy_from_slice(b);
                RawBsonRef::DbPointer(namespace, ObjectId::from_bytes(id))
            }
            ElementType::JavaScriptCode => RawBsonRef::JavaScriptCode(self.read_lenstr()?),
            ElementType::Symbol => RawBsonRef::Symbol(self.read_lenstr()?),
            ElementType::JavaScriptCodeWithScope => {
                let total = self.read_i32()?;
                if total < 4 + MIN_BSON_DOCUMENT_SIZE as i32 + 5 {
                    return Err(Error::malformed("code-with-scope too short"));
                }
                let value_start = self.offset;
                let code = self.read_lenstr()?;
                let scope = match self.read_subdocument(false)? {
                    RawBsonRef::Document(doc) => doc,
                    _ => unreachable!(),
                };
                if self.offset - value_start != total as usize - 4 {
                    return Err(Error::malformed("code-with-scope length mismatch"));
                }
                RawBsonRef::JavaScriptCodeWithScope(code, scope)
            }
            ElementType::Int32 => RawBsonRef::Int32(self.read_i32()?),
            ElementType::Timestamp => {
                RawBsonRef::Timestamp(Timestamp::from_u64(self.read_i64()? as u64))
            }
            ElementType::Int64 => RawBsonRef::Int64(self.read_i64()?),
            ElementType::MaxKey => RawBsonRef::MaxKey,
            ElementType::MinKey => RawBsonRef::MinKey,
        };

        Ok(Some((key, value)))
    }
}

impl<'a> Iterator for RawIter<'a> {
    type Item = Result<(&'a str, RawBsonRef<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::doc;

    use super::*;

    // Scenario: {"hello": "world"} has a fixed, spec-mandated encoding.
    #[test]
    fn hello_world_canonical_bytes() {
        let raw = RawDocumentBuf::from_document(&doc! { "hello": "world" }).unwrap();
        let expected = [
            0x16, 0x00, 0x00, 0x00, 0x02, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x00, 0x06, 0x00, 0x00,
            0x00, 0x77, 0x6f, 0x72, 0x6c, 0x64, 0x00, 0x00,
        ];
        assert_eq!(raw.as_bytes(), expected);
    }

    #[test]
    fn length_prefix_matches_byte_count() {
        let raw = RawDocumentBuf::from_document(&doc! {
            "a": 1,
            "b": "two",
            "c": doc! { "nested": true },
        })
        .unwrap();
        let bytes = raw.as_bytes();
        let prefix = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(prefix as usize, bytes.len());
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn int32_is_little_endian_on_the_wire() {
        let raw = RawDocumentBuf::from_document(&doc! { "a": 0x01020304 }).unwrap();
        // tag, 'a', NUL, then the LE value bytes.
        assert_eq!(&raw.as_bytes()[4..7], &[0x10, b'a', 0x00]);
        assert_eq!(&raw.as_bytes()[7..11], &[0x04, 0x03, 0x02, 0x01]);
    }

    fn kitchen_sink() -> Document {
        let mut doc = Document::new();
        doc.insert("double", 3.5f64);
        doc.insert("string", "value");
        doc.insert("doc", doc! { "inner": 1 });
        doc.insert("array", vec![1, 2, 3]);
        doc.insert(
            "binary",
            Binary {
                subtype: BinarySubtype::Generic,
                bytes: vec![1, 2, 3, 4],
            },
        );
        doc.insert("oid", ObjectId::parse_str("0102030405060708090a0b0c").unwrap());
        doc.insert("bool", true);
        doc.insert("date", DateTime::from_millis(1_500_000_000_000));
        doc.insert("null", Bson::Null);
        doc.insert(
            "regex",
            Regex {
                pattern: "^a.*z$".to_string(),
                options: "i".to_string(),
            },
        );
        doc.insert("code", Bson::JavaScriptCode("function() {}".to_string()));
        doc.insert(
            "code_w_s",
            Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                code: "function() { return x; }".to_string(),
                scope: doc! { "x": 42 },
            }),
        );
        doc.insert("int32", 17i32);
        doc.insert(
            "timestamp",
            Timestamp {
                time: 1_500_000_000,
                increment: 9,
            },
        );
        doc.insert("int64", 17_000_000_000i64);
        doc.insert("min", Bson::MinKey);
        doc.insert("max", Bson::MaxKey);
        doc
    }

    #[test]
    fn round_trip_is_element_wise_equal_and_byte_identical() {
        let doc = kitchen_sink();
        let raw = RawDocumentBuf::from_document(&doc).unwrap();
        let decoded = raw.to_document().unwrap();
        assert_eq!(decoded, doc);

        let reencoded = RawDocumentBuf::from_document(&decoded).unwrap();
        assert_eq!(reencoded.as_bytes(), raw.as_bytes());
    }

    #[test]
    fn streaming_builder_matches_tree_encoding() {
        let mut builder = DocumentBuilder::new();
        builder.append_i32("a", 1).unwrap();
        builder.begin_document("sub").unwrap();
        builder.append_str("s", "x").unwrap();
        builder.begin_array("arr").unwrap();
        builder.append_i32("0", 1).unwrap();
        builder.append_i32("1", 2).unwrap();
        builder.end_array().unwrap();
        builder.end_document().unwrap();
        builder.append_bool("b", false).unwrap();
        let raw = builder.finish().unwrap();

        let tree = doc! {
            "a": 1,
            "sub": doc! { "s": "x", "arr": vec![1, 2] },
            "b": false,
        };
        assert_eq!(
            raw.as_bytes(),
            RawDocumentBuf::from_document(&tree).unwrap().as_bytes()
        );
    }

    #[test]
    fn validation_bits_warn_but_do_not_fail() {
        let mut builder = DocumentBuilder::new();
        builder.append_i32("a.b", 1).unwrap();
        builder.append_i32("$set", 2).unwrap();
        let raw = builder.finish().unwrap();
        assert!(raw.validation().contains(ValidationBits::DOT_IN_KEY));
        assert!(raw.validation().contains(ValidationBits::DOLLAR_INIT_KEY));
        assert!(!raw.validation().contains(ValidationBits::NOT_UTF8));
    }

    #[test]
    fn dollar_and_dot_only_checked_at_top_level() {
        let raw =
            RawDocumentBuf::from_document(&doc! { "filter": doc! { "$gt": 3, "a.b": 1 } }).unwrap();
        assert_eq!(raw.validation(), ValidationBits::empty());
    }

    #[test]
    fn oversized_append_poisons_the_builder() {
        let mut builder = DocumentBuilder::with_max_size(64);
        builder.append_i32("fits", 1).unwrap();
        let err = builder.append_str("big", &"x".repeat(100)).unwrap_err();
        assert!(matches!(err, Error::TooLarge { .. }));

        // Poisoned: even a tiny append now fails, and so does finish.
        assert!(matches!(
            builder.append_i32("tiny", 1),
            Err(Error::TooLarge { .. })
        ));
        assert!(matches!(builder.finish(), Err(Error::TooLarge { .. })));
    }

    #[test]
    fn typed_accessor_mismatch() {
        let raw = RawDocumentBuf::from_document(&doc! { "n": 5 }).unwrap();
        assert_eq!(raw.get_i32("n").unwrap(), Some(5));
        assert_eq!(raw.get_i32("missing").unwrap(), None);
        let err = raw.get_str("n").unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: ElementType::String,
                actual: ElementType::Int32,
            }
        ));
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let raw = RawDocumentBuf::from_document(&doc! { "a": 1 }).unwrap();
        let mut bytes = raw.as_bytes().to_vec();
        bytes.truncate(bytes.len() - 2);
        assert!(RawDocument::from_bytes(&bytes).is_err());

        // A lying length prefix is also rejected.
        let mut bytes = raw.as_bytes().to_vec();
        bytes[0] = bytes[0].wrapping_add(1);
        assert!(RawDocument::from_bytes(&bytes).is_err());
    }

    #[test]
    fn nested_iteration_does_not_copy() {
        let raw = RawDocumentBuf::from_document(&doc! { "outer": doc! { "inner": 7 } }).unwrap();
        let outer = raw.get_document("outer").unwrap().unwrap();
        assert_eq!(outer.get_i32("inner").unwrap(), Some(7));
        // The child view aliases the parent buffer.
        let parent_range = raw.as_bytes().as_ptr_range();
        assert!(parent_range.contains(&outer.as_bytes().as_ptr()));
    }

    #[test]
    fn unclosed_subdocument_fails_finish() {
        let mut builder = DocumentBuilder::new();
        builder.begin_document("open").unwrap();
        assert!(matches!(
            builder.finish(),
            Err(Error::BuilderMisuse { .. })
        ));
    }

    #[test]
    fn array_indices_are_decimal_strings_from_zero() {
        let raw = RawDocumentBuf::from_document(&doc! { "a": vec!["x", "y"] }).unwrap();
        let arr = match raw.get("a").unwrap().unwrap() {
            RawBsonRef::Array(arr) => arr,
            other => panic!("expected array, got {:?}", other),
        };
        let keys: Vec<_> = arr
            .iter()
            .map(|e| e.unwrap().0.to_string())
            .collect();
        assert_eq!(keys, vec!["0", "1"]);
    }
}
