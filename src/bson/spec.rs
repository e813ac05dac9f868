//! Constants derived from the BSON specification.

/// The one-byte wire tag identifying the type of a BSON element.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ElementType {
    /// 64-bit binary floating point
    Double = 0x01,
    /// UTF-8 string
    String = 0x02,
    /// Embedded document
    EmbeddedDocument = 0x03,
    /// Array
    Array = 0x04,
    /// Binary data
    Binary = 0x05,
    /// Deprecated. Undefined (value)
    Undefined = 0x06,
    /// ObjectId
    ObjectId = 0x07,
    /// Boolean value
    Boolean = 0x08,
    /// UTC datetime
    DateTime = 0x09,
    /// Null value
    Null = 0x0A,
    /// Regular expression
    RegularExpression = 0x0B,
    /// Deprecated. DBPointer
    DbPointer = 0x0C,
    /// JavaScript code
    JavaScriptCode = 0x0D,
    /// Deprecated. Symbol
    Symbol = 0x0E,
    /// JavaScript code with scope
    JavaScriptCodeWithScope = 0x0F,
    /// 32-bit integer
    Int32 = 0x10,
    /// Timestamp
    Timestamp = 0x11,
    /// 64-bit integer
    Int64 = 0x12,
    /// Max key
    MaxKey = 0x7F,
    /// Min key
    MinKey = 0xFF,
}

impl ElementType {
    /// Attempt to convert from a byte as found on the wire.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => ElementType::Double,
            0x02 => ElementType::String,
            0x03 => ElementType::EmbeddedDocument,
            0x04 => ElementType::Array,
            0x05 => ElementType::Binary,
            0x06 => ElementType::Undefined,
            0x07 => ElementType::ObjectId,
            0x08 => ElementType::Boolean,
            0x09 => ElementType::DateTime,
            0x0A => ElementType::Null,
            0x0B => ElementType::RegularExpression,
            0x0C => ElementType::DbPointer,
            0x0D => ElementType::JavaScriptCode,
            0x0E => ElementType::Symbol,
            0x0F => ElementType::JavaScriptCodeWithScope,
            0x10 => ElementType::Int32,
            0x11 => ElementType::Timestamp,
            0x12 => ElementType::Int64,
            0x7F => ElementType::MaxKey,
            0xFF => ElementType::MinKey,
            _ => return None,
        })
    }
}

/// The subtype byte carried by binary elements.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum BinarySubtype {
    /// Generic binary subtype
    Generic,
    /// Function
    Function,
    /// Binary (Old)
    BinaryOld,
    /// UUID (Old)
    UuidOld,
    /// UUID
    Uuid,
    /// MD5
    Md5,
    /// User defined
    UserDefined(u8),
    /// Reserved
    Reserved(u8),
}

impl From<u8> for BinarySubtype {
    fn from(t: u8) -> BinarySubtype {
        match t {
            0x00 => BinarySubtype::Generic,
            0x01 => BinarySubtype::Function,
            0x02 => BinarySubtype::BinaryOld,
            0x03 => BinarySubtype::UuidOld,
            0x04 => BinarySubtype::Uuid,
            0x05 => BinarySubtype::Md5,
            0x80..=0xFF => BinarySubtype::UserDefined(t),
            _ => BinarySubtype::Reserved(t),
        }
    }
}

impl From<BinarySubtype> for u8 {
    fn from(t: BinarySubtype) -> u8 {
        match t {
            BinarySubtype::Generic => 0x00,
            BinarySubtype::Function => 0x01,
            BinarySubtype::BinaryOld => 0x02,
            BinarySubtype::UuidOld => 0x03,
            BinarySubtype::Uuid => 0x04,
            BinarySubtype::Md5 => 0x05,
            BinarySubtype::UserDefined(t) => t,
            BinarySubtype::Reserved(t) => t,
        }
    }
}
