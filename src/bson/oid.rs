//! Module containing functionality related to BSON ObjectIds.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU32, Ordering},
    sync::OnceLock,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use thiserror::Error;

const TIMESTAMP_SIZE: usize = 4;
const MACHINE_ID_SIZE: usize = 3;
const PROCESS_ID_SIZE: usize = 2;
const COUNTER_SIZE: usize = 3;

const TIMESTAMP_OFFSET: usize = 0;
const MACHINE_ID_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_SIZE;
const PROCESS_ID_OFFSET: usize = MACHINE_ID_OFFSET + MACHINE_ID_SIZE;
const COUNTER_OFFSET: usize = PROCESS_ID_OFFSET + PROCESS_ID_SIZE;

/// Errors that can occur during `ObjectId` construction and parsing.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An invalid character was found in the provided hex string.
    #[error("invalid character in object id hex string: {hex}")]
    #[non_exhaustive]
    InvalidHexStringCharacter { hex: String },

    /// An `ObjectId`'s hex string representation must be 24 characters.
    #[error("object id hex string has length {length}, expected 24")]
    #[non_exhaustive]
    InvalidHexStringLength { length: usize },
}

/// A wrapper around a raw 12-byte ObjectId.
///
/// Generated ids are unique without coordination: a 4-byte big-endian seconds timestamp,
/// a 3-byte machine id, a 2-byte process id, and a 3-byte big-endian counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId {
    id: [u8; 12],
}

impl ObjectId {
    /// Generates a new ObjectId from the current timestamp, this process's identity, and the
    /// process-wide monotonic counter.
    ///
    /// The counter wraps at 2^24; uniqueness across the wrap is preserved by the changing
    /// timestamp prefix.
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let counter = counter().fetch_add(1, Ordering::SeqCst) & 0x00FF_FFFF;
        let machine_id = machine_id();
        let process_id = std::process::id() as u16;

        let mut id = [0u8; 12];
        id[TIMESTAMP_OFFSET..MACHINE_ID_OFFSET].copy_from_slice(&timestamp.to_be_bytes());
        id[MACHINE_ID_OFFSET..PROCESS_ID_OFFSET].copy_from_slice(&machine_id);
        id[PROCESS_ID_OFFSET..COUNTER_OFFSET].copy_from_slice(&process_id.to_le_bytes());
        id[COUNTER_OFFSET..].copy_from_slice(&counter.to_be_bytes()[1..]);

        Self { id }
    }

    /// Constructs an ObjectId from its raw byte representation.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self { id: bytes }
    }

    /// The raw 12 bytes of this ObjectId.
    pub const fn bytes(&self) -> [u8; 12] {
        self.id
    }

    /// The generation time of this ObjectId in seconds since the Unix epoch.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.id[0], self.id[1], self.id[2], self.id[3]])
    }

    /// Converts this ObjectId to its 24-character lowercase hex representation.
    pub fn to_hex(self) -> String {
        hex::encode(self.id)
    }

    /// Parses a 24-character hex string into an ObjectId.
    pub fn parse_str(s: impl AsRef<str>) -> std::result::Result<Self, Error> {
        let s = s.as_ref();
        if s.len() != 24 {
            return Err(Error::InvalidHexStringLength { length: s.len() });
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHexStringCharacter {
            hex: s.to_string(),
        })?;
        let mut id = [0u8; 12];
        id.copy_from_slice(&bytes);
        Ok(Self { id })
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&self.to_hex()).finish()
    }
}

fn counter() -> &'static AtomicU32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER.get_or_init(|| AtomicU32::new(SmallRng::from_os_rng().random()))
}

/// Derived once per process by hashing the host name; falls back to random bytes when no
/// host name is available.
fn machine_id() -> [u8; MACHINE_ID_SIZE] {
    static MACHINE_ID: OnceLock<[u8; MACHINE_ID_SIZE]> = OnceLock::new();
    *MACHINE_ID.get_or_init(|| {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok();
        let hash = match hostname {
            Some(name) if !name.is_empty() => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                Hash::hash(&name, &mut hasher);
                hasher.finish()
            }
            _ => SmallRng::from_os_rng().random(),
        };
        let bytes = hash.to_be_bytes();
        [bytes[0], bytes[1], bytes[2]]
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let oid = ObjectId::new();
        let hex = oid.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(ObjectId::parse_str(&hex).unwrap(), oid);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            ObjectId::parse_str("deadbeef"),
            Err(Error::InvalidHexStringLength { length: 8 })
        ));
        assert!(matches!(
            ObjectId::parse_str("zzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(Error::InvalidHexStringCharacter { .. })
        ));
    }

    #[test]
    fn generated_ids_are_distinct_and_ordered_within_a_second() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        // Prefixes through the process id match when generated back to back.
        assert_eq!(a.bytes()[4..9], b.bytes()[4..9]);
    }

    #[test]
    fn timestamp_is_big_endian_prefix() {
        let oid = ObjectId::from_bytes([0x01, 0x02, 0x03, 0x04, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(oid.timestamp(), 0x0102_0304);
    }
}
