//! Contains the `Error` and `Result` types that `mongodb_core` uses.

use std::{
    collections::HashSet,
    fmt::{self, Debug},
    sync::Arc,
};

use thiserror::Error;

use crate::bson::{Bson, Document};

const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const SHUTTING_DOWN_CODES: [i32; 2] = [11600, 91];
const RETRYABLE_READ_CODES: [i32; 13] = [
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 134, 262,
];
const RETRYABLE_WRITE_CODES: [i32; 12] = [
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 262,
];

/// The legacy server codes that all mean "duplicate key". Servers predating
/// the write commands reported duplicates under several different codes
/// depending on version and whether the write went through a mongos.
const DUPLICATE_KEY_CODES: [i32; 4] = [11000, 11001, 12582, 16460];

/// Server codes indicating that the command is not recognized.
const COMMAND_NOT_FOUND_CODES: [i32; 2] = [59, 13390];

/// Retryable write error label. This label will be added to an error when the error is
/// write-retryable.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";

/// The result type for all methods that can return an error in the `mongodb_core` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongodb_core` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is boxed to keep the type small, and errors are
/// cloneable so that topology state can hold onto them.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
    labels: HashSet<String>,
    pub(crate) wire_version: Option<i32>,
    #[source]
    pub(crate) source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let Some(wc) = kind.get_write_concern_error() {
            labels.extend(wc.labels.clone());
        }
        Self {
            kind: Box::new(kind),
            labels,
            wire_version: None,
            source: None,
        }
    }

    /// Creates an `Authentication` error for the given mechanism with the provided reason.
    pub(crate) fn authentication_error(mechanism_name: &str, reason: &str) -> Self {
        ErrorKind::Authentication {
            message: format!("{} failure: {}", mechanism_name, reason),
        }
        .into()
    }

    /// Creates an `Authentication` error for the given mechanism when the server response is
    /// invalid.
    pub(crate) fn invalid_authentication_response(mechanism_name: &str) -> Error {
        Error::authentication_error(mechanism_name, "invalid server response")
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    /// Construct a generic network timeout error.
    pub(crate) fn network_timeout() -> Error {
        ErrorKind::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "operation timed out",
        )))
        .into()
    }

    /// A zero-byte read after a successful send.
    pub(crate) fn unexpected_eof() -> Error {
        ErrorKind::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "unexpected EOF from server",
        )))
        .into()
    }

    pub(crate) fn is_state_change_error(&self) -> bool {
        self.is_recovering() || self.is_notwritableprimary()
    }

    pub(crate) fn is_auth_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Authentication { .. })
    }

    pub(crate) fn is_network_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(..) | ErrorKind::ConnectionBroken { .. }
        )
    }

    pub(crate) fn is_network_timeout(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::TimedOut)
    }

    pub(crate) fn is_server_selection_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::NoSuitableServer { .. } | ErrorKind::ServerSelectionTimeout { .. }
        )
    }

    /// Whether a read operation should be retried if this error occurs.
    pub(crate) fn is_read_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        match self.sdam_code() {
            Some(code) => RETRYABLE_READ_CODES.contains(&code),
            None => false,
        }
    }

    pub(crate) fn is_write_retryable(&self) -> bool {
        self.contains_label(RETRYABLE_WRITE_ERROR)
    }

    /// Whether a "RetryableWriteError" label should be added to this error. If max_wire_version
    /// indicates a 4.4+ server, a label should only be added if the error is a network error.
    /// Otherwise, a label should be added if the error is a network error or the error code
    /// matches one of the retryable write codes.
    pub(crate) fn should_add_retryable_write_label(&self, max_wire_version: i32) -> bool {
        if max_wire_version > 8 {
            return self.is_network_error();
        }
        if self.is_network_error() {
            return true;
        }
        match &self.sdam_code() {
            Some(code) => RETRYABLE_WRITE_CODES.contains(code),
            None => false,
        }
    }

    /// Whether this error was produced by the server rejecting a duplicate `_id` or unique
    /// index entry. The legacy numeric codes are canonicalized here.
    pub fn is_duplicate_key(&self) -> bool {
        match self.kind.as_ref() {
            ErrorKind::DuplicateKey(_) => true,
            ErrorKind::Write(WriteFailure::WriteError(ref e)) => {
                DUPLICATE_KEY_CODES.contains(&e.code)
            }
            ErrorKind::BulkWrite(ref failure) => failure
                .write_errors
                .iter()
                .any(|e| DUPLICATE_KEY_CODES.contains(&e.code)),
            _ => false,
        }
    }

    /// Whether the server rejected the command as unrecognized.
    pub fn is_command_not_found(&self) -> bool {
        match self.kind.as_ref() {
            ErrorKind::Command(ref e) => {
                COMMAND_NOT_FOUND_CODES.contains(&e.code)
                    || e.message.starts_with("no such cmd")
                    || e.message.starts_with("no such command")
            }
            _ => false,
        }
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        self.labels().contains(label.as_ref())
    }

    /// Adds the given label to this error.
    pub(crate) fn add_label<T: AsRef<str>>(&mut self, label: T) {
        let label = label.as_ref().to_string();
        self.labels.insert(label);
    }

    /// Gets the code from this error for performing SDAM updates, if applicable.
    /// Any codes contained in WriteErrors are ignored.
    pub(crate) fn sdam_code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.code),
            // Per the SDAM spec, write concern error codes MUST also be checked, and
            // writeError codes MUST NOT be checked.
            ErrorKind::BulkWrite(failure) => {
                failure.write_concern_errors.first().map(|wce| wce.code)
            }
            ErrorKind::Write(WriteFailure::WriteConcernError(wc_error)) => Some(wc_error.code),
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.sdam_code()))
    }

    /// If this error corresponds to a "not writable primary" error as per the SDAM spec.
    pub(crate) fn is_notwritableprimary(&self) -> bool {
        self.sdam_code()
            .map(|code| NOTWRITABLEPRIMARY_CODES.contains(&code))
            .unwrap_or(false)
            || self.legacy_not_master_message()
    }

    /// If this error corresponds to a "node is recovering" error as per the SDAM spec.
    pub(crate) fn is_recovering(&self) -> bool {
        self.sdam_code()
            .map(|code| RECOVERING_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// If this error corresponds to a "node is shutting down" error as per the SDAM spec.
    #[allow(unused)]
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.sdam_code()
            .map(|code| SHUTTING_DOWN_CODES.contains(&code))
            .unwrap_or(false)
    }

    // Servers predating error codes report "not master" only through errmsg.
    fn legacy_not_master_message(&self) -> bool {
        match self.kind.as_ref() {
            ErrorKind::Command(ref e) => {
                e.message.contains("not master") || e.message.contains("node is recovering")
            }
            _ => false,
        }
    }

    pub(crate) fn with_source<E: Into<Option<Error>>>(mut self, source: E) -> Self {
        self.source = source.into().map(Box::new);
        self
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<crate::bson::raw::Error> for ErrorKind {
    fn from(err: crate::bson::raw::Error) -> Self {
        Self::Bson(err)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// An error occurred while attempting to authenticate a connection.
    #[error("{message}")]
    #[non_exhaustive]
    Authentication { message: String },

    /// An error occurred while building or reading a BSON document.
    #[error("{0}")]
    Bson(crate::bson::raw::Error),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// An insert or update violated a unique index. The legacy numeric codes
    /// (11000, 11001, 12582, 16460) are all canonicalized to this variant.
    #[error("Duplicate key: {0:?}")]
    DuplicateKey(WriteError),

    /// An error occurred when trying to execute a write operation consisting of multiple writes.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    BulkWrite(BulkWriteFailure),

    /// An error occurred when trying to execute a write operation.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    Write(WriteFailure),

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// An operation was attempted on a connection that previously hit a network error and has
    /// not been re-established.
    #[error("{message}")]
    #[non_exhaustive]
    ConnectionBroken { message: String },

    /// The server sent a malformed reply: a frame outside the size bounds, a truncated body,
    /// an unknown opcode, or a reply whose `responseTo` does not match the request in flight.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// No server in the current topology matched the selection criteria.
    #[error("{message}")]
    #[non_exhaustive]
    NoSuitableServer { message: String },

    /// Server selection retried up to its deadline without finding a suitable server.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelectionTimeout { message: String },

    /// A cursor entered the error state; subsequent advances return the same error.
    #[error("{message}")]
    #[non_exhaustive]
    Cursor { message: String },

    /// The server does not support the operation.
    #[error("The server does not support a database operation: {message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },
}

impl ErrorKind {
    fn get_write_concern_error(&self) -> Option<&WriteConcernError> {
        match self {
            ErrorKind::BulkWrite(BulkWriteFailure {
                write_concern_errors,
                ..
            }) => write_concern_errors.first(),
            ErrorKind::Write(WriteFailure::WriteConcernError(err)) => Some(err),
            _ => None,
        }
    }
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    pub code_name: String,

    /// A description of the error that occurred.
    pub message: String,
}

impl CommandError {
    pub(crate) fn from_document(doc: &Document) -> Self {
        Self {
            code: doc.get_i32("code").unwrap_or(0),
            code_name: doc.get_str("codeName").unwrap_or_default().to_string(),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    pub code_name: String,

    /// A description of the error that occurred.
    pub message: String,

    /// A document identifying the write concern setting related to the error.
    pub details: Option<Document>,

    /// Labels categorizing the error.
    pub(crate) labels: Vec<String>,
}

impl WriteConcernError {
    pub(crate) fn from_document(doc: &Document) -> Self {
        Self {
            code: doc.get_i32("code").unwrap_or(0),
            code_name: doc.get_str("codeName").unwrap_or_default().to_string(),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
            details: doc.get_document("errInfo").cloned(),
            labels: doc
                .get_array("errorLabels")
                .map(|arr| {
                    arr.iter()
                        .filter_map(Bson::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// An error that occurred during a write operation that wasn't due to being unable to satisfy
/// a write concern.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct WriteError {
    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    ///
    /// Note that the server will not return this in some cases, hence `code_name` being an
    /// `Option`.
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    pub message: String,

    /// A document providing more information about the write error (e.g. details
    /// pertaining to document validation).
    pub details: Option<Document>,
}

impl WriteError {
    pub(crate) fn is_duplicate_key(&self) -> bool {
        DUPLICATE_KEY_CODES.contains(&self.code)
    }
}

/// An error that occurred during a write operation consisting of multiple writes that wasn't
/// due to being unable to satisfy a write concern.
#[derive(Debug, PartialEq, Clone)]
#[non_exhaustive]
pub struct BulkWriteError {
    /// Index into the caller's list of operations that this error corresponds to. Server
    /// replies report indexes relative to the batch; the write coordinator re-bases them
    /// before surfacing.
    pub index: usize,

    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    pub message: String,

    /// A document providing more information about the write error.
    pub details: Option<Document>,
}

impl BulkWriteError {
    pub(crate) fn from_document(doc: &Document) -> Self {
        Self {
            index: doc.get_i32("index").unwrap_or(0).max(0) as usize,
            code: doc.get_i32("code").unwrap_or(0),
            code_name: doc.get_str("codeName").map(String::from),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
            details: doc.get_document("errInfo").cloned(),
        }
    }

    pub(crate) fn into_write_error(self) -> WriteError {
        WriteError {
            code: self.code,
            code_name: self.code_name,
            message: self.message,
            details: self.details,
        }
    }
}

/// The set of errors that occurred during a write operation.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct BulkWriteFailure {
    /// The error(s) that occurred on account of a non write concern failure.
    pub write_errors: Vec<BulkWriteError>,

    /// The error(s) that occurred on account of write concern failure.
    pub write_concern_errors: Vec<WriteConcernError>,
}

impl BulkWriteFailure {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.write_errors.is_empty() && self.write_concern_errors.is_empty()
    }
}

/// An error that occurred when trying to execute a write operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteFailure {
    /// An error that occurred due to not being able to satisfy a write concern.
    WriteConcernError(WriteConcernError),

    /// An error that occurred during a write operation that wasn't due to being unable to
    /// satisfy a write concern.
    WriteError(WriteError),
}

impl WriteFailure {
    fn from_bulk_failure(bulk: BulkWriteFailure) -> Result<ErrorKind> {
        if let Some(bulk_write_error) = bulk.write_errors.into_iter().next() {
            let write_error = bulk_write_error.into_write_error();
            if write_error.is_duplicate_key() {
                Ok(ErrorKind::DuplicateKey(write_error))
            } else {
                Ok(ErrorKind::Write(WriteFailure::WriteError(write_error)))
            }
        } else if let Some(wc_error) = bulk.write_concern_errors.into_iter().next() {
            Ok(ErrorKind::Write(WriteFailure::WriteConcernError(wc_error)))
        } else {
            Err(ErrorKind::InvalidResponse {
                message: "error missing write errors and write concern errors".to_string(),
            }
            .into())
        }
    }
}

/// Translates ErrorKind::BulkWrite cases to single-write error kinds, leaving all other errors
/// untouched. Used by the non-bulk entry points (`insert_one`, `update_one`, ...).
pub(crate) fn convert_bulk_errors(error: Error) -> Error {
    match *error.kind {
        ErrorKind::BulkWrite(bulk_failure) => {
            match WriteFailure::from_bulk_failure(bulk_failure) {
                Ok(kind) => Error::new(kind, Some(error.labels)),
                Err(e) => e,
            }
        }
        _ => error,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bulk_failure_with_code(code: i32) -> Error {
        ErrorKind::BulkWrite(BulkWriteFailure {
            write_errors: vec![BulkWriteError {
                index: 0,
                code,
                code_name: None,
                message: "dup".to_string(),
                details: None,
            }],
            write_concern_errors: vec![],
        })
        .into()
    }

    #[test]
    fn legacy_duplicate_key_codes_canonicalize() {
        for code in [11000, 11001, 12582, 16460] {
            let err = convert_bulk_errors(bulk_failure_with_code(code));
            assert!(
                matches!(err.kind.as_ref(), ErrorKind::DuplicateKey(_)),
                "code {} should canonicalize to DuplicateKey",
                code
            );
            assert!(err.is_duplicate_key());
        }

        let err = convert_bulk_errors(bulk_failure_with_code(121));
        assert!(matches!(
            err.kind.as_ref(),
            ErrorKind::Write(WriteFailure::WriteError(_))
        ));
        assert!(!err.is_duplicate_key());
    }

    #[test]
    fn command_not_found_detection() {
        let err: Error = ErrorKind::Command(CommandError {
            code: 59,
            code_name: "CommandNotFound".to_string(),
            message: "no such command: 'florble'".to_string(),
        })
        .into();
        assert!(err.is_command_not_found());

        let err: Error = ErrorKind::Command(CommandError {
            code: 13390,
            code_name: String::new(),
            message: String::new(),
        })
        .into();
        assert!(err.is_command_not_found());
    }

    #[test]
    fn not_master_marks_state_change() {
        let err: Error = ErrorKind::Command(CommandError {
            code: 10107,
            code_name: "NotWritablePrimary".to_string(),
            message: "not master".to_string(),
        })
        .into();
        assert!(err.is_state_change_error());
    }
}
