use crate::{
    bson::{Bson, Document},
    error::{ErrorKind, Result},
};

/// Coerces a numeric BSON value to an i64, the way command replies are interpreted: servers
/// report counters variously as doubles, i32s, or i64s.
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(i) => Some(i as i64),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
        _ => None,
    }
}

/// The number of bytes an array entry occupies beyond its document: the tag byte, the
/// decimal index key, and the key's NUL.
pub(crate) fn array_entry_size_bytes(index: usize, doc_len: usize) -> usize {
    let index_digits = if index == 0 {
        1
    } else {
        (index as f64).log10() as usize + 1
    };
    1 + index_digits + 1 + doc_len
}

/// Verifies that an update document only contains update operators (all top-level keys
/// begin with `$`).
pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    match update.first_key() {
        Some(key) if key.starts_with('$') => Ok(()),
        Some(_) => Err(ErrorKind::InvalidArgument {
            message: "update document must only contain update modifiers".to_string(),
        }
        .into()),
        None => Err(ErrorKind::InvalidArgument {
            message: "update document must not be empty".to_string(),
        }
        .into()),
    }
}

/// Verifies that a replacement document cannot be mistaken for an update document (no
/// top-level key begins with `$`).
pub(crate) fn replacement_document_check(replacement: &Document) -> Result<()> {
    match replacement.first_key() {
        Some(key) if key.starts_with('$') => Err(ErrorKind::InvalidArgument {
            message: "replacement document must not contain update modifiers".to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doc;

    #[test]
    fn int_coercion() {
        assert_eq!(get_int(&Bson::Int32(1)), Some(1));
        assert_eq!(get_int(&Bson::Int64(5)), Some(5));
        assert_eq!(get_int(&Bson::Double(1.0)), Some(1));
        assert_eq!(get_int(&Bson::Double(1.5)), None);
        assert_eq!(get_int(&Bson::String("1".to_string())), None);
    }

    #[test]
    fn update_vs_replacement() {
        assert!(update_document_check(&doc! { "$set": doc! { "a": 1 } }).is_ok());
        assert!(update_document_check(&doc! { "a": 1 }).is_err());
        assert!(replacement_document_check(&doc! { "a": 1 }).is_ok());
        assert!(replacement_document_check(&doc! { "$set": doc! { "a": 1 } }).is_err());
    }
}
