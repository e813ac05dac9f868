//! An insertion-ordered BSON document.

use std::fmt;

use super::{
    oid::ObjectId,
    value::{Bson, DateTime, Timestamp},
};

/// An in-memory BSON document: an ordered sequence of key/value pairs.
///
/// Element order is preserved exactly as inserted, since the canonical byte form is
/// order-sensitive. Key lookup is a linear scan; callers that need repeated lookups over
/// large documents should iterate once instead.
#[derive(Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Bson)>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Default::default()
    }

    /// The number of elements in the document.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document contains no elements.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets the value for `key`. If the key is already present its value is replaced in
    /// place, preserving the original position; otherwise the element is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        let key = key.into();
        let value = value.into();
        for (k, v) in self.entries.iter_mut() {
            if *k == key {
                return Some(std::mem::replace(v, value));
            }
        }
        self.entries.push((key, value));
        None
    }

    /// Removes the element with the given key, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Returns a reference to the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries
            .iter()
            .find_map(|(k, v)| if k == key { Some(v) } else { None })
    }

    /// Whether the document contains the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The key of the first element, which for a command document names the command.
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    /// Gets a string value for `key`, if present with the right type.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Bson::as_str)
    }

    /// Gets an i32 value for `key`, if present with the right type.
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Bson::as_i32)
    }

    /// Gets an i64 value for `key`, if present with the right type.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Bson::as_i64)
    }

    /// Gets a floating point value for `key`, if present with the right type.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Bson::as_f64)
    }

    /// Gets a boolean value for `key`, if present with the right type.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Bson::as_bool)
    }

    /// Gets an embedded document for `key`, if present with the right type.
    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    /// Gets an array for `key`, if present with the right type.
    pub fn get_array(&self, key: &str) -> Option<&Vec<Bson>> {
        self.get(key).and_then(Bson::as_array)
    }

    /// Gets an ObjectId for `key`, if present with the right type.
    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(Bson::as_object_id)
    }

    /// Gets a datetime for `key`, if present with the right type.
    pub fn get_datetime(&self, key: &str) -> Option<DateTime> {
        self.get(key).and_then(Bson::as_datetime)
    }

    /// Gets a timestamp for `key`, if present with the right type.
    pub fn get_timestamp(&self, key: &str) -> Option<Timestamp> {
        self.get(key).and_then(Bson::as_timestamp)
    }

    /// An iterator over the `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// An iterator over the keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Appends every element of `other` onto the end of this document, replacing values for
    /// keys already present.
    pub fn extend(&mut self, other: Document) {
        for (k, v) in other.entries {
            self.insert(k, v);
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, " \"{}\": {:?}", k, v)?;
        }
        write!(f, " }}")
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = std::vec::IntoIter<(String, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Bson);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, Bson)>,
        fn(&'a (String, Bson)) -> (&'a String, &'a Bson),
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn pair<'b>(entry: &'b (String, Bson)) -> (&'b String, &'b Bson) {
            (&entry.0, &entry.1)
        }
        self.entries
            .iter()
            .map(pair as fn(&'a (String, Bson)) -> (&'a String, &'a Bson))
    }
}

#[cfg(test)]
mod test {
    use crate::doc;

    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let mut doc = Document::new();
        doc.insert("z", 1);
        doc.insert("a", 2);
        doc.insert("m", 3);
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut doc = doc! { "a": 1, "b": 2 };
        let old = doc.insert("a", 10);
        assert_eq!(old, Some(Bson::Int32(1)));
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(doc.get_i32("a"), Some(10));
    }

    #[test]
    fn typed_accessors_check_the_tag() {
        let doc = doc! { "n": 5, "s": "five" };
        assert_eq!(doc.get_i32("n"), Some(5));
        assert_eq!(doc.get_str("n"), None);
        assert_eq!(doc.get_str("s"), Some("five"));
        assert_eq!(doc.get_i64("n"), None);
    }
}
