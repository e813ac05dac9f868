/// Constructs a [`Document`](crate::bson::Document) from the given key/value pairs.
///
/// Keys are anything convertible to `String` (string literals, constants, paths); values
/// are anything convertible to [`Bson`](crate::bson::Bson), including nested `doc!`
/// invocations.
///
/// ```
/// use mongodb_core::doc;
///
/// let filter = doc! { "age": doc! { "$gt": 21 }, "active": true };
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::bson::Document::new() };
    ( $($tt:tt)+ ) => {{
        let mut doc = $crate::bson::Document::new();
        $crate::doc_entries!(doc, () $($tt)+);
        doc
    }};
}

/// Internal tt-muncher for [`doc!`]: accumulates key tokens until the `:` separator, then
/// takes the value as an expression.
#[macro_export]
#[doc(hidden)]
macro_rules! doc_entries {
    // Done (possibly via a trailing comma).
    ($doc:ident, ()) => {};
    // A full `key: value` entry followed by more entries.
    ($doc:ident, ($($key:tt)+) : $value:expr , $($rest:tt)*) => {
        $doc.insert($($key)+, $crate::bson::Bson::from($value));
        $crate::doc_entries!($doc, () $($rest)*);
    };
    // The final `key: value` entry.
    ($doc:ident, ($($key:tt)+) : $value:expr) => {
        $doc.insert($($key)+, $crate::bson::Bson::from($value));
    };
    // Not at the separator yet: move one token into the key accumulator.
    ($doc:ident, ($($key:tt)*) $next:tt $($rest:tt)*) => {
        $crate::doc_entries!($doc, ($($key)* $next) $($rest)*);
    };
}
