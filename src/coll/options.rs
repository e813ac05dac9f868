//! Options for collection-level operations.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{bson::Document, concern::WriteConcern, selection_criteria::SelectionCriteria};

/// Options for configuring a [`Collection`](crate::Collection) handle.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CollectionOptions {
    /// The default selection criteria for read operations on this collection.
    pub selection_criteria: Option<SelectionCriteria>,

    /// The default write concern for write operations on this collection.
    pub write_concern: Option<WriteConcern>,
}

/// Options for a [`Collection::find`](crate::Collection::find) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct FindOptions {
    /// The fields of matching documents to return.
    pub projection: Option<Document>,

    /// The order of the documents returned.
    pub sort: Option<Document>,

    /// The maximum number of documents to return. A negative value instructs the server to
    /// return the absolute value in a single batch and close the cursor.
    pub limit: Option<i64>,

    /// The number of matching documents to skip before returning results.
    pub skip: Option<u64>,

    /// The number of documents the server returns per cursor batch.
    ///
    /// This takes effect on the server; the cursor fetches batches lazily as it drains
    /// them.
    pub batch_size: Option<u32>,

    /// Whether the cursor should remain open after the last data is received, to be
    /// re-polled as the (capped) collection grows.
    pub tailable: Option<bool>,

    /// With `tailable`, whether the server should block for a while before answering an
    /// empty getMore instead of returning immediately.
    pub await_data: Option<bool>,

    /// Whether the server should keep the cursor alive past its idle timeout.
    pub no_cursor_timeout: Option<bool>,

    /// Whether a sharded query may return partial results when some shards are down.
    pub allow_partial_results: Option<bool>,

    /// The server-side time limit for the query.
    pub max_time: Option<Duration>,

    /// With `tailable` + `await_data`, how long the server blocks on an empty getMore.
    pub max_await_time: Option<Duration>,

    /// The selection criteria for this operation, overriding the collection's.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Options for a [`Collection::find_one`](crate::Collection::find_one) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct FindOneOptions {
    /// The fields of the matching document to return.
    pub projection: Option<Document>,

    /// The order applied before picking the first match.
    pub sort: Option<Document>,

    /// The number of matching documents to skip.
    pub skip: Option<u64>,

    /// The server-side time limit for the query.
    pub max_time: Option<Duration>,

    /// The selection criteria for this operation, overriding the collection's.
    pub selection_criteria: Option<SelectionCriteria>,
}

impl From<FindOneOptions> for FindOptions {
    fn from(options: FindOneOptions) -> Self {
        FindOptions::builder()
            .projection(options.projection)
            .sort(options.sort)
            .skip(options.skip)
            .max_time(options.max_time)
            .selection_criteria(options.selection_criteria)
            .limit(Some(-1))
            .build()
    }
}

/// Options for a [`Collection::aggregate`](crate::Collection::aggregate) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Whether the server may spill pipeline stages to disk.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server returns per cursor batch.
    pub batch_size: Option<u32>,

    /// The server-side time limit for the aggregation.
    pub max_time: Option<Duration>,

    /// The selection criteria for this operation, overriding the collection's.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Options for a [`Collection::count`](crate::Collection::count) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CountOptions {
    /// The maximum number of documents to count.
    pub limit: Option<u64>,

    /// The number of matching documents to skip before counting.
    pub skip: Option<u64>,

    /// The server-side time limit for the count.
    pub max_time: Option<Duration>,

    /// The selection criteria for this operation, overriding the collection's.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Options for a [`Collection::insert_one`](crate::Collection::insert_one) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct InsertOneOptions {
    /// Whether server-side document-level validation is bypassed. Not allowed on
    /// unacknowledged writes.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for this operation, overriding the collection's.
    pub write_concern: Option<WriteConcern>,
}

/// Options for a [`Collection::insert_many`](crate::Collection::insert_many) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct InsertManyOptions {
    /// Whether the writes stop at the first failure (`true`, the default) or attempt every
    /// document regardless.
    pub ordered: Option<bool>,

    /// Whether server-side document-level validation is bypassed. Not allowed on
    /// unacknowledged writes.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for this operation, overriding the collection's.
    pub write_concern: Option<WriteConcern>,
}

/// Options for [`Collection::update_one`](crate::Collection::update_one) and
/// [`Collection::update_many`](crate::Collection::update_many) operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct UpdateOptions {
    /// Whether a new document is inserted when no document matches the filter.
    pub upsert: Option<bool>,

    /// The collation applied when matching. Not allowed on unacknowledged writes.
    pub collation: Option<Document>,

    /// Whether server-side document-level validation is bypassed. Not allowed on
    /// unacknowledged writes.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for this operation, overriding the collection's.
    pub write_concern: Option<WriteConcern>,
}

/// Options for a [`Collection::replace_one`](crate::Collection::replace_one) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ReplaceOptions {
    /// Whether a new document is inserted when no document matches the filter.
    pub upsert: Option<bool>,

    /// The collation applied when matching. Not allowed on unacknowledged writes.
    pub collation: Option<Document>,

    /// Whether server-side document-level validation is bypassed. Not allowed on
    /// unacknowledged writes.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for this operation, overriding the collection's.
    pub write_concern: Option<WriteConcern>,
}

/// Options for [`Collection::delete_one`](crate::Collection::delete_one) and
/// [`Collection::delete_many`](crate::Collection::delete_many) operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DeleteOptions {
    /// The collation applied when matching. Not allowed on unacknowledged writes.
    pub collation: Option<Document>,

    /// The write concern for this operation, overriding the collection's.
    pub write_concern: Option<WriteConcern>,
}

/// Options for a [`Collection::bulk_write`](crate::Collection::bulk_write) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct BulkWriteOptions {
    /// Whether the operations run in order and stop at the first failure (`true`, the
    /// default), or all run regardless of individual failures.
    pub ordered: Option<bool>,

    /// Whether server-side document-level validation is bypassed. Not allowed on
    /// unacknowledged writes.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for this operation, overriding the collection's.
    pub write_concern: Option<WriteConcern>,
}

/// Options for a [`Collection::drop`](crate::Collection::drop) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DropCollectionOptions {
    /// The write concern for this operation, overriding the collection's.
    pub write_concern: Option<WriteConcern>,
}
