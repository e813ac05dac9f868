//! Contains the types of results returned by CRUD operations.

use std::collections::{HashMap, VecDeque};

use crate::{
    bson::{Bson, Document},
    error::{BulkWriteError, WriteConcernError},
};

/// The result of a [`Collection::insert_one`](crate::Collection::insert_one) operation.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct InsertOneResult {
    /// The `_id` field of the document inserted.
    pub inserted_id: Bson,
}

impl InsertOneResult {
    pub(crate) fn from_insert_many_result(result: InsertManyResult) -> Self {
        Self {
            inserted_id: result.inserted_ids.get(&0).cloned().unwrap_or(Bson::Null),
        }
    }
}

/// The result of a [`Collection::insert_many`](crate::Collection::insert_many) operation.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The `_id` field of the documents inserted, keyed by their index in the input.
    pub inserted_ids: HashMap<usize, Bson>,
}

/// The result of a [`Collection::update_one`](crate::Collection::update_one) or
/// [`Collection::update_many`](crate::Collection::update_many) operation.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct UpdateResult {
    /// The number of documents that matched the filter.
    pub matched_count: u64,

    /// The number of documents that were modified by the operation.
    pub modified_count: u64,

    /// The `_id` field of the upserted document.
    pub upserted_id: Option<Bson>,
}

/// The result of a [`Collection::delete_one`](crate::Collection::delete_one) or
/// [`Collection::delete_many`](crate::Collection::delete_many) operation.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct DeleteResult {
    /// The number of documents deleted by the operation.
    pub deleted_count: u64,
}

/// The merged outcome of a [`Collection::bulk_write`](crate::Collection::bulk_write): the
/// per-command counters summed across every batch, with batch-relative indexes re-based
/// into the caller's index space.
///
/// Per-operation failures and write concern failures accumulate separately, so a caller
/// can tell "the data was rejected" apart from "the data was applied but not durable".
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct BulkWriteResult {
    /// The number of documents inserted.
    pub inserted_count: u64,

    /// The number of documents matched by update filters.
    pub matched_count: u64,

    /// The number of documents modified by updates.
    pub modified_count: u64,

    /// The number of documents upserted.
    pub upserted_count: u64,

    /// The number of documents deleted.
    pub deleted_count: u64,

    /// The `_id`s of upserted documents, keyed by the index of the originating operation.
    pub upserted_ids: HashMap<usize, Bson>,

    /// The `_id`s of inserted documents, keyed by the index of the originating operation.
    pub inserted_ids: HashMap<usize, Bson>,

    /// Every per-operation error, with indexes relative to the caller's operation list.
    pub write_errors: Vec<BulkWriteError>,

    /// Every write concern error reported by any batch.
    pub write_concern_errors: Vec<WriteConcernError>,
}

impl BulkWriteResult {
    /// Whether any kind of error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.write_errors.is_empty() || !self.write_concern_errors.is_empty()
    }
}

/// A batch fetched by a getMore.
#[derive(Debug, Clone)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: VecDeque<Document>,
    pub(crate) exhausted: bool,
    pub(crate) id: i64,
}
