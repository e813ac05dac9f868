//! The write coordinator: groups write operations into command batches under the server's
//! limits, dispatches them, and merges the per-batch replies into one result.

use super::Collection;
use crate::{
    bson::{Bson, Document, ObjectId, RawDocumentBuf},
    bson_util,
    concern::WriteConcern,
    doc,
    error::{
        convert_bulk_errors,
        BulkWriteFailure,
        Error,
        ErrorKind,
        Result,
    },
    operation::{
        check_document_validation,
        BatchOutcome,
        Delete,
        DeleteStatement,
        Insert,
        Update,
        UpdateStatement,
    },
    options::{
        BulkWriteOptions,
        DeleteOptions,
        InsertManyOptions,
        InsertOneOptions,
        ReplaceOptions,
        UpdateOptions,
    },
    results::{
        BulkWriteResult,
        DeleteResult,
        InsertManyResult,
        InsertOneResult,
        UpdateResult,
    },
};

/// One operation of a [`Collection::bulk_write`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteModel {
    /// Insert one document.
    #[non_exhaustive]
    InsertOne {
        /// The document to insert. An `_id` is generated when absent.
        document: Document,
    },

    /// Apply update operators to the first document matching a filter.
    #[non_exhaustive]
    UpdateOne {
        /// The filter selecting the document to update.
        filter: Document,
        /// The update operators to apply.
        update: Document,
        /// Insert a new document when nothing matches.
        upsert: Option<bool>,
        /// The collation applied when matching.
        collation: Option<Document>,
    },

    /// Apply update operators to every document matching a filter.
    #[non_exhaustive]
    UpdateMany {
        /// The filter selecting the documents to update.
        filter: Document,
        /// The update operators to apply.
        update: Document,
        /// Insert a new document when nothing matches.
        upsert: Option<bool>,
        /// The collation applied when matching.
        collation: Option<Document>,
    },

    /// Replace the first document matching a filter wholesale.
    #[non_exhaustive]
    ReplaceOne {
        /// The filter selecting the document to replace.
        filter: Document,
        /// The replacement document; must not contain update operators.
        replacement: Document,
        /// Insert the replacement when nothing matches.
        upsert: Option<bool>,
        /// The collation applied when matching.
        collation: Option<Document>,
    },

    /// Delete the first document matching a filter.
    #[non_exhaustive]
    DeleteOne {
        /// The filter selecting the document to delete.
        filter: Document,
        /// The collation applied when matching.
        collation: Option<Document>,
    },

    /// Delete every document matching a filter.
    #[non_exhaustive]
    DeleteMany {
        /// The filter selecting the documents to delete.
        filter: Document,
        /// The collation applied when matching.
        collation: Option<Document>,
    },
}

#[derive(Clone, Copy, PartialEq)]
enum ModelKind {
    Insert,
    Update,
    Delete,
}

impl WriteModel {
    fn kind(&self) -> ModelKind {
        match self {
            WriteModel::InsertOne { .. } => ModelKind::Insert,
            WriteModel::UpdateOne { .. }
            | WriteModel::UpdateMany { .. }
            | WriteModel::ReplaceOne { .. } => ModelKind::Update,
            WriteModel::DeleteOne { .. } | WriteModel::DeleteMany { .. } => ModelKind::Delete,
        }
    }

    fn collation(&self) -> Option<&Document> {
        match self {
            WriteModel::InsertOne { .. } => None,
            WriteModel::UpdateOne { collation, .. }
            | WriteModel::UpdateMany { collation, .. }
            | WriteModel::ReplaceOne { collation, .. }
            | WriteModel::DeleteOne { collation, .. }
            | WriteModel::DeleteMany { collation, .. } => collation.as_ref(),
        }
    }
}

/// Adds a generated `_id` as the first element when the document has none, returning the
/// document to send and its id.
fn ensure_id(document: &Document) -> (Document, Bson) {
    match document.get("_id") {
        Some(id) => (document.clone(), id.clone()),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            let mut with_id = doc! { "_id": id.clone() };
            with_id.extend(document.clone());
            (with_id, id)
        }
    }
}

impl Collection {
    /// Runs a mixed batch of write operations.
    ///
    /// Operations are packed greedily into write commands under the server's
    /// `maxWriteBatchSize` and size limits. Ordered bulks stop at the first per-operation
    /// error; unordered bulks send everything and accumulate errors. Either way the
    /// returned result carries every error with indexes re-based to the caller's operation
    /// list.
    pub async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        options: Option<BulkWriteOptions>,
    ) -> Result<BulkWriteResult> {
        if models.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "bulk write requires at least one operation".to_string(),
            }
            .into());
        }

        let options = options.unwrap_or_default();
        let ordered = options.ordered.unwrap_or(true);
        let bypass = options.bypass_document_validation;
        let write_concern = self.resolve_write_concern(options.write_concern.as_ref());
        if let Some(ref write_concern) = write_concern {
            write_concern.validate()?;
        }
        let acknowledged = write_concern
            .as_ref()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true);

        // Options with no representation in an unacknowledged exchange (or in the legacy
        // opcodes it may be dispatched over) are rejected before any I/O.
        if !acknowledged {
            if bypass.is_some() {
                return Err(ErrorKind::InvalidArgument {
                    message: "bypassDocumentValidation requires an acknowledged write concern"
                        .to_string(),
                }
                .into());
            }
            if models.iter().any(|m| m.collation().is_some()) {
                return Err(ErrorKind::InvalidArgument {
                    message: "collation requires an acknowledged write concern".to_string(),
                }
                .into());
            }
        }

        let mut result = BulkWriteResult::default();
        let mut stopped = false;
        let mut idx = 0;

        // Consecutive operations of the same kind share write commands.
        while idx < models.len() && !stopped {
            let kind = models[idx].kind();
            let mut run_end = idx + 1;
            while run_end < models.len() && models[run_end].kind() == kind {
                run_end += 1;
            }
            let run = &models[idx..run_end];

            match kind {
                ModelKind::Insert => {
                    stopped = self
                        .execute_insert_run(
                            run,
                            idx,
                            ordered,
                            bypass,
                            write_concern.clone(),
                            &mut result,
                        )
                        .await?;
                }
                ModelKind::Update => {
                    stopped = self
                        .execute_update_run(
                            run,
                            idx,
                            ordered,
                            acknowledged,
                            bypass,
                            write_concern.clone(),
                            &mut result,
                        )
                        .await?;
                }
                ModelKind::Delete => {
                    stopped = self
                        .execute_delete_run(run, idx, ordered, write_concern.clone(), &mut result)
                        .await?;
                }
            }

            idx = run_end;
        }

        Ok(result)
    }

    async fn execute_insert_run(
        &self,
        run: &[WriteModel],
        run_offset: usize,
        ordered: bool,
        bypass: Option<bool>,
        write_concern: Option<WriteConcern>,
        result: &mut BulkWriteResult,
    ) -> Result<bool> {
        let mut documents = Vec::with_capacity(run.len());
        let mut ids = Vec::with_capacity(run.len());
        for model in run {
            let document = match model {
                WriteModel::InsertOne { document } => document,
                _ => unreachable!("insert run contains only inserts"),
            };
            let (document, id) = ensure_id(document);
            documents.push(document);
            ids.push(id);
        }

        let mut offset = 0;
        while offset < documents.len() {
            let insert = Insert::new(
                self.namespace(),
                documents[offset..].to_vec(),
                ordered,
                bypass,
                write_concern.clone(),
            );
            let outcome = self.client().execute_operation(insert).await?;
            let global_offset = run_offset + offset;

            merge_write_errors(result, &outcome, global_offset);
            result.inserted_count += outcome.body.n.max(0) as u64;

            if ordered {
                // In an ordered command only the first n were applied.
                for (i, id) in ids[offset..]
                    .iter()
                    .enumerate()
                    .take(outcome.body.n.max(0) as usize)
                {
                    result.inserted_ids.insert(global_offset + i, id.clone());
                }
            } else {
                let failed: Vec<usize> =
                    outcome.body.write_errors.iter().map(|e| e.index).collect();
                for (i, id) in ids[offset..]
                    .iter()
                    .enumerate()
                    .take(outcome.n_attempted)
                {
                    if !failed.contains(&i) {
                        result.inserted_ids.insert(global_offset + i, id.clone());
                    }
                }
            }

            let stop = ordered && !outcome.body.write_errors.is_empty();
            offset += outcome.n_attempted.max(1);
            if stop {
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_update_run(
        &self,
        run: &[WriteModel],
        run_offset: usize,
        ordered: bool,
        acknowledged: bool,
        bypass: Option<bool>,
        write_concern: Option<WriteConcern>,
        result: &mut BulkWriteResult,
    ) -> Result<bool> {
        let mut statements = Vec::with_capacity(run.len());
        for model in run {
            let statement = match model {
                WriteModel::UpdateOne {
                    filter,
                    update,
                    upsert,
                    collation,
                } => {
                    bson_util::update_document_check(update)?;
                    UpdateStatement {
                        filter: filter.clone(),
                        update: update.clone(),
                        multi: false,
                        upsert: upsert.unwrap_or(false),
                        collation: collation.clone(),
                    }
                }
                WriteModel::UpdateMany {
                    filter,
                    update,
                    upsert,
                    collation,
                } => {
                    bson_util::update_document_check(update)?;
                    UpdateStatement {
                        filter: filter.clone(),
                        update: update.clone(),
                        multi: true,
                        upsert: upsert.unwrap_or(false),
                        collation: collation.clone(),
                    }
                }
                WriteModel::ReplaceOne {
                    filter,
                    replacement,
                    upsert,
                    collation,
                } => {
                    bson_util::replacement_document_check(replacement)?;
                    if !acknowledged {
                        let raw = RawDocumentBuf::from_document(replacement)?;
                        check_document_validation(&raw, false)?;
                    }
                    UpdateStatement {
                        filter: filter.clone(),
                        update: replacement.clone(),
                        multi: false,
                        upsert: upsert.unwrap_or(false),
                        collation: collation.clone(),
                    }
                }
                _ => unreachable!("update run contains only updates"),
            };
            statements.push(statement);
        }

        let mut offset = 0;
        while offset < statements.len() {
            let update = Update::new(
                self.namespace(),
                statements[offset..].to_vec(),
                ordered,
                bypass,
                write_concern.clone(),
            );
            let outcome = self.client().execute_operation(update).await?;
            let global_offset = run_offset + offset;

            merge_write_errors(result, &outcome, global_offset);

            // The server's n counts upserts; nMatched is derived by subtracting them.
            let n_upserted = outcome.body.upserted.len() as u64;
            result.matched_count += (outcome.body.n.max(0) as u64).saturating_sub(n_upserted);
            result.modified_count += outcome.body.n_modified.max(0) as u64;
            result.upserted_count += n_upserted;
            for (index, id) in &outcome.body.upserted {
                result.upserted_ids.insert(global_offset + index, id.clone());
            }

            let stop = ordered && !outcome.body.write_errors.is_empty();
            offset += outcome.n_attempted.max(1);
            if stop {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn execute_delete_run(
        &self,
        run: &[WriteModel],
        run_offset: usize,
        ordered: bool,
        write_concern: Option<WriteConcern>,
        result: &mut BulkWriteResult,
    ) -> Result<bool> {
        let statements: Vec<DeleteStatement> = run
            .iter()
            .map(|model| match model {
                WriteModel::DeleteOne { filter, collation } => DeleteStatement {
                    filter: filter.clone(),
                    limit: 1,
                    collation: collation.clone(),
                },
                WriteModel::DeleteMany { filter, collation } => DeleteStatement {
                    filter: filter.clone(),
                    limit: 0,
                    collation: collation.clone(),
                },
                _ => unreachable!("delete run contains only deletes"),
            })
            .collect();

        let mut offset = 0;
        while offset < statements.len() {
            let delete = Delete::new(
                self.namespace(),
                statements[offset..].to_vec(),
                ordered,
                write_concern.clone(),
            );
            let outcome = self.client().execute_operation(delete).await?;
            let global_offset = run_offset + offset;

            merge_write_errors(result, &outcome, global_offset);
            result.deleted_count += outcome.body.n.max(0) as u64;

            let stop = ordered && !outcome.body.write_errors.is_empty();
            offset += outcome.n_attempted.max(1);
            if stop {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Inserts `document` into the collection.
    pub async fn insert_one(
        &self,
        document: Document,
        options: Option<InsertOneOptions>,
    ) -> Result<InsertOneResult> {
        let options = options.unwrap_or_default();
        let bulk_options = BulkWriteOptions::builder()
            .bypass_document_validation(options.bypass_document_validation)
            .write_concern(options.write_concern)
            .build();
        let result = self
            .bulk_write(vec![WriteModel::InsertOne { document }], Some(bulk_options))
            .await?;
        let result = into_single_result(result)?;
        Ok(InsertOneResult::from_insert_many_result(InsertManyResult {
            inserted_ids: result.inserted_ids,
        }))
    }

    /// Inserts the given documents into the collection.
    pub async fn insert_many(
        &self,
        documents: impl IntoIterator<Item = Document>,
        options: Option<InsertManyOptions>,
    ) -> Result<InsertManyResult> {
        let options = options.unwrap_or_default();
        let bulk_options = BulkWriteOptions::builder()
            .ordered(options.ordered)
            .bypass_document_validation(options.bypass_document_validation)
            .write_concern(options.write_concern)
            .build();
        let models = documents
            .into_iter()
            .map(|document| WriteModel::InsertOne { document })
            .collect();
        let result = self.bulk_write(models, Some(bulk_options)).await?;
        if result.has_errors() {
            return Err(Error::new(
                ErrorKind::BulkWrite(into_failure(&result)),
                None::<Vec<String>>,
            ));
        }
        Ok(InsertManyResult {
            inserted_ids: result.inserted_ids,
        })
    }

    /// Updates the first document matching `filter` with the given update operators.
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult> {
        let options = options.unwrap_or_default();
        let model = WriteModel::UpdateOne {
            filter,
            update,
            upsert: options.upsert,
            collation: options.collation,
        };
        self.run_single_update(model, options.bypass_document_validation, options.write_concern)
            .await
    }

    /// Updates every document matching `filter` with the given update operators.
    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult> {
        let options = options.unwrap_or_default();
        let model = WriteModel::UpdateMany {
            filter,
            update,
            upsert: options.upsert,
            collation: options.collation,
        };
        self.run_single_update(model, options.bypass_document_validation, options.write_concern)
            .await
    }

    /// Replaces the first document matching `filter` with `replacement`.
    pub async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: Option<ReplaceOptions>,
    ) -> Result<UpdateResult> {
        let options = options.unwrap_or_default();
        let model = WriteModel::ReplaceOne {
            filter,
            replacement,
            upsert: options.upsert,
            collation: options.collation,
        };
        self.run_single_update(model, options.bypass_document_validation, options.write_concern)
            .await
    }

    async fn run_single_update(
        &self,
        model: WriteModel,
        bypass_document_validation: Option<bool>,
        write_concern: Option<WriteConcern>,
    ) -> Result<UpdateResult> {
        let bulk_options = BulkWriteOptions::builder()
            .bypass_document_validation(bypass_document_validation)
            .write_concern(write_concern)
            .build();
        let result = self.bulk_write(vec![model], Some(bulk_options)).await?;
        let result = into_single_result(result)?;
        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_ids.get(&0).cloned(),
        })
    }

    /// Deletes the first document matching `filter`.
    pub async fn delete_one(
        &self,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> Result<DeleteResult> {
        let options = options.unwrap_or_default();
        let model = WriteModel::DeleteOne {
            filter,
            collation: options.collation,
        };
        self.run_single_delete(model, options.write_concern).await
    }

    /// Deletes every document matching `filter`.
    pub async fn delete_many(
        &self,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> Result<DeleteResult> {
        let options = options.unwrap_or_default();
        let model = WriteModel::DeleteMany {
            filter,
            collation: options.collation,
        };
        self.run_single_delete(model, options.write_concern).await
    }

    async fn run_single_delete(
        &self,
        model: WriteModel,
        write_concern: Option<WriteConcern>,
    ) -> Result<DeleteResult> {
        let bulk_options = BulkWriteOptions::builder()
            .write_concern(write_concern)
            .build();
        let result = self.bulk_write(vec![model], Some(bulk_options)).await?;
        let result = into_single_result(result)?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }
}

fn merge_write_errors(result: &mut BulkWriteResult, outcome: &BatchOutcome, global_offset: usize) {
    for error in &outcome.body.write_errors {
        let mut error = error.clone();
        error.index += global_offset;
        result.write_errors.push(error);
    }
    if let Some(ref wc_error) = outcome.body.write_concern_error {
        result.write_concern_errors.push(wc_error.clone());
    }
}

fn into_failure(result: &BulkWriteResult) -> BulkWriteFailure {
    BulkWriteFailure {
        write_errors: result.write_errors.clone(),
        write_concern_errors: result.write_concern_errors.clone(),
    }
}

/// Surfaces the errors of a single-operation bulk as a single-write error.
fn into_single_result(result: BulkWriteResult) -> Result<BulkWriteResult> {
    if result.has_errors() {
        return Err(convert_bulk_errors(Error::new(
            ErrorKind::BulkWrite(into_failure(&result)),
            None::<Vec<String>>,
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        cmap::wire::MessageFlags,
        options::BulkWriteOptions,
        test_util::{mock_client, mock_client_with, read_command, write_reply},
    };

    fn insert_models(n: usize) -> Vec<WriteModel> {
        (0..n)
            .map(|i| WriteModel::InsertOne {
                document: doc! { "i": i as i32 },
            })
            .collect()
    }

    // Scenario: ten ordered inserts, four per batch, with a duplicate key in the second
    // batch. The coordinator must stop after the failing batch and report the error at the
    // caller's index 5.
    #[tokio::test]
    async fn ordered_bulk_stops_on_first_error() {
        let (client, mut server_end) =
            mock_client_with(|description| description.max_write_batch_size = 4).await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("insert"));
            assert_eq!(cmd.get_array("documents").unwrap().len(), 4);
            assert_eq!(cmd.get_bool("ordered"), Some(true));
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 4 }).await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("insert"));
            assert_eq!(cmd.get_array("documents").unwrap().len(), 4);
            write_reply(
                &mut server_end,
                id,
                doc! {
                    "ok": 1,
                    "n": 1,
                    "writeErrors": vec![doc! { "index": 1, "code": 11000, "errmsg": "E11000 duplicate key" }],
                },
            )
            .await;

            // The coordinator stopped: the next command is the closing ping.
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("ping"));
            write_reply(&mut server_end, id, doc! { "ok": 1 }).await;
        });

        let coll = client.database("db").collection("coll");
        let result = coll.bulk_write(insert_models(10), None).await.unwrap();

        assert_eq!(result.inserted_count, 5);
        assert_eq!(result.write_errors.len(), 1);
        // Batch-relative index 1 of the second batch is global index 5.
        assert_eq!(result.write_errors[0].index, 5);
        assert_eq!(result.write_errors[0].code, 11000);
        assert_eq!(result.inserted_ids.len(), 5);

        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .unwrap();
        server.await.unwrap();
    }

    // The unordered variant keeps sending batches and still reports the original index.
    #[tokio::test]
    async fn unordered_bulk_continues_past_errors() {
        let (client, mut server_end) =
            mock_client_with(|description| description.max_write_batch_size = 4).await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.get_bool("ordered"), Some(false));
            assert_eq!(cmd.get_array("documents").unwrap().len(), 4);
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 4 }).await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.get_array("documents").unwrap().len(), 4);
            write_reply(
                &mut server_end,
                id,
                doc! {
                    "ok": 1,
                    "n": 3,
                    "writeErrors": vec![doc! { "index": 1, "code": 11000, "errmsg": "E11000 duplicate key" }],
                },
            )
            .await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.get_array("documents").unwrap().len(), 2);
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 2 }).await;
        });

        let coll = client.database("db").collection("coll");
        let options = BulkWriteOptions::builder().ordered(Some(false)).build();
        let result = coll
            .bulk_write(insert_models(10), Some(options))
            .await
            .unwrap();

        assert_eq!(result.inserted_count, 9);
        assert_eq!(result.write_errors.len(), 1);
        assert_eq!(result.write_errors[0].index, 5);
        assert_eq!(result.inserted_ids.len(), 9);
        assert!(!result.inserted_ids.contains_key(&5));

        server.await.unwrap();
    }

    // Scenario: an acknowledged duplicate _id insert canonicalizes to DuplicateKey.
    #[tokio::test]
    async fn duplicate_key_insert_one() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("insert"));
            write_reply(
                &mut server_end,
                id,
                doc! {
                    "ok": 1,
                    "n": 0,
                    "writeErrors": vec![doc! { "index": 0, "code": 11000, "errmsg": "E11000 duplicate key error" }],
                },
            )
            .await;
        });

        let coll = client.database("db").collection("coll");
        let err = coll
            .insert_one(doc! { "_id": 1 }, None)
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());
        assert!(matches!(
            err.kind.as_ref(),
            crate::error::ErrorKind::DuplicateKey(_)
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn mixed_bulk_merges_counts_and_upserts() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("insert"));
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 1 }).await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("update"));
            let updates = cmd.get_array("updates").unwrap();
            assert_eq!(updates.len(), 1);
            write_reply(
                &mut server_end,
                id,
                doc! {
                    "ok": 1,
                    "n": 1,
                    "nModified": 0,
                    "upserted": vec![doc! { "index": 0, "_id": 99 }],
                },
            )
            .await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("delete"));
            let deletes = cmd.get_array("deletes").unwrap();
            assert_eq!(deletes.len(), 1);
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 2 }).await;
        });

        let coll = client.database("db").collection("coll");
        let models = vec![
            WriteModel::InsertOne {
                document: doc! { "a": 1 },
            },
            WriteModel::UpdateOne {
                filter: doc! { "a": 2 },
                update: doc! { "$set": doc! { "b": 1 } },
                upsert: Some(true),
                collation: None,
            },
            WriteModel::DeleteMany {
                filter: doc! { "a": doc! { "$gt": 5 } },
                collation: None,
            },
        ];
        let result = coll.bulk_write(models, None).await.unwrap();

        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.matched_count, 0);
        assert_eq!(result.upserted_count, 1);
        // The upsert index is re-based to the caller's operation list.
        assert_eq!(
            result.upserted_ids.get(&1),
            Some(&crate::bson::Bson::Int32(99))
        );
        assert_eq!(result.deleted_count, 2);
        assert!(!result.has_errors());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn empty_bulk_fails_before_io() {
        let (client, _server_end) = mock_client().await;
        let coll = client.database("db").collection("coll");
        let err = coll.bulk_write(Vec::new(), None).await.unwrap_err();
        assert!(matches!(
            err.kind.as_ref(),
            ErrorKind::InvalidArgument { .. }
        ));
    }

    // Scenario: an unacknowledged insert goes out with moreToCome set, no reply is read,
    // and the result reports nothing beyond send success.
    #[tokio::test]
    async fn unacknowledged_insert_fires_and_forgets() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (_, flags, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("insert"));
            assert!(flags.contains(MessageFlags::MORE_TO_COME));
            // No reply for moreToCome; the next exchange is the ping.

            let (id, flags, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("ping"));
            assert!(!flags.contains(MessageFlags::MORE_TO_COME));
            write_reply(&mut server_end, id, doc! { "ok": 1 }).await;
        });

        let coll = client.database("db").collection("coll");
        let options = BulkWriteOptions::builder()
            .write_concern(Some(WriteConcern::unacknowledged()))
            .build();
        let result = coll
            .bulk_write(
                vec![WriteModel::InsertOne {
                    document: doc! { "a": 1 },
                }],
                Some(options),
            )
            .await
            .unwrap();
        assert_eq!(result.inserted_count, 0);
        assert!(!result.has_errors());

        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .unwrap();
        server.await.unwrap();
    }

    // On a wire version 0 server, unacknowledged writes go out as the legacy opcodes
    // with `response_to = -1` instead of write commands.
    #[tokio::test]
    async fn unacknowledged_writes_use_legacy_opcodes_on_old_servers() {
        use crate::cmap::wire::{Message, MessageBody, UpdateFlags};

        let (client, mut server_end) =
            mock_client_with(|description| description.max_wire_version = Some(0)).await;

        let server = tokio::spawn(async move {
            let message = Message::read_from(&mut server_end).await.unwrap();
            assert_eq!(message.response_to, -1);
            match message.body {
                MessageBody::Insert(insert) => {
                    assert_eq!(insert.namespace, "db.coll");
                    assert_eq!(insert.documents.len(), 1);
                    let doc = insert.documents[0].to_document().unwrap();
                    assert_eq!(doc.get_i32("a"), Some(1));
                }
                other => panic!("expected OP_INSERT, got {:?}", other.op_code()),
            }

            let message = Message::read_from(&mut server_end).await.unwrap();
            assert_eq!(message.response_to, -1);
            match message.body {
                MessageBody::Update(update) => {
                    assert_eq!(update.namespace, "db.coll");
                    assert!(update.flags.contains(UpdateFlags::UPSERT));
                    assert!(!update.flags.contains(UpdateFlags::MULTI));
                }
                other => panic!("expected OP_UPDATE, got {:?}", other.op_code()),
            }
        });

        let coll = client.database("db").collection("coll");
        let options = BulkWriteOptions::builder()
            .write_concern(Some(WriteConcern::unacknowledged()))
            .build();
        let models = vec![
            WriteModel::InsertOne {
                document: doc! { "a": 1 },
            },
            WriteModel::UpdateOne {
                filter: doc! { "a": 1 },
                update: doc! { "$set": doc! { "b": 2 } },
                upsert: Some(true),
                collation: None,
            },
        ];
        let result = coll.bulk_write(models, Some(options)).await.unwrap();
        assert!(!result.has_errors());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn unacknowledged_rejects_bypass_validation_and_collation() {
        let (client, _server_end) = mock_client().await;
        let coll = client.database("db").collection("coll");

        let options = BulkWriteOptions::builder()
            .write_concern(Some(WriteConcern::unacknowledged()))
            .bypass_document_validation(Some(true))
            .build();
        let err = coll
            .bulk_write(insert_models(1), Some(options))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind.as_ref(),
            ErrorKind::InvalidArgument { .. }
        ));

        let options = BulkWriteOptions::builder()
            .write_concern(Some(WriteConcern::unacknowledged()))
            .build();
        let err = coll
            .bulk_write(
                vec![WriteModel::DeleteOne {
                    filter: doc! {},
                    collation: Some(doc! { "locale": "fr" }),
                }],
                Some(options),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind.as_ref(),
            ErrorKind::InvalidArgument { .. }
        ));
    }

    // Scenario: a document over the negotiated maxBsonObjectSize fails before any bytes
    // reach the socket.
    #[tokio::test]
    async fn oversized_document_fails_before_send() {
        let (client, mut server_end) =
            mock_client_with(|description| description.max_bson_object_size = 1024).await;

        let coll = client.database("db").collection("coll");
        let err = coll
            .insert_one(doc! { "big": "x".repeat(4096) }, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind.as_ref(),
            ErrorKind::Bson(crate::bson::raw::Error::TooLarge { .. })
        ));

        // Nothing was written: the first frame the server sees is the ping.
        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("ping"));
            write_reply(&mut server_end, id, doc! { "ok": 1 }).await;
        });
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .unwrap();
        server.await.unwrap();
    }
}
