pub(crate) mod bulk;
pub mod options;

use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    bson::Document,
    concern::WriteConcern,
    cursor::Cursor,
    error::{Error, ErrorKind, Result},
    operation::{Aggregate, Count, DropCollection, Find},
    options::{
        AggregateOptions,
        CollectionOptions,
        CountOptions,
        DropCollectionOptions,
        FindOneOptions,
        FindOptions,
    },
    selection_criteria::SelectionCriteria,
    Client,
};

/// A MongoDB collection address: `"<db>.<coll>"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace points to.
    pub coll: String,
}

impl Namespace {
    /// Creates a namespace from a database and collection name.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Collection names may themselves contain dots; only the first one separates.
        let mut parts = s.splitn(2, '.');
        match (parts.next(), parts.next()) {
            (Some(db), Some(coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self {
                db: db.to_string(),
                coll: coll.to_string(),
            }),
            _ => Err(ErrorKind::InvalidArgument {
                message: format!("invalid namespace: \"{}\"", s),
            }
            .into()),
        }
    }
}

/// A handle to a MongoDB collection.
///
/// `Collection` uses [`std::sync::Arc`] internally, so it can be shared or cloned across
/// tasks and threads freely.
#[derive(Clone, Debug)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

#[derive(Debug)]
struct CollectionInner {
    client: Client,
    ns: Namespace,
    selection_criteria: Option<SelectionCriteria>,
    write_concern: Option<WriteConcern>,
}

impl Collection {
    pub(crate) fn new(client: Client, ns: Namespace, options: Option<CollectionOptions>) -> Self {
        let options = options.unwrap_or_default();
        Self {
            inner: Arc::new(CollectionInner {
                client,
                ns,
                selection_criteria: options.selection_criteria,
                write_concern: options.write_concern,
            }),
        }
    }

    /// The name of this collection.
    pub fn name(&self) -> &str {
        &self.inner.ns.coll
    }

    /// The namespace of this collection.
    pub fn namespace(&self) -> Namespace {
        self.inner.ns.clone()
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Resolves the criteria for a read: operation options beat the collection default,
    /// which beats the client default.
    pub(crate) fn resolve_selection_criteria(
        &self,
        from_options: Option<&SelectionCriteria>,
    ) -> Option<SelectionCriteria> {
        from_options
            .or(self.inner.selection_criteria.as_ref())
            .or(self.inner.client.selection_criteria())
            .cloned()
    }

    pub(crate) fn resolve_write_concern(
        &self,
        from_options: Option<&WriteConcern>,
    ) -> Option<WriteConcern> {
        from_options
            .or(self.inner.write_concern.as_ref())
            .or(self.inner.client.write_concern())
            .cloned()
    }

    /// Finds the documents matching `filter` and returns a [`Cursor`] over them.
    pub async fn find(
        &self,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<Cursor> {
        let criteria =
            self.resolve_selection_criteria(options.as_ref().and_then(|o| o.selection_criteria.as_ref()));
        let find = Find::new(self.namespace(), filter, options, criteria);
        self.client().execute_cursor_operation(find).await
    }

    /// Finds one document matching `filter`, if any.
    pub async fn find_one(
        &self,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> Result<Option<Document>> {
        let options: FindOptions = options.unwrap_or_default().into();
        let mut cursor = self.find(filter, Some(options)).await?;
        match cursor.advance().await? {
            true => Ok(Some(cursor.current().clone())),
            false => Ok(None),
        }
    }

    /// Forwards an aggregation pipeline to the server and returns a [`Cursor`] over its
    /// results. The pipeline contents are opaque to the driver.
    pub async fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: Option<AggregateOptions>,
    ) -> Result<Cursor> {
        let criteria =
            self.resolve_selection_criteria(options.as_ref().and_then(|o| o.selection_criteria.as_ref()));
        let aggregate = Aggregate::new(
            self.namespace(),
            pipeline.into_iter().collect(),
            options,
            criteria,
        );
        self.client().execute_cursor_operation(aggregate).await
    }

    /// Counts the documents matching `filter` with the server's `count` command.
    pub async fn count(
        &self,
        filter: Option<Document>,
        options: Option<CountOptions>,
    ) -> Result<u64> {
        let criteria =
            self.resolve_selection_criteria(options.as_ref().and_then(|o| o.selection_criteria.as_ref()));
        let mut extra = Document::new();
        if let Some(options) = options {
            if let Some(limit) = options.limit {
                extra.insert("limit", limit as i64);
            }
            if let Some(skip) = options.skip {
                extra.insert("skip", skip as i64);
            }
            if let Some(max_time) = options.max_time {
                extra.insert("maxTimeMS", max_time.as_millis() as i64);
            }
        }
        let extra = if extra.is_empty() { None } else { Some(extra) };
        let count = Count::new(self.namespace(), filter, extra, criteria);
        self.client().execute_operation(count).await
    }

    /// Drops this collection, deleting all of its data and indexes. Dropping a collection
    /// that does not exist is not an error.
    pub async fn drop(&self, options: Option<DropCollectionOptions>) -> Result<()> {
        let write_concern =
            self.resolve_write_concern(options.as_ref().and_then(|o| o.write_concern.as_ref()));
        let drop = DropCollection::new(self.namespace(), write_concern);
        match self.client().execute_operation(drop).await {
            Ok(()) => Ok(()),
            // "ns not found"
            Err(ref e) if matches!(e.sdam_code(), Some(26)) => Ok(()),
            Err(e) if e.to_string().contains("ns not found") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        doc,
        test_util::{cursor_reply, mock_client, read_command, write_reply},
    };

    // Scenario: a filtered count returns the server's n; after a delete the unfiltered
    // count reflects the removal.
    #[tokio::test]
    async fn count_with_filter_then_delete() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("count"));
            assert_eq!(cmd.get_str("count"), Some("c"));
            let filter = cmd.get_document("query").unwrap();
            assert!(filter.get_document("a").unwrap().contains_key("$gt"));
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 2 }).await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("delete"));
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 2 }).await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("count"));
            assert!(!cmd.contains_key("query"));
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 3 }).await;
        });

        let coll = client.database("test").collection("c");
        let n = coll
            .count(Some(doc! { "a": doc! { "$gt": 3 } }), None)
            .await
            .unwrap();
        assert_eq!(n, 2);

        let deleted = coll
            .delete_many(doc! { "a": doc! { "$gt": 3 } }, None)
            .await
            .unwrap();
        assert_eq!(deleted.deleted_count, 2);

        let n = coll.count(None, None).await.unwrap();
        assert_eq!(n, 3);

        server.await.unwrap();
    }

    // Scenario: insert then findOne round-trips the document through the codec.
    #[tokio::test]
    async fn insert_then_find_one() {
        let (client, mut server_end) = mock_client().await;
        let oid = crate::bson::ObjectId::parse_str("010203040506070809101112").unwrap();
        let oid_for_server = oid;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("insert"));
            let docs = cmd.get_array("documents").unwrap();
            let inserted = docs[0].as_document().unwrap();
            assert_eq!(inserted.get_object_id("_id"), Some(oid_for_server));
            assert_eq!(inserted.get_i32("a"), Some(3));
            write_reply(&mut server_end, id, doc! { "ok": 1, "n": 1 }).await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("find"));
            assert_eq!(cmd.get_bool("singleBatch"), Some(true));
            assert_eq!(
                cmd.get_document("filter").unwrap().get_object_id("_id"),
                Some(oid_for_server)
            );
            write_reply(
                &mut server_end,
                id,
                cursor_reply(
                    0,
                    "test.c",
                    "firstBatch",
                    vec![doc! { "_id": oid_for_server, "a": 3 }],
                ),
            )
            .await;
        });

        let coll = client.database("test").collection("c");
        let result = coll
            .insert_one(doc! { "_id": oid, "a": 3 }, None)
            .await
            .unwrap();
        assert_eq!(result.inserted_id, crate::bson::Bson::ObjectId(oid));

        let found = coll
            .find_one(doc! { "_id": oid }, None)
            .await
            .unwrap()
            .expect("document was just inserted");
        assert_eq!(found.get_i32("a"), Some(3));

        server.await.unwrap();
    }

    #[test]
    fn namespace_parsing() {
        let ns: Namespace = "db.coll".parse().unwrap();
        assert_eq!(ns.db, "db");
        assert_eq!(ns.coll, "coll");
        assert_eq!(ns.to_string(), "db.coll");

        // Collection names can contain dots.
        let ns: Namespace = "db.system.views".parse().unwrap();
        assert_eq!(ns.db, "db");
        assert_eq!(ns.coll, "system.views");

        assert!("nodot".parse::<Namespace>().is_err());
        assert!(".coll".parse::<Namespace>().is_err());
        assert!("db.".parse::<Namespace>().is_err());
    }
}
