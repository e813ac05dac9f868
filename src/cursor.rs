pub(crate) mod common;

use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use tracing::warn;

use crate::{
    bson::Document,
    error::{Error, Result},
    operation::KillCursors,
    results::GetMoreResult,
    runtime,
    selection_criteria::SelectionCriteria,
    BoxFuture,
    Client,
};

pub(crate) use common::{CursorInformation, CursorSpecification};

/// A cursor over the results of a find-style operation.
///
/// The first batch arrives with the originating reply; further batches are fetched lazily
/// with getMore commands pinned to the server that owns the cursor. Iterate either with
/// [`advance`](Cursor::advance) / [`current`](Cursor::current), which exposes each document
/// as a view that the next advance invalidates, or as a [`Stream`] of owned documents:
///
/// ```no_run
/// # use mongodb_core::{Client, error::Result, doc};
/// # async fn run(client: Client) -> Result<()> {
/// let coll = client.database("items").collection("inventory");
/// let mut cursor = coll.find(doc! { "qty": doc! { "$gt": 4 } }, None).await?;
/// while cursor.advance().await? {
///     println!("{}", cursor.current());
/// }
/// # Ok(())
/// # }
/// ```
///
/// A dropped cursor that still has results on the server sends a best-effort killCursors;
/// if that fails the server reaps the cursor on its idle timeout.
///
/// Cursors are not thread-safe: at most one getMore is in flight at a time, enforced by
/// `&mut self`.
pub struct Cursor {
    client: Client,
    info: CursorInformation,
    buffer: VecDeque<Document>,
    current: Option<Document>,
    error: Option<Error>,
    pending: Option<BoxFuture<'static, Result<GetMoreResult>>>,
}

impl Cursor {
    pub(crate) fn new(client: Client, spec: CursorSpecification) -> Self {
        Self {
            client,
            info: spec.info,
            buffer: spec.initial_buffer,
            current: None,
            error: None,
            pending: None,
        }
    }

    /// The server-assigned cursor id; 0 once the server has no more results.
    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }

    /// Whether the server has no more results to hand out.
    pub fn is_exhausted(&self) -> bool {
        self.info.id == 0
    }

    /// Advances the cursor to the next document, fetching a new batch from the server when
    /// the current one is drained.
    ///
    /// Returns `false` when iteration is over: for a regular cursor that means exhausted;
    /// for a tailable cursor it means "no results for now" and a later call may produce
    /// more. A cursor that hit an error keeps returning that error.
    pub async fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                self.current = Some(doc);
                return Ok(true);
            }
            self.current = None;

            if let Some(ref error) = self.error {
                return Err(error.clone());
            }
            if self.is_exhausted() {
                return Ok(false);
            }

            let result = self
                .client
                .execute_get_more(self.info.clone())
                .await;
            match result {
                Ok(get_more) => {
                    self.info.id = get_more.id;
                    let empty = get_more.batch.is_empty();
                    self.buffer = get_more.batch;
                    if empty && !self.is_exhausted() {
                        // A live cursor with nothing to hand out right now; tailable
                        // callers poll again later.
                        return Ok(false);
                    }
                }
                Err(error) => {
                    self.handle_get_more_error(&error);
                    return Err(error);
                }
            }
        }
    }

    /// The document the cursor is currently positioned at.
    ///
    /// Only valid after [`advance`](Cursor::advance) returned `true`; the returned
    /// reference is a view into the cursor's buffer and is invalidated by the next call to
    /// `advance`. Callers needing a longer lifetime must clone.
    ///
    /// # Panics
    /// Panics if the cursor is not positioned at a document.
    pub fn current(&self) -> &Document {
        self.current
            .as_ref()
            .expect("current() called on an unpositioned cursor")
    }

    /// Advances and returns an owned copy of the next document, `None` at the end.
    pub async fn next(&mut self) -> Option<Result<Document>> {
        match self.advance().await {
            Ok(true) => Some(Ok(self.current().clone())),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }

    fn handle_get_more_error(&mut self, error: &Error) {
        // A cursor-not-found reply means the server already reaped the cursor; there is
        // nothing left to kill.
        if matches!(error.sdam_code(), Some(43) | Some(237)) {
            self.info.id = 0;
        }
        self.error = Some(error.clone());
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("info", &self.info)
            .field("buffered", &self.buffer.len())
            .field("error", &self.error)
            .finish()
    }
}

impl Stream for Cursor {
    type Item = Result<Document>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // If there is a getMore in flight, check on its status.
            if let Some(future) = self.pending.as_mut() {
                match Pin::new(future).poll(cx) {
                    Poll::Ready(result) => {
                        self.pending = None;
                        match result {
                            Ok(get_more) => {
                                self.info.id = get_more.id;
                                let empty = get_more.batch.is_empty();
                                self.buffer = get_more.batch;
                                if empty && !self.is_exhausted() {
                                    return Poll::Ready(None);
                                }
                            }
                            Err(error) => {
                                self.handle_get_more_error(&error);
                                return Poll::Ready(Some(Err(error)));
                            }
                        }
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            if let Some(doc) = self.buffer.pop_front() {
                return Poll::Ready(Some(Ok(doc)));
            }
            if self.error.is_some() || self.is_exhausted() {
                return Poll::Ready(None);
            }

            let client = self.client.clone();
            let info = self.info.clone();
            self.pending = Some(Box::pin(async move { client.execute_get_more(info).await }));
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.info.id == 0 {
            return;
        }

        let client = self.client.clone();
        let info = self.info.clone();
        runtime::spawn(async move {
            let kill = KillCursors::new(
                info.ns,
                vec![info.id],
                SelectionCriteria::from_address(info.address),
            );
            // A failed kill is swallowed: the server times the cursor out on its own.
            if let Err(error) = client.execute_operation(kill).await {
                warn!(error = %error, "failed to kill abandoned cursor");
            }
        });
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::{
        doc,
        options::FindOptions,
        test_util::{cursor_reply, mock_client, read_command, write_reply},
    };

    // Scenario: batch size 2 over five matching documents. The server hands out three
    // batches, so exactly two getMores go over the wire, and a fully drained cursor must
    // not be followed by a killCursors.
    #[tokio::test]
    async fn drained_cursor_sends_get_mores_but_no_kill() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("find"));
            assert_eq!(cmd.get_i64("batchSize"), Some(2));
            write_reply(
                &mut server_end,
                id,
                cursor_reply(7, "db.coll", "firstBatch", vec![doc! { "x": 1 }, doc! { "x": 2 }]),
            )
            .await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("getMore"));
            assert_eq!(cmd.get_i64("getMore"), Some(7));
            assert_eq!(cmd.get_str("collection"), Some("coll"));
            write_reply(
                &mut server_end,
                id,
                cursor_reply(7, "db.coll", "nextBatch", vec![doc! { "x": 3 }, doc! { "x": 4 }]),
            )
            .await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("getMore"));
            write_reply(
                &mut server_end,
                id,
                cursor_reply(0, "db.coll", "nextBatch", vec![doc! { "x": 5 }]),
            )
            .await;

            // The next command proves the drained cursor was not killed.
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("ping"));
            write_reply(&mut server_end, id, doc! { "ok": 1 }).await;
        });

        let coll = client.database("db").collection("coll");
        let options = FindOptions::builder().batch_size(Some(2u32)).build();
        let mut cursor = coll.find(doc! {}, Some(options)).await.unwrap();

        let mut seen = Vec::new();
        while cursor.advance().await.unwrap() {
            seen.push(cursor.current().get_i32("x").unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(cursor.is_exhausted());
        drop(cursor);

        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_cursor_sends_kill_cursors() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("find"));
            write_reply(
                &mut server_end,
                id,
                cursor_reply(7, "db.coll", "firstBatch", vec![doc! { "x": 1 }, doc! { "x": 2 }]),
            )
            .await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("killCursors"));
            assert_eq!(cmd.get_str("killCursors"), Some("coll"));
            let ids: Vec<i64> = cmd
                .get_array("cursors")
                .unwrap()
                .iter()
                .filter_map(crate::bson::Bson::as_i64)
                .collect();
            assert_eq!(ids, vec![7]);
            write_reply(&mut server_end, id, doc! { "ok": 1 }).await;
        });

        let coll = client.database("db").collection("coll");
        let mut cursor = coll.find(doc! {}, None).await.unwrap();
        assert!(cursor.advance().await.unwrap());
        assert_eq!(cursor.current().get_i32("x"), Some(1));
        // Abandon the cursor with results still on the server.
        drop(cursor);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn cursor_is_a_stream_of_documents() {
        use futures::TryStreamExt;

        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("find"));
            write_reply(
                &mut server_end,
                id,
                cursor_reply(5, "db.coll", "firstBatch", vec![doc! { "x": 1 }, doc! { "x": 2 }]),
            )
            .await;

            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("getMore"));
            write_reply(
                &mut server_end,
                id,
                cursor_reply(0, "db.coll", "nextBatch", vec![doc! { "x": 3 }]),
            )
            .await;
        });

        let coll = client.database("db").collection("coll");
        let cursor = coll.find(doc! {}, None).await.unwrap();
        let docs: Vec<crate::bson::Document> = cursor.try_collect().await.unwrap();
        let seen: Vec<i32> = docs.iter().map(|d| d.get_i32("x").unwrap()).collect();
        assert_eq!(seen, vec![1, 2, 3]);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn cursor_error_state_persists() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, _) = read_command(&mut server_end).await;
            write_reply(
                &mut server_end,
                id,
                cursor_reply(7, "db.coll", "firstBatch", vec![doc! { "x": 1 }]),
            )
            .await;

            let (id, _, _) = read_command(&mut server_end).await;
            write_reply(
                &mut server_end,
                id,
                doc! { "ok": 0, "code": 43, "codeName": "CursorNotFound", "errmsg": "cursor id 7 not found" },
            )
            .await;
        });

        let coll = client.database("db").collection("coll");
        let mut cursor = coll.find(doc! {}, None).await.unwrap();
        assert!(cursor.advance().await.unwrap());

        let first = cursor.advance().await.unwrap_err();
        // The cursor stays in the error state; no further getMore is attempted.
        let second = cursor.advance().await.unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
        // CursorNotFound means there is nothing left to kill on drop.
        assert!(cursor.is_exhausted());

        server.await.unwrap();
    }
}
