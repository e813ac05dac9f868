use std::sync::Arc;

use crate::{
    bson::Document,
    coll::{options::CollectionOptions, Namespace},
    concern::WriteConcern,
    doc,
    error::Result,
    operation::{DropDatabase, RunCommand},
    selection_criteria::SelectionCriteria,
    Client,
    Collection,
};

/// A handle to a MongoDB database.
///
/// `Database` uses [`std::sync::Arc`] internally, so it can be shared or cloned across
/// tasks and threads freely.
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

#[derive(Debug)]
struct DatabaseInner {
    client: Client,
    name: String,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                client,
                name: name.to_string(),
            }),
        }
    }

    /// The name of this database.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Gets a handle to the collection with the provided name.
    ///
    /// This does not send or receive anything across the wire; the collection does not
    /// have to exist yet.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(
            self.client().clone(),
            Namespace::new(self.name(), name),
            None,
        )
    }

    /// Gets a handle to the collection with the provided name and options.
    pub fn collection_with_options(&self, name: &str, options: CollectionOptions) -> Collection {
        Collection::new(
            self.client().clone(),
            Namespace::new(self.name(), name),
            Some(options),
        )
    }

    /// Runs an arbitrary database command and returns the reply document.
    ///
    /// The command's first key names the command; everything else passes through
    /// untouched, so commands this driver does not model are still reachable.
    pub async fn run_command(
        &self,
        command: Document,
        selection_criteria: impl Into<Option<SelectionCriteria>>,
    ) -> Result<Document> {
        let operation = RunCommand::new(
            self.name().to_string(),
            command,
            selection_criteria.into(),
        )?;
        self.client().execute_operation(operation).await
    }

    /// Runs the legacy `getLastError` command, returning its reply and caching the error
    /// state on the connection that ran it.
    pub async fn get_last_error(
        &self,
        write_concern: Option<&WriteConcern>,
    ) -> Result<Document> {
        let mut command = doc! { "getLastError": 1 };
        if let Some(write_concern) = write_concern {
            command.extend(write_concern.to_document());
        }
        self.run_command(command, None).await
    }

    /// Drops this database, deleting all of its collections.
    pub async fn drop(&self, write_concern: Option<WriteConcern>) -> Result<()> {
        let write_concern = write_concern.or_else(|| self.client().write_concern().cloned());
        let operation = DropDatabase::new(self.name().to_string(), write_concern);
        self.client().execute_operation(operation).await
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::{
        doc,
        error::ErrorKind,
        test_util::{mock_client, read_command, write_reply},
    };

    // Command errors surface the server's code and errmsg verbatim.
    #[tokio::test]
    async fn command_error_is_preserved()  {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("florble"));
            assert_eq!(cmd.get_str("$db"), Some("admin"));
            write_reply(
                &mut server_end,
                id,
                doc! {
                    "ok": 0,
                    "code": 59,
                    "codeName": "CommandNotFound",
                    "errmsg": "no such command: 'florble'",
                },
            )
            .await;
        });

        let err = client
            .database("admin")
            .run_command(doc! { "florble": 1 }, None)
            .await
            .unwrap_err();

        match err.kind.as_ref() {
            ErrorKind::Command(command_error) => {
                assert_eq!(command_error.code, 59);
                assert_eq!(command_error.message, "no such command: 'florble'");
            }
            other => panic!("expected a command error, got {:?}", other),
        }
        assert!(err.is_command_not_found());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn arbitrary_commands_pass_through() {
        let (client, mut server_end) = mock_client().await;

        let server = tokio::spawn(async move {
            let (id, _, cmd) = read_command(&mut server_end).await;
            assert_eq!(cmd.first_key(), Some("getLastError"));
            write_reply(
                &mut server_end,
                id,
                doc! { "ok": 1, "err": crate::bson::Bson::Null, "n": 0 },
            )
            .await;
        });

        let reply = client
            .database("test")
            .get_last_error(None)
            .await
            .unwrap();
        assert!(reply.get("err").unwrap().is_null());

        server.await.unwrap();
    }
}
