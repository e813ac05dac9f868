use super::Client;
use crate::{
    bson_util,
    cmap::{Connection, StreamDescription},
    cursor::{Cursor, CursorInformation, CursorSpecification},
    client::options::ServerAddress,
    doc,
    error::{Result, RETRYABLE_WRITE_ERROR},
    operation::{GetMore, Operation, Retryability},
    results::GetMoreResult,
    selection_criteria::{ReadPreference, SelectionCriteria},
};

impl Client {
    /// Executes an operation: select a server, check out its connection, run the RPC, and
    /// interpret the reply. Network failures and retryable server errors are retried at
    /// most once, on a fresh server selection.
    pub(crate) async fn execute_operation<T: Operation>(&self, op: T) -> Result<T::O> {
        Ok(self.execute_operation_with_address(op).await?.0)
    }

    /// Executes a cursor-producing operation and binds the resulting cursor to the server
    /// that answered it.
    pub(crate) async fn execute_cursor_operation<T: Operation<O = CursorSpecification>>(
        &self,
        op: T,
    ) -> Result<Cursor> {
        let (mut spec, address) = self.execute_operation_with_address(op).await?;
        spec.info.address = address;
        Ok(Cursor::new(self.clone(), spec))
    }

    /// Fetches the next batch for a cursor. The selection criteria pins the operation to
    /// the cursor's server; if that server has left the topology the error surfaces
    /// immediately rather than waiting out the selection timeout.
    pub(crate) async fn execute_get_more(&self, info: CursorInformation) -> Result<GetMoreResult> {
        let criteria = SelectionCriteria::from_address(info.address.clone());
        let op = GetMore::new(info.ns, info.id, info.batch_size, None, criteria);
        let server = self.topology().try_select_server(
            op.selection_criteria().expect("getMore pins a server"),
        )?;
        let mut op = op;
        let (out, _) = self.execute_on_server(&mut op, &server.address).await?;
        Ok(out)
    }

    pub(crate) async fn execute_operation_with_address<T: Operation>(
        &self,
        mut op: T,
    ) -> Result<(T::O, ServerAddress)> {
        let mut retried = false;
        loop {
            let criteria = op
                .selection_criteria()
                .cloned()
                .unwrap_or_else(|| SelectionCriteria::ReadPreference(ReadPreference::Primary));
            let server = self.topology().select_server(&criteria).await?;
            let address = server.address.clone();

            match self.execute_on_server(&mut op, &address).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    let retryable = match op.retryability() {
                        Retryability::Read => err.is_read_retryable(),
                        Retryability::Write => err.is_write_retryable(),
                        Retryability::None => false,
                    };
                    if retried || !retryable {
                        return Err(err);
                    }
                    retried = true;
                }
            }
        }
    }

    async fn execute_on_server<T: Operation>(
        &self,
        op: &mut T,
        address: &ServerAddress,
    ) -> Result<(T::O, ServerAddress)> {
        let server = self
            .topology()
            .get_server(address)
            .ok_or_else(|| crate::error::ErrorKind::NoSuitableServer {
                message: format!("server {} is no longer part of the topology", address),
            })?;

        let mut guard = server.connection.lock().await;
        let checkout: Result<()> = if guard.is_none() {
            let id = server.next_connection_id();
            self.establisher()
                .establish_connection(id, address.clone())
                .await
                .map(|connection| {
                    *guard = Some(connection);
                })
        } else {
            let connection = guard.as_mut().expect("guard was just checked");
            if connection.is_broken() {
                // A broken connection is re-established in place: new TCP stream, then
                // the full handshake again.
                match connection.reconnect().await {
                    Ok(()) => self.establisher().handshake(connection).await.map(|_| ()),
                    Err(err) => Err(err),
                }
            } else {
                Ok(())
            }
        };
        if let Err(err) = checkout {
            *guard = None;
            drop(guard);
            self.topology().handle_application_error(address, &err);
            return Err(err);
        }

        let connection = guard.as_mut().expect("connection was just checked out");
        let description = connection.stream_description()?.clone();

        match self.dispatch(op, connection, &description).await {
            Ok(out) => Ok((out, address.clone())),
            Err(mut err) => {
                if op.retryability() == Retryability::Write
                    && description.supports_retryable_writes()
                    && err.should_add_retryable_write_label(
                        description.max_wire_version.unwrap_or(0),
                    )
                {
                    err.add_label(RETRYABLE_WRITE_ERROR);
                }
                drop(guard);
                self.topology().handle_application_error(address, &err);
                Err(err)
            }
        }
    }

    async fn dispatch<T: Operation>(
        &self,
        op: &mut T,
        connection: &mut Connection,
        description: &StreamDescription,
    ) -> Result<T::O> {
        if !op.is_acknowledged() {
            // Unacknowledged writes never read a reply. On wire version 0 servers they go
            // out as the legacy opcodes; everywhere else as a moreToCome command.
            if let Some(bodies) = op.build_legacy(description)? {
                for body in bodies {
                    connection.send_body_fire_and_forget(body).await?;
                }
            } else {
                let command = op.build(description)?;
                connection.send_command_fire_and_forget(command).await?;
            }
            return op.handle_response(&doc! { "ok": 1 }, description);
        }

        let mut command = op.build(description)?;
        self.topology().description().update_command_with_read_pref(
            &connection.address,
            &mut command,
            op.selection_criteria(),
        );

        let response = connection.send_command(command).await?;
        let body = response.checked_body()?;

        // The legacy write-acknowledgement command caches its outcome on the connection.
        if op.name() == "getLastError" {
            connection.record_last_error(
                body.get_i32("code").unwrap_or(0),
                body.get_str("err").unwrap_or_default().to_string(),
                body.get("n")
                    .and_then(bson_util::get_int)
                    .unwrap_or(0) as i32,
            );
        }

        op.handle_response(&body, description)
    }
}
