use crate::{
    bson::{Document, RawDocumentBuf},
    cmap::{
        wire::{DeleteFlags, DeleteMessage, MessageBody},
        Command,
        StreamDescription,
    },
    coll::Namespace,
    concern::WriteConcern,
    doc,
    error::Result,
    operation::{BatchOutcome, Operation, Retryability, WriteResponseBody, COMMAND_OVERHEAD_SIZE},
};

/// One entry of a `delete` command's `deletes` array. A limit of 1 removes a single
/// matching document; 0 removes all of them.
#[derive(Debug, Clone)]
pub(crate) struct DeleteStatement {
    pub(crate) filter: Document,
    pub(crate) limit: i32,
    pub(crate) collation: Option<Document>,
}

impl DeleteStatement {
    fn to_document(&self) -> Document {
        let mut doc = doc! {
            "q": self.filter.clone(),
            "limit": self.limit,
        };
        if let Some(ref collation) = self.collation {
            doc.insert("collation", collation.clone());
        }
        doc
    }
}

/// A single `delete` command carrying as many statements as the server's limits allow.
#[derive(Debug)]
pub(crate) struct Delete {
    ns: Namespace,
    statements: Vec<DeleteStatement>,
    ordered: bool,
    write_concern: Option<WriteConcern>,
    n_attempted: usize,
}

impl Delete {
    pub(crate) fn new(
        ns: Namespace,
        statements: Vec<DeleteStatement>,
        ordered: bool,
        write_concern: Option<WriteConcern>,
    ) -> Self {
        Self {
            ns,
            statements,
            ordered,
            write_concern,
            n_attempted: 0,
        }
    }
}

impl Operation for Delete {
    type O = BatchOutcome;

    const NAME: &'static str = "delete";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let max_batch_bytes = description.max_bson_object_size + COMMAND_OVERHEAD_SIZE;

        let mut docs = Vec::new();
        let mut size: i64 = 0;

        for statement in self
            .statements
            .iter()
            .take(description.max_write_batch_size.max(1) as usize)
        {
            let raw = RawDocumentBuf::from_document_with_max_size(
                &statement.to_document(),
                description.max_bson_object_size as usize + COMMAND_OVERHEAD_SIZE as usize,
            )?;
            let doc_size = raw.as_bytes().len() as i64;
            if !docs.is_empty() && size + doc_size > max_batch_bytes {
                break;
            }
            size += doc_size;
            docs.push(raw);
        }

        self.n_attempted = docs.len();

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "ordered": self.ordered,
        };
        if let Some(ref write_concern) = self.write_concern {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }

        let mut command = Command::new(Self::NAME, &self.ns.db, body);
        command.add_document_sequence("deletes", docs);
        Ok(command)
    }

    fn build_legacy(
        &mut self,
        description: &StreamDescription,
    ) -> Result<Option<Vec<MessageBody>>> {
        if description.supports_write_commands() {
            return Ok(None);
        }

        let mut messages = Vec::with_capacity(self.statements.len());
        for statement in &self.statements {
            let flags = if statement.limit == 1 {
                DeleteFlags::SINGLE_REMOVE
            } else {
                DeleteFlags::empty()
            };
            messages.push(MessageBody::Delete(DeleteMessage {
                namespace: self.ns.to_string(),
                flags,
                selector: RawDocumentBuf::from_document(&statement.filter)?,
            }));
        }
        self.n_attempted = messages.len();
        Ok(Some(messages))
    }

    fn handle_response(
        &self,
        response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(BatchOutcome {
            body: WriteResponseBody::parse(response),
            n_attempted: self.n_attempted,
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        if self.statements.iter().any(|statement| statement.limit != 1) {
            Retryability::None
        } else {
            Retryability::Write
        }
    }
}
