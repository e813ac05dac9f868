use crate::{
    bson::{Document, RawDocumentBuf, ValidationBits},
    cmap::{
        wire::{InsertFlags, InsertMessage, MessageBody},
        Command,
        StreamDescription,
    },
    coll::Namespace,
    concern::WriteConcern,
    doc,
    error::{ErrorKind, Result},
    operation::{BatchOutcome, Operation, Retryability, WriteResponseBody, COMMAND_OVERHEAD_SIZE},
};

/// A single `insert` command carrying as many documents as the server's limits allow. The
/// write coordinator re-issues it with the remaining documents until all are attempted.
#[derive(Debug)]
pub(crate) struct Insert {
    ns: Namespace,
    documents: Vec<Document>,
    ordered: bool,
    bypass_document_validation: Option<bool>,
    write_concern: Option<WriteConcern>,
    n_attempted: usize,
}

impl Insert {
    pub(crate) fn new(
        ns: Namespace,
        documents: Vec<Document>,
        ordered: bool,
        bypass_document_validation: Option<bool>,
        write_concern: Option<WriteConcern>,
    ) -> Self {
        Self {
            ns,
            documents,
            ordered,
            bypass_document_validation,
            write_concern,
            n_attempted: 0,
        }
    }

    fn encode_document(
        &self,
        document: &Document,
        max_doc_size: i64,
    ) -> Result<RawDocumentBuf> {
        let raw = RawDocumentBuf::from_document_with_max_size(document, max_doc_size as usize)?;
        check_document_validation(&raw, self.is_acknowledged())?;
        Ok(raw)
    }
}

/// Documents with malformed UTF-8 never go to a write command; documents with `$`- or
/// `.`-keys are additionally rejected when the write is unacknowledged, because the server
/// will not report the rejection back.
pub(crate) fn check_document_validation(raw: &RawDocumentBuf, acknowledged: bool) -> Result<()> {
    if raw.validation().contains(ValidationBits::NOT_UTF8) {
        return Err(crate::bson::raw::Error::NotUtf8.into());
    }
    if !acknowledged
        && raw
            .validation()
            .intersects(ValidationBits::DOT_IN_KEY | ValidationBits::DOLLAR_INIT_KEY)
    {
        return Err(ErrorKind::InvalidArgument {
            message: "unacknowledged writes cannot carry documents with keys containing '.' or \
                      starting with '$'"
                .to_string(),
        }
        .into());
    }
    Ok(())
}

impl Operation for Insert {
    type O = BatchOutcome;

    const NAME: &'static str = "insert";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let max_doc_size = description.max_bson_object_size;
        let max_batch_bytes = description.max_bson_object_size + COMMAND_OVERHEAD_SIZE;

        let mut docs = Vec::new();
        let mut size: i64 = 0;

        for document in self
            .documents
            .iter()
            .take(description.max_write_batch_size.max(1) as usize)
        {
            let raw = self.encode_document(document, max_doc_size)?;
            let doc_size = raw.as_bytes().len() as i64;
            // Greedy packing: close the batch when the next document would overflow.
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
        if let Some(bypass) = self.bypass_document_validation {
            body.insert("bypassDocumentValidation", bypass);
        }
        if let Some(ref write_concern) = self.write_concern {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }

        let mut command = Command::new(Self::NAME, &self.ns.db, body);
        command.add_document_sequence("documents", docs);
        Ok(command)
    }

    fn build_legacy(
        &mut self,
        description: &StreamDescription,
    ) -> Result<Option<Vec<MessageBody>>> {
        if description.supports_write_commands() {
            return Ok(None);
        }

        let mut documents = Vec::with_capacity(self.documents.len());
        for document in &self.documents {
            documents.push(self.encode_document(document, description.max_bson_object_size)?);
        }
        self.n_attempted = documents.len();

        let flags = if self.ordered {
            InsertFlags::empty()
        } else {
            InsertFlags::CONTINUE_ON_ERROR
        };

        Ok(Some(vec![MessageBody::Insert(InsertMessage {
            flags,
            namespace: self.ns.to_string(),
            documents,
        })]))
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
        Retryability::Write
    }
}
