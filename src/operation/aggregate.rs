use crate::{
    bson::{Bson, Document},
    cmap::{Command, StreamDescription},
    coll::{options::AggregateOptions, Namespace},
    cursor::CursorSpecification,
    doc,
    error::Result,
    operation::{CursorInfo, Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

/// Forwards an aggregation pipeline to the server as an `aggregate` command. The pipeline
/// itself is opaque to the driver.
#[derive(Debug)]
pub(crate) struct Aggregate {
    ns: Namespace,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Aggregate {
    pub(crate) fn new(
        ns: Namespace,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Self {
        Self {
            ns,
            pipeline,
            options,
            selection_criteria,
        }
    }
}

impl Operation for Aggregate {
    type O = CursorSpecification;

    const NAME: &'static str = "aggregate";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut cursor = Document::new();
        if let Some(batch_size) = self.options.as_ref().and_then(|o| o.batch_size) {
            cursor.insert("batchSize", batch_size as i64);
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "pipeline": self
                .pipeline
                .iter()
                .cloned()
                .map(Bson::Document)
                .collect::<Vec<_>>(),
            "cursor": cursor,
        };

        if let Some(ref options) = self.options {
            if options.allow_disk_use == Some(true) {
                body.insert("allowDiskUse", true);
            }
            if let Some(max_time) = options.max_time {
                body.insert("maxTimeMS", max_time.as_millis() as i64);
            }
        }

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let info = CursorInfo::parse(response, "firstBatch")?;
        Ok(CursorSpecification::new(
            info,
            self.options.as_ref().and_then(|o| o.batch_size),
            false,
            false,
        ))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
