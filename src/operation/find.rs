use crate::{
    cmap::{Command, StreamDescription},
    coll::{options::FindOptions, Namespace},
    cursor::CursorSpecification,
    doc,
    error::Result,
    operation::{CursorInfo, Operation, Retryability},
    bson::Document,
    selection_criteria::SelectionCriteria,
};

#[derive(Debug)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<FindOptions>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Find {
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        options: Option<FindOptions>,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Self {
        Self {
            ns,
            filter,
            options,
            selection_criteria,
        }
    }
}

impl Operation for Find {
    type O = CursorSpecification;

    const NAME: &'static str = "find";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };

        if let Some(ref options) = self.options {
            if let Some(ref projection) = options.projection {
                body.insert("projection", projection.clone());
            }
            if let Some(ref sort) = options.sort {
                body.insert("sort", sort.clone());
            }
            if let Some(limit) = options.limit {
                // A negative limit is the legacy spelling of "one batch, then close".
                if limit < 0 {
                    body.insert("limit", limit.abs());
                    body.insert("singleBatch", true);
                } else {
                    body.insert("limit", limit);
                }
            }
            if let Some(skip) = options.skip {
                body.insert("skip", skip as i64);
            }
            if let Some(batch_size) = options.batch_size {
                body.insert("batchSize", batch_size as i64);
            }
            if options.tailable == Some(true) {
                body.insert("tailable", true);
            }
            if options.await_data == Some(true) {
                body.insert("awaitData", true);
            }
            if options.no_cursor_timeout == Some(true) {
                body.insert("noCursorTimeout", true);
            }
            if options.allow_partial_results == Some(true) {
                body.insert("allowPartialResults", true);
            }
            if let Some(max_time) = options.max_time {
                body.insert("maxTimeMS", max_time.as_millis() as i64);
            }
            if let Some(max_await_time) = options.max_await_time {
                body.insert("maxAwaitTimeMS", max_await_time.as_millis() as i64);
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
            self.options.as_ref().and_then(|o| o.tailable).unwrap_or(false),
            self.options
                .as_ref()
                .and_then(|o| o.await_data)
                .unwrap_or(false),
        ))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
