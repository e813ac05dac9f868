use crate::{
    bson::Document,
    cmap::{Command, StreamDescription},
    coll::Namespace,
    doc,
    error::Result,
    operation::{CursorInfo, Operation},
    results::GetMoreResult,
    selection_criteria::SelectionCriteria,
};

/// Fetches the next batch for an open cursor. Pinned to the server the cursor lives on via
/// an address predicate.
#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    batch_size: Option<u32>,
    max_await_time_ms: Option<i64>,
    selection_criteria: SelectionCriteria,
}

impl GetMore {
    pub(crate) fn new(
        ns: Namespace,
        cursor_id: i64,
        batch_size: Option<u32>,
        max_await_time_ms: Option<i64>,
        selection_criteria: SelectionCriteria,
    ) -> Self {
        Self {
            ns,
            cursor_id,
            batch_size,
            max_await_time_ms,
            selection_criteria,
        }
    }
}

impl Operation for GetMore {
    type O = GetMoreResult;

    const NAME: &'static str = "getMore";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };
        if let Some(batch_size) = self.batch_size {
            body.insert("batchSize", batch_size as i64);
        }
        if let Some(max_await_time_ms) = self.max_await_time_ms {
            body.insert("maxTimeMS", max_await_time_ms);
        }

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let info = CursorInfo::parse(response, "nextBatch")?;
        Ok(GetMoreResult {
            batch: info.batch,
            exhausted: info.id == 0,
            id: info.id,
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }
}
