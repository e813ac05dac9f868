use crate::{
    bson::Document,
    bson_util,
    cmap::{Command, StreamDescription},
    coll::Namespace,
    doc,
    error::{Error, Result},
    operation::{append_options, Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

/// The `count` command: the number of documents matching a filter.
#[derive(Debug)]
pub(crate) struct Count {
    ns: Namespace,
    filter: Option<Document>,
    options: Option<Document>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Count {
    pub(crate) fn new(
        ns: Namespace,
        filter: Option<Document>,
        options: Option<Document>,
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

impl Operation for Count {
    type O = u64;

    const NAME: &'static str = "count";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! { Self::NAME: self.ns.coll.clone() };
        if let Some(ref filter) = self.filter {
            body.insert("query", filter.clone());
        }
        append_options(&mut body, self.options.as_ref());
        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        response
            .get("n")
            .and_then(bson_util::get_int)
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| Error::invalid_response("count reply is missing `n`"))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
