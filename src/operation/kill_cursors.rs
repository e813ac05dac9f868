use crate::{
    bson::Document,
    cmap::{Command, StreamDescription},
    coll::Namespace,
    doc,
    error::Result,
    operation::Operation,
    selection_criteria::SelectionCriteria,
};

/// Releases a server-side cursor before the server would time it out. Failures are
/// swallowed by the caller, since an orphaned cursor dies on its own.
#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_ids: Vec<i64>,
    selection_criteria: SelectionCriteria,
}

impl KillCursors {
    pub(crate) fn new(
        ns: Namespace,
        cursor_ids: Vec<i64>,
        selection_criteria: SelectionCriteria,
    ) -> Self {
        Self {
            ns,
            cursor_ids,
            selection_criteria,
        }
    }
}

impl Operation for KillCursors {
    type O = ();

    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": self.cursor_ids.clone(),
        };
        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        _response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }
}
