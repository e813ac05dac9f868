use crate::{
    bson::Document,
    cmap::{Command, StreamDescription},
    error::{Error, Result},
    operation::Operation,
    selection_criteria::SelectionCriteria,
};

/// Runs an arbitrary command against a database. The driver does not interpret the body
/// beyond routing it; unknown commands pass straight through.
#[derive(Debug)]
pub(crate) struct RunCommand {
    db: String,
    command: Document,
    selection_criteria: Option<SelectionCriteria>,
}

impl RunCommand {
    pub(crate) fn new(
        db: String,
        command: Document,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::invalid_argument(
                "an empty document cannot be run as a command",
            ));
        }
        Ok(Self {
            db,
            command,
            selection_criteria,
        })
    }
}

impl Operation for RunCommand {
    type O = Document;

    // The real name is the command's first key.
    const NAME: &'static str = "";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        Ok(Command::new(self.name(), &self.db, self.command.clone()))
    }

    fn handle_response(
        &self,
        response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(response.clone())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn name(&self) -> &str {
        self.command.first_key().unwrap_or(Self::NAME)
    }
}
