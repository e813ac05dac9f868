use crate::{
    bson::Document,
    cmap::{Command, StreamDescription},
    coll::Namespace,
    concern::WriteConcern,
    doc,
    error::Result,
    operation::Operation,
};

/// The `drop` command, removing a collection and its indexes.
#[derive(Debug)]
pub(crate) struct DropCollection {
    ns: Namespace,
    write_concern: Option<WriteConcern>,
}

impl DropCollection {
    pub(crate) fn new(ns: Namespace, write_concern: Option<WriteConcern>) -> Self {
        Self { ns, write_concern }
    }
}

impl Operation for DropCollection {
    type O = ();

    const NAME: &'static str = "drop";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! { Self::NAME: self.ns.coll.clone() };
        if let Some(ref write_concern) = self.write_concern {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }
        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        _response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(())
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }
}

/// The `dropDatabase` command.
#[derive(Debug)]
pub(crate) struct DropDatabase {
    db: String,
    write_concern: Option<WriteConcern>,
}

impl DropDatabase {
    pub(crate) fn new(db: String, write_concern: Option<WriteConcern>) -> Self {
        Self { db, write_concern }
    }
}

impl Operation for DropDatabase {
    type O = ();

    const NAME: &'static str = "dropDatabase";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! { Self::NAME: 1 };
        if let Some(ref write_concern) = self.write_concern {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }
        Ok(Command::new(Self::NAME, &self.db, body))
    }

    fn handle_response(
        &self,
        _response: &Document,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(())
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }
}
