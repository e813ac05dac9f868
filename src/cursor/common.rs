use std::collections::VecDeque;

use crate::{bson::Document, client::options::ServerAddress, coll::Namespace, operation::CursorInfo};

/// Specification used to create a new cursor, produced by a find- or aggregate-style
/// operation's reply.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<Document>,
}

impl CursorSpecification {
    pub(crate) fn new(
        info: CursorInfo,
        batch_size: Option<u32>,
        tailable: bool,
        await_data: bool,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: info.ns,
                id: info.id,
                // The address is bound once the executor reports which server ran the
                // operation.
                address: ServerAddress::default(),
                batch_size,
                tailable,
                await_data,
            },
            initial_buffer: info.batch,
        }
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }
}

/// Static information about a cursor: everything a getMore or killCursors needs.
#[derive(Clone, Debug)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,
    pub(crate) address: ServerAddress,
    pub(crate) id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) tailable: bool,
    pub(crate) await_data: bool,
}
