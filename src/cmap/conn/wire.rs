mod header;
mod message;
#[cfg(test)]
mod test;

pub(crate) use self::{
    header::{Header, OpCode},
    message::{
        DeleteFlags,
        DeleteMessage,
        GetMoreMessage,
        InsertFlags,
        InsertMessage,
        KillCursorsMessage,
        Message,
        MessageBody,
        MessageFlags,
        MessageSection,
        OpMsg,
        QueryFlags,
        QueryMessage,
        ReplyFlags,
        ReplyMessage,
        UpdateFlags,
        UpdateMessage,
        MAX_MESSAGE_SIZE_BYTES,
    },
};
