pub(crate) mod conn;
pub(crate) mod establish;

pub(crate) use self::conn::{
    command::{Command, RawCommandResponse},
    stream_description::StreamDescription,
    wire,
    Connection,
};
