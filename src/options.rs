//! Contains all of the types needed to specify options for operations and handles.

pub use crate::{
    client::{
        auth::{AuthMechanism, Credential},
        options::*,
    },
    coll::options::*,
    compression::Compressor,
    concern::*,
    selection_criteria::*,
};
