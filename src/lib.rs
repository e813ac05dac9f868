#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::cast_possible_truncation)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
pub mod bson;

pub mod options;

mod bson_util;
mod client;
mod cmap;
mod coll;
mod compression;
mod concern;
mod cursor;
mod db;
pub mod error;
mod hello;
mod operation;
pub mod results;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
#[cfg(test)]
mod test_util;

pub use crate::{
    client::Client,
    coll::{bulk::WriteModel, Collection, Namespace},
    cursor::Cursor,
    db::Database,
};

pub use sdam::{public::*, ServerType, TopologyType};

/// A boxed future.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
