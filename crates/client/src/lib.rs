//! Shake client: the pipeline from transport responses to cached, observable results.
//!
//! A [`Connection`] yields [`Response`]s; the executor threads them through a
//! [`ResultPatcher`] (incremental delivery) and an [`OperationResultBuilder`]
//! (entity normalization) and writes every built result into the operation
//! store, which keeps it fresh as entities change.

#![forbid(unsafe_code)]

mod accessor;
mod builder;
mod config;
mod executor;
mod patcher;
mod transport;

pub use accessor::StoreAccessor;
pub use builder::{JsonResultBuilder, OperationResultBuilder, ResultDataBuilder};
pub use config::ShakeConfig;
pub use executor::{ExecutionStrategy, OperationExecutor, OperationWatch};
pub use patcher::{JsonResultPatcher, PatcherFactory, ResultPatcher};
pub use transport::{Connection, Response, ResponseStream};
