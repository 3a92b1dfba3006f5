//! Knowflow core
//!
//! The ingestion half of the Knowflow platform: connector sync runtime,
//! entities processor, blob transformer, and the narrow contracts the core
//! consumes (graph store, blob store, sync points, messaging).
//!
//! The crate is organised the way the data flows:
//!
//! - [`sync`] drives per-source sync loops and classifies observed entries
//!   into [`models::RecordUpdate`]s,
//! - [`processor`] is the single funnel through which normalized records,
//!   groups, users, and permissions reach the graph and the message bus,
//! - [`transformer`] writes compressed record payloads to blob storage and
//!   maintains the virtual-record-id mapping,
//! - [`storage`] and [`messaging`] hold the external contracts, and
//! - [`migrations`] runs idempotent, flag-gated data migrations.
//!
//! External stores are consumed behind traits; `knowflow-testing` provides
//! in-memory implementations for all of them.

pub mod core;
pub mod messaging;
pub mod migrations;
pub mod models;
pub mod processor;
pub mod storage;
pub mod sync;
pub mod transformer;

pub use crate::core::error::{Error, Result};
