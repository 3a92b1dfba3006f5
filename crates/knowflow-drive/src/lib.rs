//! Drive connector
//!
//! Syncs a user's personal drive: a full listing on the first run, change
//! replay from the stored page token afterwards. The first incremental run
//! is a superset of writes that raced the full listing because the start
//! token is fetched *before* the listing begins.
//!
//! The source API sits behind [`api::DriveApi`]; [`api::HttpDriveApi`] is
//! the production client, gated by the token manager and the shared "drive"
//! rate-limit bucket.

pub mod api;
mod connector;

pub use api::{DriveAbout, DriveApi, DriveChange, DriveFile, HttpDriveApi};
pub use connector::{DriveConnector, CONNECTOR_NAME};
