//! Contracts for the stores the core consumes, plus the HTTP blob client.

pub mod blob;
pub mod compression;
pub mod graph;
pub mod sync_point;
