//! Connector runtime: the capability contract every source implements, the
//! name-keyed registry, and the dispatcher that routes classified entries
//! into the entities processor.

mod connector;
mod dispatcher;

pub use connector::{Connector, ConnectorContext, ConnectorRegistry, SyncRunGuard};
pub use dispatcher::{RecordDispatcher, DEFAULT_BATCH_SIZE};
