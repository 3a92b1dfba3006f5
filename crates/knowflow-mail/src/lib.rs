//! Mailbox connector
//!
//! Labels become record groups, messages become MAIL records, and message
//! attachments become FILE records parented on their mail. Incremental runs
//! replay the mailbox history feed from the stored history id; the id is
//! captured from the profile *before* the full listing so the first
//! incremental run overlaps rather than misses.

pub mod api;
mod connector;

pub use api::{HttpMailApi, MailApi, MailAttachment, MailLabel, MailMessage, MailProfile};
pub use connector::{MailConnector, CONNECTOR_NAME};
