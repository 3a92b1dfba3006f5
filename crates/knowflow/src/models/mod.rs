//! Normalized entities shared by every connector and the processor.

pub mod entities;
pub mod permission;
pub mod update;

pub use entities::{
    AppUser, AppUserGroup, ExtractionStatus, IndexingStatus, OriginType, Record, RecordGroup,
    RecordGroupType, RecordType,
};
pub use permission::{EntityType, Permission, PermissionType};
pub use update::RecordUpdate;
