pub mod audit;
pub mod engine;
pub mod grant;
pub mod group;
pub mod identity;
pub mod resolver;
pub mod store;

pub use engine::{EngineConfig, EngineError, GroupCreatePolicy, PermissionEngine};
pub use grant::{EntityKind, EntityRef, Grant, GrantFilter, ObjectRef, Permission, SnapshotToken};
pub use group::{GroupId, PermissionGroup, PermissionGroupKey};
pub use identity::{EntityState, IdentityProvider};
pub use resolver::ObjectResolver;
pub use store::{PermissionStore, PurgeSummary, StorageError};
