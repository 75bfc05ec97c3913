use std::collections::BTreeSet;
use std::future::Future;

use crate::grant::{EntityRef, Grant, GrantFilter, ObjectRef, Permission, SnapshotToken};
use crate::group::{GroupFilter, GroupUpdate, PermissionGroup, PermissionGroupKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("snapshot {requested} is ahead of current {current}")]
    SnapshotAhead { requested: u64, current: u64 },

    #[error("invalid storage namespace: {0}")]
    InvalidNamespace(String),

    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Rows removed by [`ObjectLifecycle::purge_object`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub grants: usize,
    pub groups: usize,
}

pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> impl Future<Output = Result<SnapshotToken, StorageError>> + Send;
}

pub trait PermissionCatalog: Send + Sync {
    /// Get-or-create. Returns `true` when the permission was newly added.
    fn register_permission(
        &self,
        permission: &Permission,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// `object_type`: `None` = any type, `Some(None)` = untyped only.
    fn find_permissions(
        &self,
        codename: &str,
        object_type: Option<Option<&str>>,
    ) -> impl Future<Output = Result<Vec<Permission>, StorageError>> + Send;

    fn list_permissions(&self) -> impl Future<Output = Result<Vec<Permission>, StorageError>> + Send;
}

pub trait GrantStore: SnapshotSource {
    /// Idempotent. Returns `false` when an identical grant was already active.
    fn insert_grant(&self, grant: &Grant) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Returns the number of grants removed.
    fn delete_grants(
        &self,
        filter: &GrantFilter,
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    /// Matching grants in insertion order.
    fn read_grants(
        &self,
        filter: &GrantFilter,
        snapshot: Option<SnapshotToken>,
    ) -> impl Future<Output = Result<Vec<Grant>, StorageError>> + Send;
}

pub trait PermissionGroupStore: SnapshotSource {
    /// Get-or-create by `(name, target)`. The flag is `true` when the group was
    /// created; an existing group is returned untouched.
    fn create_group(
        &self,
        name: &str,
        target: &ObjectRef,
        permissions: &BTreeSet<Permission>,
    ) -> impl Future<Output = Result<(PermissionGroup, bool), StorageError>> + Send;

    fn retrieve_group(
        &self,
        key: &PermissionGroupKey,
        snapshot: Option<SnapshotToken>,
    ) -> impl Future<Output = Result<Option<PermissionGroup>, StorageError>> + Send;

    /// Removes the group with its memberships and permissions.
    fn delete_group(
        &self,
        key: &PermissionGroupKey,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn add_member(
        &self,
        key: &PermissionGroupKey,
        entity: &EntityRef,
    ) -> impl Future<Output = Result<GroupUpdate, StorageError>> + Send;

    fn remove_member(
        &self,
        key: &PermissionGroupKey,
        entity: &EntityRef,
    ) -> impl Future<Output = Result<GroupUpdate, StorageError>> + Send;

    fn add_group_permission(
        &self,
        key: &PermissionGroupKey,
        permission: &Permission,
    ) -> impl Future<Output = Result<GroupUpdate, StorageError>> + Send;

    /// Retires every permission with `codename` in one transaction,
    /// whatever its type scope.
    fn remove_group_permission(
        &self,
        key: &PermissionGroupKey,
        codename: &str,
    ) -> impl Future<Output = Result<GroupUpdate, StorageError>> + Send;

    /// Matching groups in creation order.
    fn read_groups(
        &self,
        filter: &GroupFilter,
        snapshot: Option<SnapshotToken>,
    ) -> impl Future<Output = Result<Vec<PermissionGroup>, StorageError>> + Send;
}

pub trait ObjectLifecycle: Send + Sync {
    /// Cascade for a destroyed object: atomically drops every grant on it and
    /// every group targeting it.
    fn purge_object(
        &self,
        object: &ObjectRef,
    ) -> impl Future<Output = Result<PurgeSummary, StorageError>> + Send;
}

/// Everything the engine needs from persistence.
pub trait PermissionStore:
    PermissionCatalog + GrantStore + PermissionGroupStore + ObjectLifecycle
{
}

impl<T> PermissionStore for T where
    T: PermissionCatalog + GrantStore + PermissionGroupStore + ObjectLifecycle
{
}
