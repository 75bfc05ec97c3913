use std::collections::BTreeSet;

use crate::audit;
use crate::grant::{EntityRef, ObjectRef, Permission};
use crate::group::{GroupUpdate, PermissionGroup, PermissionGroupKey};
use crate::identity::IdentityProvider;
use crate::store::PermissionStore;

use super::{EngineError, GroupCreatePolicy, PermissionEngine, not_found};

fn group_missing(key: &PermissionGroupKey) -> EngineError {
    EngineError::NotFound(format!("permission group {key}"))
}

impl<S: PermissionStore, I: IdentityProvider> PermissionEngine<S, I> {
    /// Creates the group `name` on `target` holding `perms`. Under
    /// [`GroupCreatePolicy::GetOrCreate`] an existing group is returned as is.
    pub async fn create_group(
        &self,
        name: &str,
        perms: &[&str],
        target: &ObjectRef,
    ) -> Result<PermissionGroup, EngineError> {
        if name.is_empty() {
            return Err(EngineError::InvalidArgument(
                "permission group name must not be empty".to_string(),
            ));
        }

        let mut permissions = BTreeSet::new();
        for perm in perms {
            permissions.insert(self.group_permission(perm, target).await?);
        }

        let (group, created) = self.store.create_group(name, target, &permissions).await?;
        if !created && self.config.group_create_policy == GroupCreatePolicy::Strict {
            return Err(EngineError::AlreadyExists {
                name: name.to_string(),
                target: target.clone(),
            });
        }
        audit::audit_group_created(&group, created);
        Ok(group)
    }

    pub async fn retrieve_group(
        &self,
        key: &PermissionGroupKey,
    ) -> Result<PermissionGroup, EngineError> {
        self.store
            .retrieve_group(key, None)
            .await?
            .ok_or_else(|| group_missing(key))
    }

    /// Returns `false` when no such group existed.
    pub async fn delete_group(&self, key: &PermissionGroupKey) -> Result<bool, EngineError> {
        let removed = self.store.delete_group(key).await?;
        audit::audit_group_deleted(key, removed);
        Ok(removed)
    }

    pub async fn add_member(
        &self,
        key: &PermissionGroupKey,
        entity: &EntityRef,
    ) -> Result<bool, EngineError> {
        let changed = applied(key, self.store.add_member(key, entity).await?)?;
        audit::audit_membership_changed(key, entity, true, changed);
        Ok(changed)
    }

    /// Removing a non-member is a no-op returning `false`.
    pub async fn remove_member(
        &self,
        key: &PermissionGroupKey,
        entity: &EntityRef,
    ) -> Result<bool, EngineError> {
        let changed = applied(key, self.store.remove_member(key, entity).await?)?;
        audit::audit_membership_changed(key, entity, false, changed);
        Ok(changed)
    }

    pub async fn add_group_permission(
        &self,
        key: &PermissionGroupKey,
        perm: &str,
    ) -> Result<bool, EngineError> {
        let permission = self.group_permission(perm, &key.target).await?;
        let changed = applied(key, self.store.add_group_permission(key, &permission).await?)?;
        audit::audit_group_permission_added(key, &permission, changed);
        Ok(changed)
    }

    /// Drops `perm` from the group whatever type it was registered for.
    pub async fn remove_group_permission(
        &self,
        key: &PermissionGroupKey,
        perm: &str,
    ) -> Result<bool, EngineError> {
        let changed = applied(key, self.store.remove_group_permission(key, perm).await?)?;
        audit::audit_group_permission_removed(key, perm, changed);
        Ok(changed)
    }

    /// Resolves `perm` for a group on `target`: a permission typed to the
    /// target's type wins over one with the same codename on another type.
    async fn group_permission(
        &self,
        perm: &str,
        target: &ObjectRef,
    ) -> Result<Permission, EngineError> {
        let typed = self
            .store
            .find_permissions(perm, Some(Some(target.object_type.as_str())))
            .await?;
        if let Some(permission) = typed.into_iter().next() {
            return Ok(permission);
        }

        let any = self.store.find_permissions(perm, None).await?;
        if let Some(permission) = any.into_iter().next() {
            return Ok(permission);
        }

        let permission = Permission::typed(perm, target.object_type.clone());
        if !self.config.auto_create_permissions {
            return Err(not_found(&permission));
        }
        self.store.register_permission(&permission).await?;
        Ok(permission)
    }
}

fn applied(key: &PermissionGroupKey, update: GroupUpdate) -> Result<bool, EngineError> {
    match update {
        GroupUpdate::Applied => Ok(true),
        GroupUpdate::Unchanged => Ok(false),
        GroupUpdate::GroupMissing => Err(group_missing(key)),
    }
}
