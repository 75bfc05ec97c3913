use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use objguard_core::grant::{EntityRef, Grant, GrantFilter, ObjectRef, Permission, SnapshotToken};
use objguard_core::group::{
    GroupFilter, GroupId, GroupUpdate, PermissionGroup, PermissionGroupKey,
};
use objguard_core::store::{
    GrantStore, ObjectLifecycle, PermissionCatalog, PermissionGroupStore, PurgeSummary,
    SnapshotSource, StorageError,
};

const ACTIVE_TX_ID: u64 = u64::MAX;

#[derive(Debug, Clone)]
struct Versioned<T> {
    value: T,
    created_tx_id: u64,
    deleted_tx_id: u64,
}

impl<T> Versioned<T> {
    fn new(value: T, tx_id: u64) -> Self {
        Self {
            value,
            created_tx_id: tx_id,
            deleted_tx_id: ACTIVE_TX_ID,
        }
    }

    fn is_active(&self) -> bool {
        self.deleted_tx_id == ACTIVE_TX_ID
    }

    fn visible_at(&self, snapshot: u64) -> bool {
        self.created_tx_id <= snapshot && self.deleted_tx_id > snapshot
    }
}

#[derive(Debug, Clone)]
struct StoredGroup {
    id: GroupId,
    name: String,
    target: ObjectRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Membership {
    group: GroupId,
    entity: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupPermission {
    group: GroupId,
    permission: Permission,
}

#[derive(Debug, Default)]
struct InnerState {
    current_tx: u64,
    permissions: Vec<Permission>,
    grants: Vec<Versioned<Grant>>,
    groups: Vec<Versioned<StoredGroup>>,
    memberships: Vec<Versioned<Membership>>,
    group_permissions: Vec<Versioned<GroupPermission>>,
}

impl InnerState {
    fn next_tx(&mut self) -> u64 {
        self.current_tx += 1;
        self.current_tx
    }

    fn resolve_snapshot(&self, snapshot: Option<SnapshotToken>) -> Result<u64, StorageError> {
        match snapshot {
            Some(token) => {
                let val = token.value();
                if val > self.current_tx {
                    return Err(StorageError::SnapshotAhead {
                        requested: val,
                        current: self.current_tx,
                    });
                }
                Ok(val)
            }
            None => Ok(self.current_tx),
        }
    }

    fn active_group(&self, key: &PermissionGroupKey) -> Option<&StoredGroup> {
        self.groups
            .iter()
            .find(|g| g.is_active() && g.value.name == key.name && g.value.target == key.target)
            .map(|g| &g.value)
    }

    fn group_at(&self, stored: &StoredGroup, snapshot: u64) -> PermissionGroup {
        let permissions = self
            .group_permissions
            .iter()
            .filter(|p| p.visible_at(snapshot) && p.value.group == stored.id)
            .map(|p| p.value.permission.clone())
            .collect();
        let members = self
            .memberships
            .iter()
            .filter(|m| m.visible_at(snapshot) && m.value.group == stored.id)
            .map(|m| m.value.entity.clone())
            .collect();

        PermissionGroup {
            id: stored.id,
            name: stored.name.clone(),
            target: stored.target.clone(),
            permissions,
            members,
        }
    }

    /// Marks a group and everything attached to it deleted at `tx_id`.
    fn retire_group(&mut self, id: GroupId, tx_id: u64) {
        for group in &mut self.groups {
            if group.is_active() && group.value.id == id {
                group.deleted_tx_id = tx_id;
            }
        }
        for membership in &mut self.memberships {
            if membership.is_active() && membership.value.group == id {
                membership.deleted_tx_id = tx_id;
            }
        }
        for permission in &mut self.group_permissions {
            if permission.is_active() && permission.value.group == id {
                permission.deleted_tx_id = tx_id;
            }
        }
    }
}

/// Single-process store. One lock guards every table, so each trait method
/// is atomic with respect to concurrent callers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotSource for InMemoryStore {
    async fn snapshot(&self) -> Result<SnapshotToken, StorageError> {
        Ok(SnapshotToken::new(self.lock().current_tx))
    }
}

impl PermissionCatalog for InMemoryStore {
    async fn register_permission(&self, permission: &Permission) -> Result<bool, StorageError> {
        let mut state = self.lock();
        if state.permissions.contains(permission) {
            return Ok(false);
        }
        state.permissions.push(permission.clone());
        Ok(true)
    }

    async fn find_permissions(
        &self,
        codename: &str,
        object_type: Option<Option<&str>>,
    ) -> Result<Vec<Permission>, StorageError> {
        let state = self.lock();
        Ok(state
            .permissions
            .iter()
            .filter(|p| p.codename == codename)
            .filter(|p| match object_type {
                Some(object_type) => p.object_type.as_deref() == object_type,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StorageError> {
        Ok(self.lock().permissions.clone())
    }
}

impl GrantStore for InMemoryStore {
    async fn insert_grant(&self, grant: &Grant) -> Result<bool, StorageError> {
        let mut state = self.lock();
        if state
            .grants
            .iter()
            .any(|g| g.is_active() && &g.value == grant)
        {
            return Ok(false);
        }
        let tx_id = state.next_tx();
        state.grants.push(Versioned::new(grant.clone(), tx_id));
        Ok(true)
    }

    async fn delete_grants(&self, filter: &GrantFilter) -> Result<usize, StorageError> {
        let mut state = self.lock();
        let matching = state
            .grants
            .iter()
            .filter(|g| g.is_active() && filter.matches(&g.value))
            .count();
        if matching == 0 {
            return Ok(0);
        }

        let tx_id = state.next_tx();
        for grant in &mut state.grants {
            if grant.is_active() && filter.matches(&grant.value) {
                grant.deleted_tx_id = tx_id;
            }
        }
        Ok(matching)
    }

    async fn read_grants(
        &self,
        filter: &GrantFilter,
        snapshot: Option<SnapshotToken>,
    ) -> Result<Vec<Grant>, StorageError> {
        let state = self.lock();
        let snap = state.resolve_snapshot(snapshot)?;

        Ok(state
            .grants
            .iter()
            .filter(|g| g.visible_at(snap) && filter.matches(&g.value))
            .map(|g| g.value.clone())
            .collect())
    }
}

impl PermissionGroupStore for InMemoryStore {
    async fn create_group(
        &self,
        name: &str,
        target: &ObjectRef,
        permissions: &BTreeSet<Permission>,
    ) -> Result<(PermissionGroup, bool), StorageError> {
        let mut state = self.lock();
        let key = PermissionGroupKey::new(name, target.clone());
        if let Some(existing) = state.active_group(&key) {
            let group = state.group_at(existing, state.current_tx);
            return Ok((group, false));
        }

        let tx_id = state.next_tx();
        let stored = StoredGroup {
            id: GroupId::generate(),
            name: name.to_string(),
            target: target.clone(),
        };
        for permission in permissions {
            state.group_permissions.push(Versioned::new(
                GroupPermission {
                    group: stored.id,
                    permission: permission.clone(),
                },
                tx_id,
            ));
        }
        let group = PermissionGroup {
            id: stored.id,
            name: stored.name.clone(),
            target: stored.target.clone(),
            permissions: permissions.clone(),
            members: Vec::new(),
        };
        state.groups.push(Versioned::new(stored, tx_id));
        Ok((group, true))
    }

    async fn retrieve_group(
        &self,
        key: &PermissionGroupKey,
        snapshot: Option<SnapshotToken>,
    ) -> Result<Option<PermissionGroup>, StorageError> {
        let state = self.lock();
        let snap = state.resolve_snapshot(snapshot)?;

        Ok(state
            .groups
            .iter()
            .find(|g| {
                g.visible_at(snap) && g.value.name == key.name && g.value.target == key.target
            })
            .map(|g| state.group_at(&g.value, snap)))
    }

    async fn delete_group(&self, key: &PermissionGroupKey) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let Some(id) = state.active_group(key).map(|g| g.id) else {
            return Ok(false);
        };
        let tx_id = state.next_tx();
        state.retire_group(id, tx_id);
        Ok(true)
    }

    async fn add_member(
        &self,
        key: &PermissionGroupKey,
        entity: &EntityRef,
    ) -> Result<GroupUpdate, StorageError> {
        let mut state = self.lock();
        let Some(id) = state.active_group(key).map(|g| g.id) else {
            return Ok(GroupUpdate::GroupMissing);
        };
        let membership = Membership {
            group: id,
            entity: entity.clone(),
        };
        if state
            .memberships
            .iter()
            .any(|m| m.is_active() && m.value == membership)
        {
            return Ok(GroupUpdate::Unchanged);
        }
        let tx_id = state.next_tx();
        state.memberships.push(Versioned::new(membership, tx_id));
        Ok(GroupUpdate::Applied)
    }

    async fn remove_member(
        &self,
        key: &PermissionGroupKey,
        entity: &EntityRef,
    ) -> Result<GroupUpdate, StorageError> {
        let mut state = self.lock();
        let Some(id) = state.active_group(key).map(|g| g.id) else {
            return Ok(GroupUpdate::GroupMissing);
        };
        let membership = Membership {
            group: id,
            entity: entity.clone(),
        };
        let Some(index) = state
            .memberships
            .iter()
            .position(|m| m.is_active() && m.value == membership)
        else {
            return Ok(GroupUpdate::Unchanged);
        };
        let tx_id = state.next_tx();
        state.memberships[index].deleted_tx_id = tx_id;
        Ok(GroupUpdate::Applied)
    }

    async fn add_group_permission(
        &self,
        key: &PermissionGroupKey,
        permission: &Permission,
    ) -> Result<GroupUpdate, StorageError> {
        let mut state = self.lock();
        let Some(id) = state.active_group(key).map(|g| g.id) else {
            return Ok(GroupUpdate::GroupMissing);
        };
        let row = GroupPermission {
            group: id,
            permission: permission.clone(),
        };
        if state
            .group_permissions
            .iter()
            .any(|p| p.is_active() && p.value == row)
        {
            return Ok(GroupUpdate::Unchanged);
        }
        let tx_id = state.next_tx();
        state.group_permissions.push(Versioned::new(row, tx_id));
        Ok(GroupUpdate::Applied)
    }

    async fn remove_group_permission(
        &self,
        key: &PermissionGroupKey,
        codename: &str,
    ) -> Result<GroupUpdate, StorageError> {
        let mut state = self.lock();
        let Some(id) = state.active_group(key).map(|g| g.id) else {
            return Ok(GroupUpdate::GroupMissing);
        };
        let matching: Vec<usize> = state
            .group_permissions
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.is_active() && p.value.group == id && p.value.permission.codename == codename
            })
            .map(|(index, _)| index)
            .collect();
        if matching.is_empty() {
            return Ok(GroupUpdate::Unchanged);
        }
        let tx_id = state.next_tx();
        for index in matching {
            state.group_permissions[index].deleted_tx_id = tx_id;
        }
        Ok(GroupUpdate::Applied)
    }

    async fn read_groups(
        &self,
        filter: &GroupFilter,
        snapshot: Option<SnapshotToken>,
    ) -> Result<Vec<PermissionGroup>, StorageError> {
        let state = self.lock();
        let snap = state.resolve_snapshot(snapshot)?;

        Ok(state
            .groups
            .iter()
            .filter(|g| g.visible_at(snap))
            .map(|g| state.group_at(&g.value, snap))
            .filter(|g| filter.matches(g))
            .collect())
    }
}

impl ObjectLifecycle for InMemoryStore {
    async fn purge_object(&self, object: &ObjectRef) -> Result<PurgeSummary, StorageError> {
        let mut state = self.lock();
        let grant_count = state
            .grants
            .iter()
            .filter(|g| g.is_active() && g.value.object.as_ref() == Some(object))
            .count();
        let group_ids: Vec<GroupId> = state
            .groups
            .iter()
            .filter(|g| g.is_active() && &g.value.target == object)
            .map(|g| g.value.id)
            .collect();

        let summary = PurgeSummary {
            grants: grant_count,
            groups: group_ids.len(),
        };
        if summary == PurgeSummary::default() {
            return Ok(summary);
        }

        let tx_id = state.next_tx();
        for grant in &mut state.grants {
            if grant.is_active() && grant.value.object.as_ref() == Some(object) {
                grant.deleted_tx_id = tx_id;
            }
        }
        for id in group_ids {
            state.retire_group(id, tx_id);
        }
        Ok(summary)
    }
}
