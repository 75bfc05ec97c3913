use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use objguard_core::grant::EntityRef;
use objguard_core::identity::{EntityState, IdentityProvider};
use objguard_core::store::StorageError;

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<String, EntityState>,
    // group id -> user ids, in insertion order
    groups: HashMap<String, Vec<String>>,
}

/// Identity provider backed by process memory. Users that were never added
/// resolve to the directory's default state.
#[derive(Debug, Clone)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
    default_state: EntityState,
}

impl InMemoryDirectory {
    /// Unknown users are treated as inactive.
    pub fn new() -> Self {
        Self::with_default(EntityState::inactive())
    }

    /// Unknown users are treated as active, authenticated users.
    pub fn permissive() -> Self {
        Self::with_default(EntityState::active_user())
    }

    pub fn with_default(default_state: EntityState) -> Self {
        Self {
            state: Arc::new(Mutex::new(DirectoryState::default())),
            default_state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, id: impl Into<String>, state: EntityState) {
        self.lock().users.insert(id.into(), state);
    }

    pub fn add_to_group(&self, user_id: impl Into<String>, group_id: impl Into<String>) {
        let user_id = user_id.into();
        let mut state = self.lock();
        let members = state.groups.entry(group_id.into()).or_default();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
    }

    pub fn remove_from_group(&self, user_id: &str, group_id: &str) {
        if let Some(members) = self.lock().groups.get_mut(group_id) {
            members.retain(|m| m != user_id);
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for InMemoryDirectory {
    async fn state_of(&self, entity: &EntityRef) -> Result<EntityState, StorageError> {
        if entity.is_group() {
            return Ok(EntityState::group());
        }
        Ok(self
            .lock()
            .users
            .get(&entity.id)
            .copied()
            .unwrap_or(self.default_state))
    }

    async fn groups_of(&self, user: &EntityRef) -> Result<Vec<EntityRef>, StorageError> {
        if user.is_group() {
            return Ok(Vec::new());
        }
        let state = self.lock();
        let mut groups: Vec<EntityRef> = state
            .groups
            .iter()
            .filter(|(_, members)| members.contains(&user.id))
            .map(|(group, _)| EntityRef::group(group.clone()))
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn members_of(&self, group: &EntityRef) -> Result<Vec<EntityRef>, StorageError> {
        if group.is_user() {
            return Ok(Vec::new());
        }
        Ok(self
            .lock()
            .groups
            .get(&group.id)
            .map(|members| members.iter().map(EntityRef::user).collect())
            .unwrap_or_default())
    }
}
