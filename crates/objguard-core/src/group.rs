use std::collections::BTreeSet;
use std::fmt;

use uuid::Uuid;

use crate::grant::{EntityRef, ObjectRef, Permission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(Uuid);

impl GroupId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for GroupId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a permission group: names are unique per target, not globally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionGroupKey {
    pub name: String,
    pub target: ObjectRef,
}

impl PermissionGroupKey {
    pub fn new(name: impl Into<String>, target: ObjectRef) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }
}

impl fmt::Display for PermissionGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.target)
    }
}

/// A named bundle of permissions and members scoped to one target object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGroup {
    pub id: GroupId,
    pub name: String,
    pub target: ObjectRef,
    pub permissions: BTreeSet<Permission>,
    pub members: Vec<EntityRef>,
}

impl PermissionGroup {
    pub fn key(&self) -> PermissionGroupKey {
        PermissionGroupKey::new(self.name.clone(), self.target.clone())
    }

    pub fn has_member(&self, entity: &EntityRef) -> bool {
        self.members.contains(entity)
    }

    pub fn contains_codename(&self, codename: &str) -> bool {
        self.permissions.iter().any(|p| p.codename == codename)
    }

    /// True when this group confers `codename` on `object`.
    pub fn grants(&self, codename: &str, object: &ObjectRef) -> bool {
        &self.target == object && self.contains_codename(codename)
    }

    pub fn codenames(&self) -> BTreeSet<String> {
        self.permissions.iter().map(|p| p.codename.clone()).collect()
    }
}

/// Selects permission groups. Every `None` field matches anything;
/// `codenames` is any-of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFilter {
    pub name: Option<String>,
    pub target: Option<ObjectRef>,
    pub target_type: Option<String>,
    pub member: Option<EntityRef>,
    pub codenames: Option<Vec<String>>,
}

impl GroupFilter {
    pub fn matches(&self, group: &PermissionGroup) -> bool {
        if let Some(ref name) = self.name
            && name != &group.name
        {
            return false;
        }
        if let Some(ref target) = self.target
            && target != &group.target
        {
            return false;
        }
        if let Some(ref target_type) = self.target_type
            && target_type != &group.target.object_type
        {
            return false;
        }
        if let Some(ref member) = self.member
            && !group.has_member(member)
        {
            return false;
        }
        if let Some(ref codenames) = self.codenames
            && !codenames.iter().any(|c| group.contains_codename(c))
        {
            return false;
        }
        true
    }
}

/// Outcome of a mutation addressed to a group by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupUpdate {
    Applied,
    Unchanged,
    GroupMissing,
}
