use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseRefError {
    #[error("expected '<type>:<id>', got '{0}'")]
    MissingSeparator(String),

    #[error("unknown entity kind '{0}' (expected 'user' or 'group')")]
    UnknownKind(String),

    #[error("empty type or id in '{0}'")]
    EmptyComponent(String),
}

fn split_ref(value: &str) -> Result<(&str, &str), ParseRefError> {
    let (head, tail) = value
        .split_once(':')
        .ok_or_else(|| ParseRefError::MissingSeparator(value.to_string()))?;
    if head.is_empty() || tail.is_empty() {
        return Err(ParseRefError::EmptyComponent(value.to_string()));
    }
    Ok((head, tail))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    User,
    Group,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Group => "group",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EntityKind::User),
            "group" => Ok(EntityKind::Group),
            other => Err(ParseRefError::UnknownKind(other.to_string())),
        }
    }
}

/// The "who" of a permission check: a user or a platform group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(EntityKind::User, id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Group, id)
    }

    pub fn is_user(&self) -> bool {
        self.kind == EntityKind::User
    }

    pub fn is_group(&self) -> bool {
        self.kind == EntityKind::Group
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = split_ref(s)?;
        Ok(Self::new(kind.parse()?, id))
    }
}

/// The "what" of a permission check. Equal iff both the type tag and the id match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

impl FromStr for ObjectRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_type, object_id) = split_ref(s)?;
        Ok(Self::new(object_type, object_id))
    }
}

/// A named capability. Deduplicated by `(codename, object_type)`; the same
/// codename may exist for several types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    pub codename: String,
    pub object_type: Option<String>,
}

impl Permission {
    pub fn typed(codename: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            codename: codename.into(),
            object_type: Some(object_type.into()),
        }
    }

    pub fn untyped(codename: impl Into<String>) -> Self {
        Self {
            codename: codename.into(),
            object_type: None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object_type {
            Some(ref object_type) => write!(f, "{object_type}.{}", self.codename),
            None => f.write_str(&self.codename),
        }
    }
}

/// "`entity` holds `permission` on `object`", or globally when `object` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grant {
    pub entity: EntityRef,
    pub permission: Permission,
    pub object: Option<ObjectRef>,
}

impl Grant {
    pub fn on_object(entity: EntityRef, codename: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            entity,
            permission: Permission::typed(codename, object.object_type.clone()),
            object: Some(object),
        }
    }

    pub fn global(entity: EntityRef, permission: Permission) -> Self {
        Self {
            entity,
            permission,
            object: None,
        }
    }

    pub fn is_global(&self) -> bool {
        self.object.is_none()
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object {
            Some(ref object) => write!(
                f,
                "{} has {} on {object}",
                self.entity, self.permission.codename
            ),
            None => write!(f, "{} has {} globally", self.entity, self.permission),
        }
    }
}

/// Selects grants. Every `None` field matches anything.
///
/// `permission_type` and `object` use a nested option: `Some(None)` matches
/// only untyped permissions / global grants respectively. `object_type`
/// restricts to object grants whose object has that type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantFilter {
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<String>,
    pub codenames: Option<Vec<String>>,
    pub permission_type: Option<Option<String>>,
    pub object: Option<Option<ObjectRef>>,
    pub object_type: Option<String>,
}

impl GrantFilter {
    pub fn for_entity(entity: &EntityRef) -> Self {
        Self {
            entity_kind: Some(entity.kind),
            entity_id: Some(entity.id.clone()),
            ..Default::default()
        }
    }

    /// Matches exactly the stored form of `grant`.
    pub fn exact(grant: &Grant) -> Self {
        Self {
            codenames: Some(vec![grant.permission.codename.clone()]),
            permission_type: Some(grant.permission.object_type.clone()),
            object: Some(grant.object.clone()),
            ..Self::for_entity(&grant.entity)
        }
    }

    pub fn with_codenames<I, C>(mut self, codenames: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.codenames = Some(codenames.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, grant: &Grant) -> bool {
        if let Some(ref kind) = self.entity_kind
            && kind != &grant.entity.kind
        {
            return false;
        }
        if let Some(ref id) = self.entity_id
            && id != &grant.entity.id
        {
            return false;
        }
        if let Some(ref codenames) = self.codenames
            && !codenames.contains(&grant.permission.codename)
        {
            return false;
        }
        if let Some(ref pt) = self.permission_type
            && pt != &grant.permission.object_type
        {
            return false;
        }
        if let Some(ref object) = self.object
            && object != &grant.object
        {
            return false;
        }
        if let Some(ref ot) = self.object_type {
            match grant.object {
                Some(ref object) if &object.object_type == ot => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotToken(u64);

impl SnapshotToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
