mod check;
mod groups;
mod lookup;

use std::sync::Arc;

use crate::audit;
use crate::grant::{EntityRef, Grant, GrantFilter, ObjectRef, Permission};
use crate::identity::IdentityProvider;
use crate::store::{PermissionStore, PurgeSummary, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission '{codename}' not found for type '{}'", object_type.as_deref().unwrap_or("<any>"))]
    PermissionNotFound {
        codename: String,
        object_type: Option<String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission group '{name}' already exists for {target}")]
    AlreadyExists { name: String, target: ObjectRef },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}

/// What `create_group` does when `(name, target)` is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupCreatePolicy {
    #[default]
    GetOrCreate,
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Register unknown permissions on first grant instead of failing.
    pub auto_create_permissions: bool,
    pub group_create_policy: GroupCreatePolicy,
}

pub struct PermissionEngine<S: PermissionStore, I: IdentityProvider> {
    store: Arc<S>,
    identity: Arc<I>,
    config: EngineConfig,
}

/// The type a grant is scoped to: the object's own type when there is one.
fn scope_type<'a>(
    object: Option<&'a ObjectRef>,
    object_type: Option<&'a str>,
) -> Result<&'a str, EngineError> {
    match (object, object_type) {
        (Some(object), _) => Ok(object.object_type.as_str()),
        (None, Some(object_type)) => Ok(object_type),
        (None, None) => Err(EngineError::InvalidArgument(
            "either an object or an object type is required".to_string(),
        )),
    }
}

impl<S: PermissionStore, I: IdentityProvider> PermissionEngine<S, I> {
    pub fn new(store: Arc<S>, identity: Arc<I>, config: EngineConfig) -> Self {
        Self {
            store,
            identity,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Adds `permission` to the catalog. Returns `true` when it was new.
    pub async fn register_permission(
        &self,
        codename: &str,
        object_type: Option<&str>,
    ) -> Result<bool, EngineError> {
        if codename.is_empty() {
            return Err(EngineError::InvalidArgument(
                "permission codename must not be empty".to_string(),
            ));
        }
        let permission = Permission {
            codename: codename.to_string(),
            object_type: object_type.map(str::to_string),
        };
        let created = self.store.register_permission(&permission).await?;
        if created {
            tracing::debug!(permission = %permission, "permission registered");
        }
        Ok(created)
    }

    /// Grants `perm` to `entity` on `object`, or globally for `object_type`.
    /// Idempotent: returns `false` when the grant already existed.
    pub async fn set_perm(
        &self,
        entity: &EntityRef,
        perm: &str,
        object: Option<&ObjectRef>,
        object_type: Option<&str>,
    ) -> Result<bool, EngineError> {
        let permission = Permission::typed(perm, scope_type(object, object_type)?);
        if !self.permission_defined(&permission).await? {
            if !self.config.auto_create_permissions {
                return Err(not_found(&permission));
            }
            self.store.register_permission(&permission).await?;
        }

        let grant = Grant {
            entity: entity.clone(),
            permission,
            object: object.cloned(),
        };
        let created = self.store.insert_grant(&grant).await?;
        audit::audit_grant_set(&grant, created);
        Ok(created)
    }

    /// Revokes the grant `set_perm` would have created. Returns whether a
    /// grant was actually removed.
    pub async fn lift_perm(
        &self,
        entity: &EntityRef,
        perm: &str,
        object: Option<&ObjectRef>,
        object_type: Option<&str>,
    ) -> Result<bool, EngineError> {
        let permission = Permission::typed(perm, scope_type(object, object_type)?);
        if !self.permission_defined(&permission).await? {
            if self.config.auto_create_permissions {
                return Ok(false);
            }
            return Err(not_found(&permission));
        }

        let grant = Grant {
            entity: entity.clone(),
            permission,
            object: object.cloned(),
        };
        let removed = self.store.delete_grants(&GrantFilter::exact(&grant)).await? > 0;
        audit::audit_grant_lifted(&grant, removed);
        Ok(removed)
    }

    /// Cascade hook for a destroyed object: drops every grant on it and every
    /// permission group targeting it.
    pub async fn object_deleted(&self, object: &ObjectRef) -> Result<PurgeSummary, EngineError> {
        let summary = self.store.purge_object(object).await?;
        audit::audit_object_purged(object, &summary);
        Ok(summary)
    }

    async fn permission_defined(&self, permission: &Permission) -> Result<bool, EngineError> {
        let found = self
            .store
            .find_permissions(&permission.codename, Some(permission.object_type.as_deref()))
            .await?;
        Ok(!found.is_empty())
    }
}

fn not_found(permission: &Permission) -> EngineError {
    EngineError::PermissionNotFound {
        codename: permission.codename.clone(),
        object_type: permission.object_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_prefers_object_type() {
        let post = ObjectRef::new("blog.post", "1");

        assert_eq!(
            scope_type(Some(&post), Some("blog.comment")).unwrap(),
            "blog.post"
        );
        assert_eq!(scope_type(None, Some("blog.comment")).unwrap(), "blog.comment");
    }

    #[test]
    fn scope_requires_object_or_type() {
        let err = scope_type(None, None).unwrap_err();

        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn default_config_is_get_or_create_without_auto_create() {
        let config = EngineConfig::default();

        assert!(!config.auto_create_permissions);
        assert_eq!(config.group_create_policy, GroupCreatePolicy::GetOrCreate);
    }

    #[test]
    fn permission_not_found_display_names_type() {
        let typed = not_found(&Permission::typed("view_post", "blog.post"));
        let untyped = not_found(&Permission::untyped("audit"));

        assert_eq!(
            typed.to_string(),
            "permission 'view_post' not found for type 'blog.post'"
        );
        assert_eq!(
            untyped.to_string(),
            "permission 'audit' not found for type '<any>'"
        );
    }

    #[test]
    fn storage_errors_convert_to_store_unavailable() {
        let err: EngineError = StorageError::Internal("connection reset".to_string()).into();

        assert!(matches!(err, EngineError::StoreUnavailable(_)));
        assert_eq!(
            err.to_string(),
            "store unavailable: internal storage error: connection reset"
        );
    }
}
