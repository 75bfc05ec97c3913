use crate::grant::{EntityRef, GrantFilter, ObjectRef, SnapshotToken};
use crate::group::GroupFilter;
use crate::identity::IdentityProvider;
use crate::store::PermissionStore;

use super::{EngineError, PermissionEngine};

impl<S: PermissionStore, I: IdentityProvider> PermissionEngine<S, I> {
    /// True only when every entity holds `perm`, on `object` or globally for
    /// `object_type`. An empty entity list is never authorized.
    pub async fn has_perm(
        &self,
        entities: &[EntityRef],
        perm: &str,
        object: Option<&ObjectRef>,
        object_type: Option<&str>,
    ) -> Result<bool, EngineError> {
        let snapshot = self.store.snapshot().await?;
        self.has_perm_at(entities, perm, object, object_type, snapshot)
            .await
    }

    /// `has_perm` for every user, and additionally at least one platform
    /// group or permission group of one of the users holds `perm` itself.
    pub async fn has_gross_perm(
        &self,
        users: &[EntityRef],
        perm: &str,
        object: Option<&ObjectRef>,
        object_type: Option<&str>,
    ) -> Result<bool, EngineError> {
        if let Some(group) = users.iter().find(|e| e.is_group()) {
            return Err(EngineError::InvalidArgument(format!(
                "has_gross_perm takes users only, got {group}"
            )));
        }

        let snapshot = self.store.snapshot().await?;
        if !self
            .has_perm_at(users, perm, object, object_type, snapshot)
            .await?
        {
            return Ok(false);
        }

        for user in users {
            for group in self.identity.groups_of(user).await? {
                if self
                    .has_perm_at(
                        std::slice::from_ref(&group),
                        perm,
                        object,
                        object_type,
                        snapshot,
                    )
                    .await?
                {
                    tracing::debug!(user = %user, via = %group, perm, "gross permission via platform group");
                    return Ok(true);
                }
            }

            if let Some(object) = object
                && self
                    .member_of_granting_group(user, perm, object, snapshot)
                    .await?
            {
                tracing::debug!(user = %user, perm, object = %object, "gross permission via permission group");
                return Ok(true);
            }
        }

        tracing::debug!(perm, "no group of the given users holds the permission");
        Ok(false)
    }

    pub(super) async fn has_perm_at(
        &self,
        entities: &[EntityRef],
        perm: &str,
        object: Option<&ObjectRef>,
        object_type: Option<&str>,
        snapshot: SnapshotToken,
    ) -> Result<bool, EngineError> {
        if entities.is_empty() {
            tracing::debug!(perm, "denied: no entities given");
            return Ok(false);
        }
        let global_type = match object {
            Some(_) => None,
            None => Some(object_type.ok_or_else(|| {
                EngineError::InvalidArgument(
                    "a global permission check needs an object type".to_string(),
                )
            })?),
        };

        // Looked up once, after the first entity that is not a superuser.
        let mut defined: Option<bool> = None;

        for entity in entities {
            let state = self.identity.state_of(entity).await?;
            if !state.active {
                tracing::debug!(entity = %entity, perm, "denied: entity inactive");
                return Ok(false);
            }
            if state.superuser {
                continue;
            }
            if !state.authenticated {
                tracing::debug!(entity = %entity, perm, "denied: entity not authenticated");
                return Ok(false);
            }

            let holds = match (object, global_type) {
                (Some(object), _) => {
                    if defined.is_none() {
                        let found = self.store.find_permissions(perm, None).await?;
                        defined = Some(!found.is_empty());
                    }
                    if defined == Some(false) {
                        tracing::debug!(perm, "denied: permission undefined");
                        return Ok(false);
                    }
                    self.holds_on_object(entity, perm, object, snapshot).await?
                }
                (None, Some(object_type)) => {
                    self.holds_globally(entity, perm, object_type, snapshot)
                        .await?
                }
                (None, None) => false,
            };

            if !holds {
                tracing::debug!(entity = %entity, perm, "denied: no matching grant");
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn holds_globally(
        &self,
        entity: &EntityRef,
        perm: &str,
        object_type: &str,
        snapshot: SnapshotToken,
    ) -> Result<bool, EngineError> {
        let filter = GrantFilter {
            permission_type: Some(Some(object_type.to_string())),
            object: Some(None),
            ..GrantFilter::for_entity(entity).with_codenames([perm])
        };
        let grants = self.store.read_grants(&filter, Some(snapshot)).await?;
        Ok(!grants.is_empty())
    }

    async fn holds_on_object(
        &self,
        entity: &EntityRef,
        perm: &str,
        object: &ObjectRef,
        snapshot: SnapshotToken,
    ) -> Result<bool, EngineError> {
        let filter = GrantFilter {
            object: Some(Some(object.clone())),
            ..GrantFilter::for_entity(entity).with_codenames([perm])
        };
        if !self
            .store
            .read_grants(&filter, Some(snapshot))
            .await?
            .is_empty()
        {
            return Ok(true);
        }

        // Permission groups only enroll users.
        if entity.is_user() {
            return self
                .member_of_granting_group(entity, perm, object, snapshot)
                .await;
        }
        Ok(false)
    }

    async fn member_of_granting_group(
        &self,
        user: &EntityRef,
        perm: &str,
        object: &ObjectRef,
        snapshot: SnapshotToken,
    ) -> Result<bool, EngineError> {
        let filter = GroupFilter {
            target: Some(object.clone()),
            member: Some(user.clone()),
            codenames: Some(vec![perm.to_string()]),
            ..Default::default()
        };
        let groups = self.store.read_groups(&filter, Some(snapshot)).await?;
        Ok(groups.iter().any(|g| g.grants(perm, object)))
    }
}
