use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

use crate::grant::{EntityKind, EntityRef, GrantFilter, ObjectRef, SnapshotToken};
use crate::group::GroupFilter;
use crate::identity::IdentityProvider;
use crate::resolver::ObjectResolver;
use crate::store::PermissionStore;

use super::{EngineError, PermissionEngine};

/// Drops repeats, keeping the first occurrence of each item.
fn dedup_in_order<T: Clone + Eq + Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn owned_codenames(perms: &[&str]) -> Vec<String> {
    perms.iter().map(|p| p.to_string()).collect()
}

impl<S: PermissionStore, I: IdentityProvider> PermissionEngine<S, I> {
    /// Codenames granted directly to `entity`: globally when `object` is
    /// `None`, on `object` otherwise.
    pub async fn get_perms(
        &self,
        entity: &EntityRef,
        object: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>, EngineError> {
        let snapshot = self.store.snapshot().await?;
        self.direct_perms(entity, object, snapshot).await
    }

    /// Direct permissions plus those held through group membership: platform
    /// groups for global permissions, permission groups for an object.
    pub async fn get_gross_perms(
        &self,
        entity: &EntityRef,
        object: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>, EngineError> {
        let snapshot = self.store.snapshot().await?;
        let mut perms = self.direct_perms(entity, object, snapshot).await?;

        match object {
            None => {
                for group in self.identity.groups_of(entity).await? {
                    perms.extend(self.direct_perms(&group, None, snapshot).await?);
                }
            }
            // Permission groups only enroll users.
            Some(_) if entity.is_group() => {}
            Some(object) => {
                let filter = GroupFilter {
                    target: Some(object.clone()),
                    member: Some(entity.clone()),
                    ..Default::default()
                };
                for group in self.store.read_groups(&filter, Some(snapshot)).await? {
                    perms.extend(group.codenames());
                }
            }
        }

        Ok(perms)
    }

    /// Users holding any of `perms`, in discovery order without repeats.
    /// With `include_group_members`, users reached through platform groups
    /// and permission groups are added after the direct holders.
    pub async fn get_users_with_perms(
        &self,
        perms: &[&str],
        object: Option<&ObjectRef>,
        object_type: Option<&str>,
        include_group_members: bool,
    ) -> Result<Vec<EntityRef>, EngineError> {
        if object.is_none() && object_type.is_none() {
            return Err(EngineError::InvalidArgument(
                "listing global permission holders needs an object type".to_string(),
            ));
        }
        if perms.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.store.snapshot().await?;
        let scope = GrantFilter {
            codenames: Some(owned_codenames(perms)),
            ..Default::default()
        };
        let scope = match object {
            Some(object) => GrantFilter {
                object: Some(Some(object.clone())),
                ..scope
            },
            None => GrantFilter {
                permission_type: Some(object_type.map(str::to_string)),
                object: Some(None),
                ..scope
            },
        };

        let direct = GrantFilter {
            entity_kind: Some(EntityKind::User),
            ..scope.clone()
        };
        let mut users: Vec<EntityRef> = self
            .store
            .read_grants(&direct, Some(snapshot))
            .await?
            .into_iter()
            .map(|g| g.entity)
            .collect();

        if include_group_members {
            if let Some(object) = object {
                let filter = GroupFilter {
                    target: Some(object.clone()),
                    codenames: Some(owned_codenames(perms)),
                    ..Default::default()
                };
                for group in self.store.read_groups(&filter, Some(snapshot)).await? {
                    users.extend(group.members.into_iter().filter(EntityRef::is_user));
                }
            }

            let via_groups = GrantFilter {
                entity_kind: Some(EntityKind::Group),
                ..scope
            };
            let groups = self.store.read_grants(&via_groups, Some(snapshot)).await?;
            for group in dedup_in_order(groups.into_iter().map(|g| g.entity)) {
                users.extend(self.identity.members_of(&group).await?);
            }
        }

        let users = dedup_in_order(users);
        tracing::debug!(count = users.len(), "users with permissions resolved");
        Ok(users)
    }

    /// Platform groups holding any of `perms` for `object_type`, on `object`
    /// or globally when `object` is `None`.
    pub async fn get_groups_with_perms(
        &self,
        perms: &[&str],
        object_type: &str,
        object: Option<&ObjectRef>,
    ) -> Result<Vec<EntityRef>, EngineError> {
        if perms.is_empty() {
            return Ok(Vec::new());
        }
        let snapshot = self.store.snapshot().await?;
        let filter = GrantFilter {
            entity_kind: Some(EntityKind::Group),
            codenames: Some(owned_codenames(perms)),
            permission_type: Some(Some(object_type.to_string())),
            object: Some(object.cloned()),
            ..Default::default()
        };
        let grants = self.store.read_grants(&filter, Some(snapshot)).await?;
        Ok(dedup_in_order(grants.into_iter().map(|g| g.entity)))
    }

    /// Objects of `object_type` on which `entity` holds any of `perms`. With
    /// `include_group_members`, also objects reachable through the user's
    /// platform groups and permission groups.
    pub async fn get_objects_for_entity(
        &self,
        entity: &EntityRef,
        perms: &[&str],
        object_type: &str,
        include_group_members: bool,
    ) -> Result<Vec<ObjectRef>, EngineError> {
        if include_group_members && entity.is_group() {
            return Err(EngineError::InvalidArgument(format!(
                "{entity} is a group and has no group membership to expand"
            )));
        }
        if perms.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.store.snapshot().await?;
        let mut principals = vec![entity.clone()];
        if include_group_members {
            principals.extend(self.identity.groups_of(entity).await?);
        }

        let mut objects = Vec::new();
        for principal in &principals {
            let filter = GrantFilter {
                permission_type: Some(Some(object_type.to_string())),
                object_type: Some(object_type.to_string()),
                ..GrantFilter::for_entity(principal).with_codenames(perms.iter().copied())
            };
            let grants = self.store.read_grants(&filter, Some(snapshot)).await?;
            objects.extend(grants.into_iter().filter_map(|g| g.object));
        }

        if include_group_members {
            let filter = GroupFilter {
                target_type: Some(object_type.to_string()),
                member: Some(entity.clone()),
                codenames: Some(owned_codenames(perms)),
                ..Default::default()
            };
            let groups = self.store.read_groups(&filter, Some(snapshot)).await?;
            objects.extend(groups.into_iter().map(|g| g.target));
        }

        Ok(dedup_in_order(objects))
    }

    /// Maps references back to live objects, skipping ones that no longer
    /// resolve.
    pub async fn resolve_objects<R: ObjectResolver>(
        &self,
        resolver: &R,
        references: &[ObjectRef],
    ) -> Result<Vec<R::Object>, EngineError> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            match resolver.resolve(reference).await? {
                Some(object) => resolved.push(object),
                None => tracing::debug!(object = %reference, "skipping dangling reference"),
            }
        }
        Ok(resolved)
    }

    async fn direct_perms(
        &self,
        entity: &EntityRef,
        object: Option<&ObjectRef>,
        snapshot: SnapshotToken,
    ) -> Result<BTreeSet<String>, EngineError> {
        let filter = GrantFilter {
            object: Some(object.cloned()),
            ..GrantFilter::for_entity(entity)
        };
        let grants = self.store.read_grants(&filter, Some(snapshot)).await?;
        Ok(grants.into_iter().map(|g| g.permission.codename).collect())
    }
}
