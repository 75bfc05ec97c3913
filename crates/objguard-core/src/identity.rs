use std::future::Future;

use crate::grant::EntityRef;
use crate::store::StorageError;

/// Account flags the engine short-circuits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityState {
    pub active: bool,
    pub superuser: bool,
    pub authenticated: bool,
}

impl EntityState {
    pub const fn active_user() -> Self {
        Self {
            active: true,
            superuser: false,
            authenticated: true,
        }
    }

    pub const fn superuser() -> Self {
        Self {
            active: true,
            superuser: true,
            authenticated: true,
        }
    }

    pub const fn inactive() -> Self {
        Self {
            active: false,
            superuser: false,
            authenticated: true,
        }
    }

    pub const fn anonymous() -> Self {
        Self {
            active: true,
            superuser: false,
            authenticated: false,
        }
    }

    /// Groups carry no account flags of their own.
    pub const fn group() -> Self {
        Self::active_user()
    }
}

/// The user store the engine consults; authentication itself lives elsewhere.
pub trait IdentityProvider: Send + Sync {
    fn state_of(
        &self,
        entity: &EntityRef,
    ) -> impl Future<Output = Result<EntityState, StorageError>> + Send;

    /// Platform groups a user belongs to. Empty for group entities.
    fn groups_of(
        &self,
        user: &EntityRef,
    ) -> impl Future<Output = Result<Vec<EntityRef>, StorageError>> + Send;

    /// Users belonging to a platform group. Empty for user entities.
    fn members_of(
        &self,
        group: &EntityRef,
    ) -> impl Future<Output = Result<Vec<EntityRef>, StorageError>> + Send;
}
