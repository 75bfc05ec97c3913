use std::future::Future;

use crate::grant::ObjectRef;
use crate::store::StorageError;

/// Maps application objects to and from [`ObjectRef`]s.
pub trait ObjectResolver: Send + Sync {
    type Object: Send;

    fn type_tag_of(&self, object: &Self::Object) -> String;

    fn id_of(&self, object: &Self::Object) -> String;

    fn object_ref(&self, object: &Self::Object) -> ObjectRef {
        ObjectRef::new(self.type_tag_of(object), self.id_of(object))
    }

    /// `Ok(None)` when the reference no longer points at a live object.
    fn resolve(
        &self,
        reference: &ObjectRef,
    ) -> impl Future<Output = Result<Option<Self::Object>, StorageError>> + Send;
}
