use crate::grant::{EntityRef, Grant, ObjectRef, Permission};
use crate::group::{PermissionGroup, PermissionGroupKey};
use crate::store::PurgeSummary;

fn object_field(object: Option<&ObjectRef>) -> String {
    object.map(ToString::to_string).unwrap_or_default()
}

pub fn audit_grant_set(grant: &Grant, created: bool) {
    tracing::info!(
        target: "audit",
        event = "grant_set",
        entity = %grant.entity,
        permission = %grant.permission,
        object = object_field(grant.object.as_ref()),
        created = created,
        "permission granted"
    );
}

pub fn audit_grant_lifted(grant: &Grant, removed: bool) {
    tracing::info!(
        target: "audit",
        event = "grant_lifted",
        entity = %grant.entity,
        permission = %grant.permission,
        object = object_field(grant.object.as_ref()),
        removed = removed,
        "permission lifted"
    );
}

pub fn audit_group_created(group: &PermissionGroup, created: bool) {
    tracing::info!(
        target: "audit",
        event = "group_created",
        group = %group.key(),
        group_id = %group.id,
        permission_count = group.permissions.len() as u64,
        created = created,
        "permission group created"
    );
}

pub fn audit_group_deleted(key: &PermissionGroupKey, removed: bool) {
    tracing::info!(
        target: "audit",
        event = "group_deleted",
        group = %key,
        removed = removed,
        "permission group deleted"
    );
}

pub fn audit_membership_changed(
    key: &PermissionGroupKey,
    entity: &EntityRef,
    added: bool,
    changed: bool,
) {
    tracing::info!(
        target: "audit",
        event = if added { "member_added" } else { "member_removed" },
        group = %key,
        entity = %entity,
        changed = changed,
        "permission group membership changed"
    );
}

pub fn audit_group_permission_added(
    key: &PermissionGroupKey,
    permission: &Permission,
    changed: bool,
) {
    tracing::info!(
        target: "audit",
        event = "group_permission_added",
        group = %key,
        permission = %permission,
        changed = changed,
        "permission added to group"
    );
}

pub fn audit_group_permission_removed(key: &PermissionGroupKey, codename: &str, changed: bool) {
    tracing::info!(
        target: "audit",
        event = "group_permission_removed",
        group = %key,
        codename = codename,
        changed = changed,
        "permission removed from group"
    );
}

pub fn audit_object_purged(object: &ObjectRef, summary: &PurgeSummary) {
    tracing::info!(
        target: "audit",
        event = "object_purged",
        object = %object,
        grants_removed = summary.grants as u64,
        groups_removed = summary.groups as u64,
        "object permissions purged"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    use crate::group::GroupId;

    #[derive(Debug)]
    struct CapturedEvent {
        target: String,
        fields: Vec<(String, String)>,
    }

    struct TestLayer {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TestLayer {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut fields = Vec::new();
            let mut visitor = FieldVisitor(&mut fields);
            event.record(&mut visitor);

            self.events.lock().unwrap().push(CapturedEvent {
                target: event.metadata().target().to_string(),
                fields,
            });
        }
    }

    struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0
                .push((field.name().to_string(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
    }

    fn with_test_subscriber<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let layer = TestLayer {
            events: Arc::clone(&events),
        };
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        Arc::try_unwrap(events).unwrap().into_inner().unwrap()
    }

    fn has_field(event: &CapturedEvent, key: &str, value: &str) -> bool {
        event.fields.iter().any(|(k, v)| k == key && v == value)
    }

    fn post() -> ObjectRef {
        ObjectRef::new("blog.post", "1")
    }

    #[test]
    fn grant_set_emits_entity_permission_and_object() {
        let grant = Grant::on_object(EntityRef::user("7"), "view_post", post());
        let events = with_test_subscriber(|| audit_grant_set(&grant, true));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "grant_set"));
        assert!(has_field(&events[0], "entity", "user:7"));
        assert!(has_field(&events[0], "permission", "blog.post.view_post"));
        assert!(has_field(&events[0], "object", "blog.post:1"));
        assert!(has_field(&events[0], "created", "true"));
    }

    #[test]
    fn global_grant_lifted_has_empty_object_field() {
        let grant = Grant::global(
            EntityRef::group("staff"),
            Permission::typed("add_post", "blog.post"),
        );
        let events = with_test_subscriber(|| audit_grant_lifted(&grant, false));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "grant_lifted"));
        assert!(has_field(&events[0], "object", ""));
        assert!(has_field(&events[0], "removed", "false"));
    }

    #[test]
    fn membership_event_name_follows_direction() {
        let key = PermissionGroupKey::new("editors", post());
        let events = with_test_subscriber(|| {
            audit_membership_changed(&key, &EntityRef::user("1"), true, true);
            audit_membership_changed(&key, &EntityRef::user("1"), false, false);
        });

        assert_eq!(events.len(), 2);
        assert!(has_field(&events[0], "event", "member_added"));
        assert!(has_field(&events[1], "event", "member_removed"));
        assert!(has_field(&events[1], "changed", "false"));
    }

    #[test]
    fn group_permission_removed_names_codename() {
        let key = PermissionGroupKey::new("editors", post());
        let events = with_test_subscriber(|| audit_group_permission_removed(&key, "delete_post", true));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "group_permission_removed"));
        assert!(has_field(&events[0], "group", "editors@blog.post:1"));
        assert!(has_field(&events[0], "codename", "delete_post"));
        assert!(has_field(&events[0], "changed", "true"));
    }

    #[test]
    fn object_purged_reports_counts() {
        let summary = PurgeSummary {
            grants: 3,
            groups: 1,
        };
        let events = with_test_subscriber(|| audit_object_purged(&post(), &summary));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "grants_removed", "3"));
        assert!(has_field(&events[0], "groups_removed", "1"));
    }

    #[test]
    fn audit_events_use_target_audit() {
        let key = PermissionGroupKey::new("editors", post());
        let group = PermissionGroup {
            id: GroupId::generate(),
            name: "editors".to_string(),
            target: post(),
            permissions: Default::default(),
            members: vec![],
        };
        let permission = Permission::typed("view_post", "blog.post");
        let events = with_test_subscriber(|| {
            audit_group_created(&group, true);
            audit_group_deleted(&key, true);
            audit_group_permission_added(&key, &permission, true);
            audit_group_permission_removed(&key, "view_post", true);
            audit_object_purged(&post(), &PurgeSummary::default());
        });

        assert_eq!(events.len(), 5);
        for event in &events {
            assert_eq!(
                event.target, "audit",
                "event target should be 'audit', got '{}'",
                event.target
            );
        }
    }
}
