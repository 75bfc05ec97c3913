use std::io::Write;

use objguard_core::{IdentityProvider, PermissionEngine, PermissionGroupKey, PermissionStore};

use crate::cli::{Command, GrantArgs, GroupArgs};
use crate::error::AdminError;

fn group_key(args: &GroupArgs) -> PermissionGroupKey {
    PermissionGroupKey::new(args.name.clone(), args.target.clone())
}

fn codenames(perms: &[String]) -> Vec<&str> {
    perms.iter().map(String::as_str).collect()
}

/// Runs a command against the engine and writes a human-readable result to
/// `out`. `migrate` and `fetch-user` need no engine and are rejected here.
pub async fn run_command<S, I, W>(
    engine: &PermissionEngine<S, I>,
    command: &Command,
    out: &mut W,
) -> Result<(), AdminError>
where
    S: PermissionStore,
    I: IdentityProvider,
    W: Write,
{
    match command {
        Command::Migrate => return Err(AdminError::NotAnEngineCommand("migrate")),
        Command::FetchUser { .. } => return Err(AdminError::NotAnEngineCommand("fetch-user")),
        Command::RegisterPermission {
            codename,
            object_type,
        } => {
            let created = engine
                .register_permission(codename, object_type.as_deref())
                .await?;
            let scope = object_type.as_deref().unwrap_or("any type");
            if created {
                writeln!(out, "registered {codename} for {scope}")?;
            } else {
                writeln!(out, "{codename} for {scope} already registered")?;
            }
        }
        Command::Grant(GrantArgs {
            entity,
            perm,
            scope,
        }) => {
            let created = engine
                .set_perm(entity, perm, scope.object.as_ref(), scope.object_type.as_deref())
                .await?;
            writeln!(out, "{}", if created { "granted" } else { "already granted" })?;
        }
        Command::Revoke(GrantArgs {
            entity,
            perm,
            scope,
        }) => {
            let removed = engine
                .lift_perm(entity, perm, scope.object.as_ref(), scope.object_type.as_deref())
                .await?;
            writeln!(out, "{}", if removed { "revoked" } else { "no matching grant" })?;
        }
        Command::Check {
            entities,
            perm,
            object,
            object_type,
            gross,
        } => {
            let allowed = if *gross {
                engine
                    .has_gross_perm(entities, perm, object.as_ref(), object_type.as_deref())
                    .await?
            } else {
                engine
                    .has_perm(entities, perm, object.as_ref(), object_type.as_deref())
                    .await?
            };
            writeln!(out, "{}", if allowed { "allowed" } else { "denied" })?;
        }
        Command::Perms {
            entity,
            object,
            gross,
        } => {
            let perms = if *gross {
                engine.get_gross_perms(entity, object.as_ref()).await?
            } else {
                engine.get_perms(entity, object.as_ref()).await?
            };
            for perm in perms {
                writeln!(out, "{perm}")?;
            }
        }
        Command::WhoCan {
            perms,
            scope,
            include_groups,
        } => {
            let users = engine
                .get_users_with_perms(
                    &codenames(perms),
                    scope.object.as_ref(),
                    scope.object_type.as_deref(),
                    *include_groups,
                )
                .await?;
            for user in users {
                writeln!(out, "{user}")?;
            }
        }
        Command::Objects {
            entity,
            perms,
            object_type,
            include_groups,
        } => {
            let objects = engine
                .get_objects_for_entity(entity, &codenames(perms), object_type, *include_groups)
                .await?;
            for object in objects {
                writeln!(out, "{object}")?;
            }
        }
        Command::CreateGroup { group, perms } => {
            let created = engine
                .create_group(&group.name, &codenames(perms), &group.target)
                .await?;
            let codenames: Vec<String> = created.codenames().into_iter().collect();
            writeln!(
                out,
                "group {} ({}) with {}",
                created.key(),
                created.id,
                codenames.join(", ")
            )?;
        }
        Command::DeleteGroup(group) => {
            let removed = engine.delete_group(&group_key(group)).await?;
            writeln!(out, "{}", if removed { "deleted" } else { "no such group" })?;
        }
        Command::ShowGroup(group) => {
            let group = engine.retrieve_group(&group_key(group)).await?;
            let permissions: Vec<String> =
                group.permissions.iter().map(ToString::to_string).collect();
            let members: Vec<String> = group.members.iter().map(ToString::to_string).collect();
            writeln!(out, "group {} ({})", group.key(), group.id)?;
            writeln!(out, "permissions: {}", permissions.join(", "))?;
            writeln!(out, "members: {}", members.join(", "))?;
        }
        Command::AddGroupPermission { group, perm } => {
            let added = engine.add_group_permission(&group_key(group), perm).await?;
            writeln!(out, "{}", if added { "added" } else { "already held" })?;
        }
        Command::RemoveGroupPermission { group, perm } => {
            let removed = engine
                .remove_group_permission(&group_key(group), perm)
                .await?;
            writeln!(out, "{}", if removed { "removed" } else { "not held" })?;
        }
        Command::AddMember { group, entity } => {
            let added = engine.add_member(&group_key(group), entity).await?;
            writeln!(out, "{}", if added { "added" } else { "already a member" })?;
        }
        Command::RemoveMember { group, entity } => {
            let removed = engine.remove_member(&group_key(group), entity).await?;
            writeln!(out, "{}", if removed { "removed" } else { "not a member" })?;
        }
        Command::PurgeObject { object } => {
            let summary = engine.object_deleted(object).await?;
            writeln!(
                out,
                "purged {} grants and {} permission groups from {object}",
                summary.grants, summary.groups
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use objguard_core::{EngineConfig, EngineError, EntityState};
    use objguard_storage::{InMemoryDirectory, InMemoryStore};

    use super::*;
    use crate::cli::Cli;

    type Engine = PermissionEngine<InMemoryStore, InMemoryDirectory>;

    fn engine() -> Engine {
        let directory = InMemoryDirectory::new();
        directory.add_user("1", EntityState::active_user());
        directory.add_user("2", EntityState::active_user());
        PermissionEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(directory),
            EngineConfig::default(),
        )
    }

    async fn run(engine: &Engine, args: &[&str]) -> Result<String, AdminError> {
        let cli = Cli::parse_from(std::iter::once("objguard-admin").chain(args.iter().copied()));
        let mut out = Vec::new();
        run_command(engine, &cli.command, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    async fn register(engine: &Engine, codename: &str) {
        run(
            engine,
            &["register-permission", "--codename", codename, "--object-type", "blog.post"],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn register_reports_first_and_repeat() {
        let engine = engine();
        let args = ["register-permission", "--codename", "view_post", "--object-type", "blog.post"];

        let first = run(&engine, &args).await.unwrap();
        let second = run(&engine, &args).await.unwrap();

        assert_eq!(first, "registered view_post for blog.post\n");
        assert_eq!(second, "view_post for blog.post already registered\n");
    }

    #[tokio::test]
    async fn grant_check_revoke_cycle() {
        let engine = engine();
        register(&engine, "view_post").await;
        let grant = ["--entity", "user:1", "--perm", "view_post", "--object", "blog.post:7"];
        let check = ["check", "--entity", "user:1", "--perm", "view_post", "--object", "blog.post:7"];

        let granted = run(&engine, &[&["grant"][..], &grant[..]].concat()).await.unwrap();
        let again = run(&engine, &[&["grant"][..], &grant[..]].concat()).await.unwrap();
        let allowed = run(&engine, &check).await.unwrap();
        let revoked = run(&engine, &[&["revoke"][..], &grant[..]].concat()).await.unwrap();
        let denied = run(&engine, &check).await.unwrap();

        assert_eq!(granted, "granted\n");
        assert_eq!(again, "already granted\n");
        assert_eq!(allowed, "allowed\n");
        assert_eq!(revoked, "revoked\n");
        assert_eq!(denied, "denied\n");
    }

    #[tokio::test]
    async fn grant_of_unregistered_permission_fails() {
        let engine = engine();

        let result = run(
            &engine,
            &["grant", "--entity", "user:1", "--perm", "view_post", "--object", "blog.post:7"],
        )
        .await;

        assert!(matches!(
            result,
            Err(AdminError::Engine(EngineError::PermissionNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn group_commands_round_trip_membership() {
        let engine = engine();
        register(&engine, "change_post").await;
        let group = ["--name", "editors", "--target", "blog.post:7"];

        let created = run(
            &engine,
            &[&["create-group"][..], &group[..], &["--perm", "change_post"][..]].concat(),
        )
        .await
        .unwrap();
        let added = run(
            &engine,
            &[&["add-member"][..], &group[..], &["--entity", "user:2"][..]].concat(),
        )
        .await
        .unwrap();
        let who = run(
            &engine,
            &["who-can", "--perm", "change_post", "--object", "blog.post:7", "--include-groups"],
        )
        .await
        .unwrap();
        let objects = run(
            &engine,
            &[
                "objects",
                "--entity",
                "user:2",
                "--perm",
                "change_post",
                "--object-type",
                "blog.post",
                "--include-groups",
            ],
        )
        .await
        .unwrap();
        let removed = run(
            &engine,
            &[&["remove-member"][..], &group[..], &["--entity", "user:1"][..]].concat(),
        )
        .await
        .unwrap();
        let deleted = run(&engine, &[&["delete-group"][..], &group[..]].concat())
            .await
            .unwrap();

        assert!(created.starts_with("group editors@blog.post:7 ("), "got: {created}");
        assert!(created.ends_with("with change_post\n"), "got: {created}");
        assert_eq!(added, "added\n");
        assert_eq!(who, "user:2\n");
        assert_eq!(objects, "blog.post:7\n");
        assert_eq!(removed, "not a member\n");
        assert_eq!(deleted, "deleted\n");
    }

    #[tokio::test]
    async fn group_permission_commands_change_the_set() {
        let engine = engine();
        register(&engine, "change_post").await;
        register(&engine, "delete_post").await;
        let group = ["--name", "editors", "--target", "blog.post:7"];
        run(
            &engine,
            &[&["create-group"][..], &group[..], &["--perm", "change_post"][..]].concat(),
        )
        .await
        .unwrap();
        run(
            &engine,
            &[&["add-member"][..], &group[..], &["--entity", "user:1"][..]].concat(),
        )
        .await
        .unwrap();

        let added = run(
            &engine,
            &[&["add-group-permission"][..], &group[..], &["--perm", "delete_post"][..]].concat(),
        )
        .await
        .unwrap();
        let shown = run(&engine, &[&["show-group"][..], &group[..]].concat())
            .await
            .unwrap();
        let removed = run(
            &engine,
            &[&["remove-group-permission"][..], &group[..], &["--perm", "change_post"][..]].concat(),
        )
        .await
        .unwrap();
        let again = run(
            &engine,
            &[&["remove-group-permission"][..], &group[..], &["--perm", "change_post"][..]].concat(),
        )
        .await
        .unwrap();
        let after = run(&engine, &[&["show-group"][..], &group[..]].concat())
            .await
            .unwrap();

        assert_eq!(added, "added\n");
        assert!(
            shown.contains("permissions: blog.post.change_post, blog.post.delete_post\n"),
            "got: {shown}"
        );
        assert!(shown.ends_with("members: user:1\n"), "got: {shown}");
        assert_eq!(removed, "removed\n");
        assert_eq!(again, "not held\n");
        assert!(
            after.contains("permissions: blog.post.delete_post\n"),
            "got: {after}"
        );
    }

    #[tokio::test]
    async fn show_missing_group_is_not_found() {
        let engine = engine();

        let result = run(
            &engine,
            &["show-group", "--name", "editors", "--target", "blog.post:7"],
        )
        .await;

        assert!(matches!(result, Err(AdminError::Engine(EngineError::NotFound(_)))));
    }

    #[tokio::test]
    async fn perms_lists_codenames_in_order() {
        let engine = engine();
        register(&engine, "view_post").await;
        register(&engine, "change_post").await;
        for perm in ["view_post", "change_post"] {
            run(
                &engine,
                &["grant", "--entity", "user:1", "--perm", perm, "--object", "blog.post:7"],
            )
            .await
            .unwrap();
        }

        let perms = run(&engine, &["perms", "--entity", "user:1", "--object", "blog.post:7"])
            .await
            .unwrap();

        assert_eq!(perms, "change_post\nview_post\n");
    }

    #[tokio::test]
    async fn purge_object_reports_counts() {
        let engine = engine();
        register(&engine, "view_post").await;
        run(
            &engine,
            &["grant", "--entity", "user:1", "--perm", "view_post", "--object", "blog.post:7"],
        )
        .await
        .unwrap();

        let purged = run(&engine, &["purge-object", "--object", "blog.post:7"])
            .await
            .unwrap();

        assert_eq!(purged, "purged 1 grants and 0 permission groups from blog.post:7\n");
    }

    #[tokio::test]
    async fn non_engine_commands_are_rejected() {
        let engine = engine();

        let migrate = run(&engine, &["migrate"]).await;
        let fetch = run(&engine, &["fetch-user", "--id", "1"]).await;

        assert!(matches!(migrate, Err(AdminError::NotAnEngineCommand("migrate"))));
        assert!(matches!(fetch, Err(AdminError::NotAnEngineCommand("fetch-user"))));
    }
}
