use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use objguard_core::{EntityRef, ObjectRef};

#[derive(Debug, Parser)]
#[command(name = "objguard-admin", version)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the namespace schema and tables.
    Migrate,
    RegisterPermission {
        #[arg(long)]
        codename: String,
        #[arg(long)]
        object_type: Option<String>,
    },
    Grant(GrantArgs),
    Revoke(GrantArgs),
    Check {
        #[arg(long = "entity", required = true)]
        entities: Vec<EntityRef>,
        #[arg(long)]
        perm: String,
        #[arg(long)]
        object: Option<ObjectRef>,
        #[arg(long)]
        object_type: Option<String>,
        /// Also require a group of one of the users to hold the permission.
        #[arg(long)]
        gross: bool,
    },
    Perms {
        #[arg(long)]
        entity: EntityRef,
        #[arg(long)]
        object: Option<ObjectRef>,
        #[arg(long)]
        gross: bool,
    },
    /// List users holding any of the permissions.
    WhoCan {
        #[arg(long = "perm", required = true)]
        perms: Vec<String>,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        include_groups: bool,
    },
    /// List objects of a type the entity holds any of the permissions on.
    Objects {
        #[arg(long)]
        entity: EntityRef,
        #[arg(long = "perm", required = true)]
        perms: Vec<String>,
        #[arg(long)]
        object_type: String,
        #[arg(long)]
        include_groups: bool,
    },
    CreateGroup {
        #[command(flatten)]
        group: GroupArgs,
        #[arg(long = "perm", required = true)]
        perms: Vec<String>,
    },
    DeleteGroup(GroupArgs),
    /// Print a group's permissions and members.
    ShowGroup(GroupArgs),
    AddGroupPermission {
        #[command(flatten)]
        group: GroupArgs,
        #[arg(long)]
        perm: String,
    },
    RemoveGroupPermission {
        #[command(flatten)]
        group: GroupArgs,
        #[arg(long)]
        perm: String,
    },
    AddMember {
        #[command(flatten)]
        group: GroupArgs,
        #[arg(long)]
        entity: EntityRef,
    },
    RemoveMember {
        #[command(flatten)]
        group: GroupArgs,
        #[arg(long)]
        entity: EntityRef,
    },
    /// Remove every grant and permission group attached to an object.
    PurgeObject {
        #[arg(long)]
        object: ObjectRef,
    },
    FetchUser {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Args)]
pub struct GrantArgs {
    #[arg(long)]
    pub entity: EntityRef,
    #[arg(long)]
    pub perm: String,
    #[command(flatten)]
    pub scope: ScopeArgs,
}

/// Exactly one of an object or a type for global scope.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct ScopeArgs {
    #[arg(long)]
    pub object: Option<ObjectRef>,
    #[arg(long)]
    pub object_type: Option<String>,
}

#[derive(Debug, Args)]
pub struct GroupArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub target: ObjectRef,
}
