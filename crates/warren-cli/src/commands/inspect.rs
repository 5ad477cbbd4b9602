use tracing::info;

use warren_config::WarrenConfig;
use warren_core::{
    Access, AgentStore, AgentUpdate, Result, WarrenError, path_kind, path_parent, path_user_id,
};
use warren_runtime::agent_sandbox;
use warren_sandbox::{AccessVerdict, PermissionsBuilder};

use super::{open_store, permissions_builder};

pub(super) fn cmd_path(raw: &str) -> Result<()> {
    let kind = path_kind(raw)?;
    let parent = path_parent(raw)?;
    let user = path_user_id(raw)?;

    println!("\x1b[1m{raw}\x1b[0m");
    println!("  Kind:   \x1b[36m{kind}\x1b[0m");
    println!(
        "  Parent: {}",
        parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "\x1b[90m(none)\x1b[0m".into())
    );
    println!(
        "  User:   {}",
        user.unwrap_or_else(|| "\x1b[90m(system)\x1b[0m".into())
    );
    Ok(())
}

pub(super) async fn cmd_access(config: WarrenConfig, id: String, access: Access) -> Result<()> {
    let store = open_store(&config)?;
    let record = store
        .find_by_id(&id)
        .await?
        .ok_or_else(|| WarrenError::AgentNotFound(id.clone()))?;

    let sandbox = agent_sandbox(&permissions_builder(&config), &record)?;
    match sandbox.check(&access) {
        AccessVerdict::Allow => println!("✅ {} may {access}", record.descriptor.label()),
        AccessVerdict::Deny(reason) => {
            println!("⛔ {} may not {access}", record.descriptor.label());
            println!("   \x1b[90m{reason}\x1b[0m");
            println!(
                "   Grant with: warren grant {} {}",
                record.id,
                grant_hint(&access)
            );
        }
    }
    Ok(())
}

pub(super) async fn cmd_grant(config: WarrenConfig, id: String, access: Access) -> Result<()> {
    let store = open_store(&config)?;
    let record = store
        .find_by_id(&id)
        .await?
        .ok_or_else(|| WarrenError::AgentNotFound(id.clone()))?;

    let next = PermissionsBuilder::grant(&record.permissions, &access)?;
    if next == record.permissions {
        println!("ℹ️  {} already has {access}", record.descriptor.label());
        return Ok(());
    }
    if !store
        .update(&id, AgentUpdate::default().permissions(next))
        .await?
    {
        return Err(WarrenError::AgentNotFound(id));
    }
    info!(agent_id = %id, %access, "permission granted");
    println!("✅ Granted {access} to {}", record.descriptor.label());
    Ok(())
}

fn grant_hint(access: &Access) -> String {
    match access {
        Access::Network => "network".into(),
        Access::Events => "events".into(),
        Access::Workspace => "workspace".into(),
        Access::Read { path } => format!("read {}", path.display()),
        Access::Write { path } => format!("write {}", path.display()),
    }
}
