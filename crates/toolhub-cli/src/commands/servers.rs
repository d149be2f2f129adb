//! Server management commands.

use std::time::Duration;

use serde_json::json;
use toolhub_core::{DescriptorStore, ServerCategory, ServerDescriptor, TransportConfig};
use toolhub_mcp::Session;

use crate::output::{format_snapshot, format_time, parse_pairs, spinner};
use crate::{AppContext, ServersAction};

pub async fn handle(action: ServersAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ServersAction::List { connect, json } => list(ctx, connect || ctx.config.general.auto_connect, json).await,
        ServersAction::Add {
            id,
            target,
            args,
            name,
            category,
            headers,
            env,
            timeout,
            no_connect,
        } => {
            let mut transport = TransportConfig::from_target(&target, args);
            for (key, value) in parse_pairs(&env, "environment variable")? {
                transport = transport.with_env(key, value);
            }
            for (key, value) in parse_pairs(&headers, "header")? {
                transport = transport.with_header(key, value);
            }

            let mut descriptor = ServerDescriptor::new(id.clone(), name.unwrap_or(id), transport);
            if let Some(category) = category {
                descriptor = descriptor.with_category(category.parse::<ServerCategory>()?);
            }
            if let Some(secs) = timeout {
                descriptor = descriptor.with_timeout(Duration::from_secs(secs));
            }
            add(ctx, descriptor, no_connect).await
        }
        ServersAction::Remove { id } => remove(ctx, &id).await,
        ServersAction::Inspect { id, json } => inspect(ctx, &id, json).await,
    }
}

async fn list(ctx: &AppContext, connect: bool, json: bool) -> anyhow::Result<()> {
    let servers = ctx.known_servers()?;

    if connect {
        let bar = spinner(format!("Connecting to {} servers...", servers.len()));
        for (id, result) in ctx.registry.connect_all(servers).await {
            if let Err(e) = result {
                tracing::debug!(server = %id, error = %e, "Connect failed during listing");
            }
        }
        bar.finish_and_clear();

        let snapshots = ctx.registry.snapshots();
        if json {
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
            return Ok(());
        }
        if snapshots.is_empty() {
            println!("No servers configured.");
        }
        for snapshot in &snapshots {
            println!("{}", format_snapshot(snapshot));
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&servers)?);
        return Ok(());
    }

    if servers.is_empty() {
        println!("No servers configured.");
        println!("Add one with 'toolhub servers add <id> <command|url>' or 'toolhub market install <id>'.");
        return Ok(());
    }

    println!("Servers ({}):", servers.len());
    println!();
    for server in &servers {
        let source = if ctx.config.servers.iter().any(|s| s.id == server.id) {
            "config"
        } else {
            "stored"
        };
        println!(
            "  {:<16} {:<14} {:<9} {} ({})",
            server.id,
            server.category.as_str(),
            server.transport.kind().to_string(),
            server.transport.endpoint(),
            source
        );
    }
    Ok(())
}

async fn add(ctx: &AppContext, descriptor: ServerDescriptor, no_connect: bool) -> anyhow::Result<()> {
    descriptor.validate()?;

    if ctx.config.servers.iter().any(|s| s.id == descriptor.id) {
        anyhow::bail!(
            "server '{}' is defined in the configuration file; pick another id",
            descriptor.id
        );
    }

    let Some(store) = &ctx.store else {
        anyhow::bail!("the descriptor store is disabled (store.enabled = false); add the server to config.toml instead");
    };

    if no_connect {
        store.save(&descriptor).await?;
        println!("Saved server '{}' ({}).", descriptor.id, descriptor.transport.endpoint());
        return Ok(());
    }

    let id = descriptor.id.clone();
    match ctx.registry.connect(descriptor).await {
        Ok(session) => {
            let caps = session.capabilities();
            println!(
                "Added server '{}': {} tools, {} resources, {} prompts.",
                id,
                caps.map_or(0, |c| c.tools().len()),
                caps.map_or(0, |c| c.resources().len()),
                caps.map_or(0, |c| c.prompts().len()),
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Saved server '{}', but it did not complete the handshake.", id);
            Err(e.into())
        }
    }
}

async fn remove(ctx: &AppContext, id: &str) -> anyhow::Result<()> {
    if ctx.config.servers.iter().any(|s| s.id == id) {
        anyhow::bail!("server '{}' is defined in the configuration file; remove it there", id);
    }

    let stored = match &ctx.store {
        Some(store) => store.get(id).await?.is_some(),
        None => false,
    };
    if !stored {
        return Err(toolhub_core::Error::NotFound(format!("server '{}'", id)).into());
    }

    ctx.registry.disconnect(id).await;
    println!("Removed server '{}'.", id);
    Ok(())
}

async fn inspect(ctx: &AppContext, id: &str, json: bool) -> anyhow::Result<()> {
    let session = ctx.connect(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inspect_json(&session))?);
        return Ok(());
    }

    let snapshot = session.snapshot();
    println!("{} ({})", snapshot.name, snapshot.id);
    println!("  Transport: {} {}", snapshot.transport, snapshot.endpoint);
    println!("  State:     {}", session.state());
    if let Some(caps) = session.capabilities() {
        println!(
            "  Server:    {} {} (protocol {})",
            caps.server_name,
            caps.server_version.as_deref().unwrap_or(""),
            caps.protocol_version
        );

        println!("\nTools ({}):", caps.tools().len());
        for tool in caps.tools() {
            println!("  {}  {}", tool.name, tool.description.as_deref().unwrap_or(""));
            for param in &tool.schema.params {
                let types: Vec<String> = param.types.iter().map(|t| t.to_string()).collect();
                println!(
                    "      {}{}: {}",
                    param.name,
                    if param.required { "" } else { "?" },
                    types.join(" | ")
                );
            }
        }

        if caps.supports_resources() {
            println!("\nResources ({}):", caps.resources().len());
            for resource in caps.resources() {
                println!(
                    "  {}  {}{}",
                    resource.uri,
                    resource.name,
                    resource.mime_type.as_deref().map(|m| format!(" [{}]", m)).unwrap_or_default()
                );
            }
        }

        if caps.supports_prompts() {
            println!("\nPrompts ({}):", caps.prompts().len());
            for prompt in caps.prompts() {
                let args: Vec<String> = prompt
                    .arguments
                    .iter()
                    .map(|a| if a.required { a.name.clone() } else { format!("{}?", a.name) })
                    .collect();
                println!("  {}({})  {}", prompt.name, args.join(", "), prompt.description.as_deref().unwrap_or(""));
            }
        }
    }

    if let Some(at) = session.last_activity() {
        println!("\nLast activity: {}", format_time(&at));
    }
    Ok(())
}

fn inspect_json(session: &Session) -> serde_json::Value {
    let Some(caps) = session.capabilities() else {
        return json!({ "session": session.snapshot() });
    };
    json!({
        "session": session.snapshot(),
        "protocolVersion": caps.protocol_version,
        "tools": caps.tools().iter().map(|t| json!({
            "name": t.name,
            "description": t.description,
            "inputSchema": t.input_schema,
        })).collect::<Vec<_>>(),
        "resources": caps.resources().iter().map(|r| json!({
            "uri": r.uri,
            "name": r.name,
            "description": r.description,
            "mimeType": r.mime_type,
        })).collect::<Vec<_>>(),
        "prompts": caps.prompts().iter().map(|p| json!({
            "name": p.name,
            "description": p.description,
            "arguments": p.arguments.iter().map(|a| json!({
                "name": a.name,
                "required": a.required,
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}
