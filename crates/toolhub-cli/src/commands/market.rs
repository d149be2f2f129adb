//! Marketplace commands.

use toolhub_core::ServerCategory;

use crate::output::spinner;
use crate::{AppContext, MarketAction};

pub async fn handle(action: MarketAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        MarketAction::Search { query, category, json } => {
            let category = category.map(|c| c.parse::<ServerCategory>()).transpose()?;
            let hits = ctx
                .registry
                .marketplace()
                .search(query.as_deref().unwrap_or(""), category);

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
                return Ok(());
            }

            if hits.is_empty() {
                println!("No marketplace entries found.");
                return Ok(());
            }

            for entry in hits {
                println!(
                    "{:<14} {:<14} {:>8} downloads  {:.1}★  {}",
                    entry.id,
                    entry.category.as_str(),
                    entry.downloads,
                    entry.rating,
                    entry.description
                );
                println!("{:<14} {}", "", entry.install_command);
            }
        }
        MarketAction::Install { id } => {
            let bar = spinner(format!("Installing {}...", id));
            let result = ctx.registry.install_from_marketplace(&id).await;
            bar.finish_and_clear();

            let session = result?;
            let tools = session.capabilities().map_or(0, |c| c.tools().len());
            println!("Installed '{}' ({} tools).", session.id(), tools);
            if ctx.store.is_none() {
                println!("The descriptor store is disabled, so the server will not be remembered.");
            }
        }
    }
    Ok(())
}
