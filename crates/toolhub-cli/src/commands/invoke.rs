//! Tool, resource and prompt invocation commands.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use toolhub_mcp::protocol::{CallToolResult, ContentBlock};
use toolhub_mcp::McpError;

use crate::output::{error_json, parse_pairs};
use crate::AppContext;

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    token
}

pub async fn call(ctx: &AppContext, server: &str, tool: &str, args: &str, json: bool) -> anyhow::Result<()> {
    let args: Value = serde_json::from_str(args).map_err(|e| anyhow::anyhow!("--args is not valid JSON: {}", e))?;

    ctx.connect(server).await?;
    let cancel = interrupt_token();
    let result = ctx.gateway.call_tool_with_cancel(server, tool, args, &cancel).await;

    match result {
        Ok(value) if json => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Ok(value) => print_tool_result(value),
        Err(e) => fail(e, json),
    }
}

fn print_tool_result(value: Value) -> anyhow::Result<()> {
    // Servers may return payloads outside the usual content envelope
    let result: CallToolResult = match serde_json::from_value(value.clone()) {
        Ok(result) => result,
        Err(_) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }
    };

    for block in &result.content {
        match block {
            ContentBlock::Image { mime_type, data } => println!("<{} image, {} bytes of base64>", mime_type, data.len()),
            other => match other.as_text() {
                Some(text) => println!("{}", text),
                None => println!("{}", serde_json::to_string(other)?),
            },
        }
    }

    if result.is_error {
        anyhow::bail!("tool reported an error");
    }
    Ok(())
}

pub async fn read(ctx: &AppContext, server: &str, uri: &str, json: bool) -> anyhow::Result<()> {
    ctx.connect(server).await?;
    let cancel = interrupt_token();
    let result = ctx.gateway.get_resource_with_cancel(server, uri, &cancel).await;

    let resource = match result {
        Ok(resource) => resource,
        Err(e) => return fail(e, json),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&resource)?);
        return Ok(());
    }

    for contents in &resource.contents {
        match (&contents.text, &contents.blob) {
            (Some(text), _) => println!("{}", text),
            (None, Some(blob)) => println!(
                "<{} bytes of base64 {}>",
                blob.len(),
                contents.mime_type.as_deref().unwrap_or("data")
            ),
            (None, None) => println!("<empty: {}>", contents.uri),
        }
    }
    Ok(())
}

pub async fn prompt(ctx: &AppContext, server: &str, name: &str, args: &[String]) -> anyhow::Result<()> {
    let args = parse_pairs(args, "prompt argument")?;

    ctx.connect(server).await?;
    let cancel = interrupt_token();
    let text = ctx.gateway.execute_prompt_with_cancel(server, name, &args, &cancel).await?;
    println!("{}", text);
    Ok(())
}

fn fail(e: McpError, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&error_json(&e))?);
    }
    Err(e.into())
}
