//! Terminal output helpers.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use toolhub_mcp::{McpError, SessionSnapshot};

/// Spinner on stderr; hidden when stderr is not a terminal.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Format a datetime for display.
pub fn format_time(dt: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = dt.with_timezone(&Local);
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One line per session for `servers list --connect`.
pub fn format_snapshot(s: &SessionSnapshot) -> String {
    let state = match s.failure {
        Some(reason) => format!("{} ({})", s.state, reason),
        None => s.state.to_string(),
    };
    let mut line = format!(
        "{:<16} [{}] {} {}  tools={} resources={} prompts={}",
        s.id, state, s.transport, s.endpoint, s.tools, s.resources, s.prompts
    );
    if let Some(error) = &s.last_error {
        line.push_str(&format!("\n{:<16} last error: {}", "", error));
    }
    line
}

/// Structured error body for `--json` output.
pub fn error_json(e: &McpError) -> Value {
    let mut body = json!({
        "kind": e.kind(),
        "message": e.to_string(),
    });
    let fields = e.invalid_fields();
    if !fields.is_empty() {
        body["fields"] = json!(fields);
    }
    if let Some(reason) = e.failure_reason() {
        body["reason"] = json!(reason);
    }
    json!({ "error": body })
}

/// Parse repeated `KEY=VALUE` options.
pub fn parse_pairs(pairs: &[String], what: &str) -> anyhow::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
            _ => anyhow::bail!("invalid {} '{}', expected KEY=VALUE", what, pair),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolhub_mcp::{SchemaViolation, ViolationKind};

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(&["a=1".to_string(), "b=x=y".to_string()], "argument").unwrap();
        assert_eq!(pairs["a"], "1");
        assert_eq!(pairs["b"], "x=y");

        assert!(parse_pairs(&["novalue".to_string()], "argument").is_err());
        assert!(parse_pairs(&["=1".to_string()], "argument").is_err());
    }

    #[test]
    fn test_error_json_names_fields() {
        let err = McpError::InvalidArguments {
            target: "echo".to_string(),
            violations: vec![SchemaViolation::new("text", ViolationKind::Missing)],
        };
        let body = error_json(&err);
        assert_eq!(body["error"]["kind"], "invalid_arguments");
        assert_eq!(body["error"]["fields"], json!(["text"]));
    }
}
