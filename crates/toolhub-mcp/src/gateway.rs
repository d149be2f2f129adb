//! Invocation gateway.
//!
//! Every operation follows the same path: find a connected session, look
//! the target up in the capabilities negotiated at handshake, validate, then
//! dispatch through [`Session::call`] so the per-call timeout and statistics
//! apply. Validation failures never reach the transport.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capabilities::PromptDescriptor;
use crate::error::McpError;
use crate::protocol::{methods, GetPromptParams, GetPromptResult, ReadResourceParams, ReadResourceResult};
use crate::registry::Registry;
use crate::schema::{SchemaViolation, ViolationKind};
use crate::session::Session;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid"));

/// Routes tool, resource and prompt requests to registered sessions.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<Registry>,
}

impl Gateway {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn connected(&self, server_id: &str) -> Result<Arc<Session>, McpError> {
        let session = self
            .registry
            .get(server_id)
            .ok_or_else(|| McpError::not_connected(server_id, None))?;
        if !session.is_connected() {
            return Err(McpError::not_connected(server_id, Some(session.state())));
        }
        Ok(session)
    }

    /// Call a tool and return the server's raw result payload.
    ///
    /// `args` must satisfy the tool's input schema; `null` is treated as an
    /// empty argument object. A result with `isError: true` is returned as
    /// is.
    pub async fn call_tool(&self, server_id: &str, tool: &str, args: Value) -> Result<Value, McpError> {
        self.invoke_tool(server_id, tool, args, None).await
    }

    /// [`call_tool`](Self::call_tool) that stops waiting when `cancel` fires.
    ///
    /// The server is not told; work it already started may still complete.
    pub async fn call_tool_with_cancel(
        &self,
        server_id: &str,
        tool: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, McpError> {
        self.invoke_tool(server_id, tool, args, Some(cancel)).await
    }

    async fn invoke_tool(
        &self,
        server_id: &str,
        tool: &str,
        args: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, McpError> {
        let session = self.connected(server_id)?;
        let descriptor = session.tool(tool).ok_or_else(|| McpError::UnknownTool {
            server_id: server_id.to_string(),
            tool: tool.to_string(),
        })?;

        if let Err(violations) = descriptor.schema.validate(&args) {
            debug!(server = %server_id, tool = tool, violations = violations.len(), "Rejected tool arguments");
            return Err(McpError::InvalidArguments {
                target: tool.to_string(),
                violations,
            });
        }

        let arguments = if args.is_null() { json!({}) } else { args };
        info!(server = %server_id, tool = tool, "Calling tool");
        dispatch(
            &session,
            methods::TOOLS_CALL,
            json!({ "name": tool, "arguments": arguments }),
            cancel,
        )
        .await
    }

    /// Read a resource. The URI is passed through untouched.
    pub async fn get_resource(&self, server_id: &str, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.read_resource(server_id, uri, None).await
    }

    pub async fn get_resource_with_cancel(
        &self,
        server_id: &str,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<ReadResourceResult, McpError> {
        self.read_resource(server_id, uri, Some(cancel)).await
    }

    async fn read_resource(
        &self,
        server_id: &str,
        uri: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<ReadResourceResult, McpError> {
        let session = self.connected(server_id)?;
        let supported = session.capabilities().is_some_and(|c| c.supports_resources());
        if !supported {
            return Err(McpError::Unsupported {
                server_id: server_id.to_string(),
                capability: "resources",
            });
        }

        let params = serde_json::to_value(ReadResourceParams { uri: uri.to_string() })?;
        let value = dispatch(&session, methods::RESOURCES_READ, params, cancel).await?;
        serde_json::from_value(value).map_err(|e| McpError::protocol(format!("malformed resources/read result: {}", e)))
    }

    /// Render a prompt to a single string.
    ///
    /// Every required argument must be supplied and unknown arguments are
    /// rejected. Message texts are joined with newlines, then any
    /// `{{name}}` placeholders the server left in are filled from `args`.
    pub async fn execute_prompt(
        &self,
        server_id: &str,
        prompt: &str,
        args: &HashMap<String, String>,
    ) -> Result<String, McpError> {
        self.render_prompt(server_id, prompt, args, None).await
    }

    pub async fn execute_prompt_with_cancel(
        &self,
        server_id: &str,
        prompt: &str,
        args: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<String, McpError> {
        self.render_prompt(server_id, prompt, args, Some(cancel)).await
    }

    async fn render_prompt(
        &self,
        server_id: &str,
        prompt: &str,
        args: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, McpError> {
        let session = self.connected(server_id)?;
        let Some(capabilities) = session.capabilities().filter(|c| c.supports_prompts()) else {
            return Err(McpError::Unsupported {
                server_id: server_id.to_string(),
                capability: "prompts",
            });
        };
        let descriptor = capabilities.prompt(prompt).ok_or_else(|| McpError::UnknownPrompt {
            server_id: server_id.to_string(),
            prompt: prompt.to_string(),
        })?;

        let violations = check_prompt_arguments(descriptor, args);
        if !violations.is_empty() {
            return Err(McpError::InvalidArguments {
                target: prompt.to_string(),
                violations,
            });
        }

        let params = serde_json::to_value(GetPromptParams {
            name: prompt.to_string(),
            arguments: args.clone(),
        })?;
        let value = dispatch(&session, methods::PROMPTS_GET, params, cancel).await?;
        let result: GetPromptResult = serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("malformed prompts/get result: {}", e)))?;

        let text = result
            .messages
            .iter()
            .filter_map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(render_template(&text, args).into_owned())
    }
}

async fn dispatch(
    session: &Session,
    method: &str,
    params: Value,
    cancel: Option<&CancellationToken>,
) -> Result<Value, McpError> {
    let call = session.call(method, Some(params));
    let Some(cancel) = cancel else {
        return call.await;
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(server = %session.id(), method = method, "Call cancelled by caller");
            Err(McpError::Cancelled { method: method.to_string() })
        }
        result = call => result,
    }
}

fn check_prompt_arguments(prompt: &PromptDescriptor, args: &HashMap<String, String>) -> Vec<SchemaViolation> {
    let mut violations: Vec<SchemaViolation> = prompt
        .required_arguments()
        .filter(|a| !args.contains_key(&a.name))
        .map(|a| SchemaViolation::new(a.name.clone(), ViolationKind::Missing))
        .collect();

    let mut unknown: Vec<&String> = args.keys().filter(|k| prompt.argument(k).is_none()).collect();
    unknown.sort();
    violations.extend(
        unknown
            .into_iter()
            .map(|k| SchemaViolation::new(k.clone(), ViolationKind::Unknown)),
    );
    violations
}

/// Replace `{{ name }}` placeholders with values from `args`. Placeholders
/// without a value are left as they are.
pub fn render_template<'a>(template: &'a str, args: &HashMap<String, String>) -> Cow<'a, str> {
    PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| match args.get(&caps[1]) {
        Some(value) => value.clone(),
        None => caps[0].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::ErrorKind;
    use crate::policy::SessionPolicy;
    use crate::test_utils::{MockConnector, MockServer};
    use toolhub_core::{ServerDescriptor, TransportConfig};

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    async fn gateway_with(server: MockServer) -> Gateway {
        let policy = SessionPolicy::default()
            .with_heartbeat(None)
            .with_handshake_timeout(Duration::from_millis(500))
            .with_call_timeout(Duration::from_millis(200));
        let registry = Registry::new(policy).with_connector(Arc::new(MockConnector::new(server)));
        registry
            .connect(ServerDescriptor::new("mock", "Mock", TransportConfig::stdio("mock-server", vec![])))
            .await
            .unwrap();
        Gateway::new(Arc::new(registry))
    }

    #[test]
    fn test_render_template() {
        let vars = args(&[("name", "Ada"), ("tone", "warm")]);
        assert_eq!(render_template("Hi {{name}}, {{ tone }}!", &vars), "Hi Ada, warm!");
        assert_eq!(render_template("{{missing}} stays", &vars), "{{missing}} stays");
        assert!(matches!(render_template("plain", &vars), Cow::Borrowed(_)));
    }

    #[tokio::test]
    async fn test_call_tool_returns_raw_result() {
        let gateway = gateway_with(MockServer::echo()).await;
        let result = gateway.call_tool("mock", "echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "hi");

        let failed = gateway.call_tool("mock", "fail", Value::Null).await.unwrap();
        assert_eq!(failed["isError"], true);
        assert_eq!(gateway.registry().get("mock").unwrap().stats().successes, 2);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_not_sent() {
        let server = MockServer::echo();
        let gateway = gateway_with(server.clone()).await;

        let err = gateway.call_tool("mock", "echo", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert_eq!(err.invalid_fields(), vec!["text"]);

        let err = gateway
            .call_tool("mock", "add", json!({"a": 1, "b": "two", "c": 3}))
            .await
            .unwrap_err();
        let mut fields = err.invalid_fields();
        fields.sort_unstable();
        assert_eq!(fields, vec!["b", "c"]);

        assert_eq!(server.requests(methods::TOOLS_CALL), 0);
        assert_eq!(gateway.registry().get("mock").unwrap().stats().total_calls, 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_server() {
        let gateway = gateway_with(MockServer::echo()).await;

        let err = gateway.call_tool("mock", "nope", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { ref tool, .. } if tool == "nope"));

        let err = gateway.call_tool("ghost", "echo", json!({"text": "x"})).await.unwrap_err();
        assert!(matches!(err, McpError::NotConnected { state: None, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_call_clears_pending_entry() {
        let gateway = gateway_with(MockServer::echo()).await;
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = gateway
            .call_tool_with_cancel("mock", "hang", json!({}), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Cancelled { .. }));

        let session = gateway.registry().get("mock").unwrap();
        assert_eq!(session.pending_calls(), 0);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_get_resource() {
        let gateway = gateway_with(MockServer::echo()).await;
        let result = gateway.get_resource("mock", "memo://greeting").await.unwrap();
        assert_eq!(result.contents[0].text.as_deref(), Some("Hello from memo"));

        // Undeclared URIs are still forwarded
        let result = gateway.get_resource("mock", "memo://other").await.unwrap();
        assert_eq!(result.contents.len(), 1);
    }

    #[tokio::test]
    async fn test_get_resource_unsupported() {
        let gateway = gateway_with(MockServer::echo().without_resources()).await;
        let err = gateway.get_resource("mock", "memo://greeting").await.unwrap_err();
        assert!(matches!(err, McpError::Unsupported { capability: "resources", .. }));
    }

    #[tokio::test]
    async fn test_execute_prompt_substitutes_arguments() {
        let gateway = gateway_with(MockServer::echo()).await;
        let text = gateway
            .execute_prompt("mock", "greet", &args(&[("name", "Ada"), ("tone", "cheerful")]))
            .await
            .unwrap();
        assert_eq!(text, "Say hello to Ada.\nUse a cheerful tone.");
    }

    #[tokio::test]
    async fn test_execute_prompt_argument_checks() {
        let gateway = gateway_with(MockServer::echo()).await;

        let err = gateway.execute_prompt("mock", "greet", &args(&[])).await.unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["name"]);

        let err = gateway
            .execute_prompt("mock", "greet", &args(&[("name", "Ada"), ("mood", "x")]))
            .await
            .unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["mood"]);

        let err = gateway.execute_prompt("mock", "nope", &args(&[])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPrompt);
    }
}
