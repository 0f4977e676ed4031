//! Call dispatch: lookup, validation, forwarding and result normalization.

use std::{io::Read, sync::Arc};

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{manager::SessionManager, transport::RemoteCallResult};
use crate::{
    error::{GatewayError, GatewayResult},
    inventory::{validate_arguments, IndexSnapshot},
};

/// Where call arguments come from.
pub enum ArgumentSource {
    /// JSON text given on the invocation surface.
    Inline(String),
    /// Already-parsed arguments.
    Value(Map<String, Value>),
    /// A side channel (typically stdin) carrying JSON text.
    Reader(Box<dyn Read + Send>),
}

impl ArgumentSource {
    /// Parse into an argument object. Blank input means `{}`.
    pub fn into_arguments(self) -> GatewayResult<Map<String, Value>> {
        let text = match self {
            ArgumentSource::Value(map) => return Ok(map),
            ArgumentSource::Inline(text) => text,
            ArgumentSource::Reader(mut reader) => {
                let mut text = String::new();
                reader
                    .read_to_string(&mut text)
                    .map_err(|e| invalid_arguments(format!("could not read arguments: {}", e)))?;
                text
            }
        };

        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(invalid_arguments(format!(
                "arguments must be a JSON object, got {}",
                match other {
                    Value::Array(_) => "an array",
                    Value::String(_) => "a string",
                    Value::Number(_) => "a number",
                    Value::Bool(_) => "a boolean",
                    _ => "null",
                }
            ))),
            Err(e) => Err(invalid_arguments(format!("arguments are not valid JSON: {}", e))),
        }
    }
}

fn invalid_arguments(violation: String) -> GatewayError {
    GatewayError::Validation {
        subject: "JSON arguments".to_string(),
        violations: vec![violation],
        schema: None,
    }
}

/// Normalized outcome of a call.
#[derive(Debug, Clone)]
pub enum CallEnvelope {
    Success { result: Value },
    Failure { error: GatewayError },
}

impl CallEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, CallEnvelope::Success { .. })
    }

    pub fn into_result(self) -> GatewayResult<Value> {
        match self {
            CallEnvelope::Success { result } => Ok(result),
            CallEnvelope::Failure { error } => Err(error),
        }
    }

    /// `{success, result}` or `{success, error: {type, message, help, ...}}`.
    pub fn to_json(&self) -> Value {
        match self {
            CallEnvelope::Success { result } => json!({ "success": true, "result": result }),
            CallEnvelope::Failure { error } => {
                json!({ "success": false, "error": error.to_json() })
            }
        }
    }
}

impl From<GatewayResult<Value>> for CallEnvelope {
    fn from(result: GatewayResult<Value>) -> Self {
        match result {
            Ok(result) => CallEnvelope::Success { result },
            Err(error) => CallEnvelope::Failure { error },
        }
    }
}

pub struct CallDispatcher {
    manager: Arc<SessionManager>,
}

impl CallDispatcher {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Validate and forward one call. Never panics or leaks transport errors.
    pub async fn call(
        &self,
        snapshot: Option<&IndexSnapshot>,
        server: &str,
        tool: &str,
        arguments: ArgumentSource,
    ) -> CallEnvelope {
        self.try_call(snapshot, server, tool, arguments).await.into()
    }

    async fn try_call(
        &self,
        snapshot: Option<&IndexSnapshot>,
        server: &str,
        tool: &str,
        arguments: ArgumentSource,
    ) -> GatewayResult<Value> {
        let registry = self.manager.registry();
        if !registry.contains(server) {
            return Err(registry.not_found(server));
        }

        let arguments = arguments.into_arguments()?;
        self.check(snapshot, server, tool, &arguments)?;

        let session = self.manager.acquire(server).await?;
        debug!("Calling '{}' on '{}'", tool, server);
        let outcome = session
            .call_tool(tool, arguments, self.manager.config().call_timeout)
            .await;
        self.manager.release(&session);

        let result = outcome?;
        info!("Call to '{}' on '{}' completed", tool, server);
        normalize(server, tool, result)
    }

    /// Lookup and validation against the index; no I/O.
    ///
    /// Servers without usable index entries skip both checks and leave
    /// rejection to the server.
    fn check(
        &self,
        snapshot: Option<&IndexSnapshot>,
        server: &str,
        tool: &str,
        arguments: &Map<String, Value>,
    ) -> GatewayResult<()> {
        let Some(snapshot) = snapshot.filter(|s| s.is_indexed(server)) else {
            debug!("No index entries for '{}', skipping validation", server);
            return Ok(());
        };

        let record = snapshot.get(server, tool).ok_or_else(|| {
            GatewayError::tool_not_found(
                server,
                tool,
                snapshot.tools_for(server).map(|r| r.name.as_str()),
            )
        })?;

        let violations = validate_arguments(&record.input_schema, arguments);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Validation {
                subject: format!("arguments for '{}/{}'", server, tool),
                violations,
                schema: Some(record.input_schema.clone()),
            })
        }
    }
}

/// Turn a raw call result into the tool's payload.
///
/// Structured content wins; otherwise text content is returned as parsed
/// JSON when it is JSON, else as text; anything else is the content array.
fn normalize(server: &str, tool: &str, result: RemoteCallResult) -> GatewayResult<Value> {
    if result.is_error {
        let message = result
            .text()
            .unwrap_or_else(|| Value::Array(result.content.clone()).to_string());
        return Err(GatewayError::ToolExecution {
            server: server.to_string(),
            tool: tool.to_string(),
            message,
        });
    }

    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }

    match result.text() {
        Some(text) => Ok(serde_json::from_str(&text).unwrap_or(Value::String(text))),
        None => Ok(Value::Array(result.content)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn text_result(text: &str, is_error: bool) -> RemoteCallResult {
        RemoteCallResult {
            content: vec![json!({"type": "text", "text": text})],
            structured_content: None,
            is_error,
        }
    }

    #[test]
    fn test_inline_and_reader_converge() {
        let inline = ArgumentSource::Inline(r#"{"owner": "acme"}"#.to_string())
            .into_arguments()
            .unwrap();
        let reader = ArgumentSource::Reader(Box::new(Cursor::new(br#"{"owner": "acme"}"#.to_vec())))
            .into_arguments()
            .unwrap();
        assert_eq!(inline, reader);
    }

    #[test]
    fn test_blank_arguments_are_empty_object() {
        assert!(ArgumentSource::Inline("  \n".to_string())
            .into_arguments()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let err = ArgumentSource::Inline("[1, 2]".to_string())
            .into_arguments()
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationError);
        assert!(err.to_string().contains("must be a JSON object"));

        let err = ArgumentSource::Inline("{oops".to_string())
            .into_arguments()
            .unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_normalize_prefers_structured_content() {
        let result = RemoteCallResult {
            content: vec![json!({"type": "text", "text": "ignored"})],
            structured_content: Some(json!({"id": 42})),
            is_error: false,
        };
        assert_eq!(normalize("s", "t", result).unwrap(), json!({"id": 42}));
    }

    #[test]
    fn test_normalize_parses_json_text() {
        assert_eq!(
            normalize("s", "t", text_result(r#"{"number": 7}"#, false)).unwrap(),
            json!({"number": 7})
        );
        assert_eq!(
            normalize("s", "t", text_result("plain words", false)).unwrap(),
            json!("plain words")
        );
    }

    #[test]
    fn test_normalize_tool_error_is_verbatim() {
        let err = normalize("github", "create_issue", text_result("Bad credentials", true))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ToolExecutionError);
        assert_eq!(err.to_string(), "Bad credentials");
    }

    #[test]
    fn test_envelope_json_shape() {
        let ok = CallEnvelope::Success {
            result: json!("done"),
        };
        assert_eq!(ok.to_json(), json!({"success": true, "result": "done"}));

        let failed = CallEnvelope::Failure {
            error: GatewayError::protocol("github", "connection reset"),
        };
        let value = failed.to_json();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"]["type"], json!("ProtocolError"));
        assert!(value["error"]["help"].is_string());
    }
}
