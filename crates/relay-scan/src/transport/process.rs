//! Transport that delegates each request to an external helper program.
//!
//! The request is passed as a single JSON argument `{"url","method","params","abi"}` and the
//! helper's stdout is parsed as JSON. Used for log scans that need ABI-aware decoding done by a
//! separate tool.

use serde_json::{json, Value};
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{parse_response, Transport};
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct ProcessTransport {
    program: String,
    args: Vec<String>,
    url: String,
    abi: Option<Value>,
    timeout: Duration,
}

impl ProcessTransport {
    /// `program` is run with `args` followed by the JSON request; `url` is the node it talks to.
    pub fn new(program: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            url: url.into(),
            abi: None,
            timeout: Duration::from_secs(200),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn abi(mut self, abi: Value) -> Self {
        self.abi = Some(abi);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let request = json!({
            "url": self.url,
            "method": method,
            "params": params,
            "abi": self.abi.clone().unwrap_or(Value::Null),
        });
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(request.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        tracing::trace!(program = %self.program, method, "running external RPC helper");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Process(format!("spawn {}: {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        let response: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| TransportError::Process(format!("cannot parse helper output: {e}")))?;
        interpret(response)
    }
}

/// Helpers may answer with a JSON-RPC style object or with the bare result.
fn interpret(response: Value) -> Result<Value, TransportError> {
    match response.get("error") {
        Some(Value::String(message)) => Err(TransportError::Process(message.clone())),
        Some(_) => parse_response(response),
        None if response.get("result").is_some() => parse_response(response),
        None => Ok(response),
    }
}

impl Transport for ProcessTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn request(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send {
        self.call(method, params)
    }
}
