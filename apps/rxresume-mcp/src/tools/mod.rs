//! MCP tools: trait-based operations exposed through `tools/list` and
//! `tools/call`.
//!
//! Each tool is a linear sequence of authenticated HTTP calls. Failures are
//! reported back to the model as tool results flagged `isError`; they never
//! touch the session that carried the call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{ResumeServiceConfig, XBackboneConfig};
use crate::resume_client::sections::SectionError;
use crate::resume_client::{Credentials, ResumeClientError};
use crate::xbackbone::XBackboneError;

pub mod resume;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Client(#[from] ResumeClientError),

    #[error(transparent)]
    Section(#[from] SectionError),

    #[error(transparent)]
    Upload(#[from] XBackboneError),

    #[error("Failed to save PDF: {0}")]
    Io(#[from] std::io::Error),
}

/// The tool trait. Implement this to add an operation without touching the
/// protocol handler.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema for the tool's `arguments` object.
    fn input_schema(&self) -> Value;

    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Shared configuration handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub resume: ResumeServiceConfig,
    pub xbackbone: XBackboneConfig,
}

impl ToolContext {
    /// Credentials from the call arguments (top level or under `auth`),
    /// falling back to configuration.
    pub fn credentials(&self, args: &Value) -> Result<Credentials, ToolError> {
        let email = arg_or(args, "email", self.resume.email.as_deref()).ok_or_else(|| {
            ToolError::InvalidArguments(
                "Reactive Resume email is required (argument 'email' or RX_RESUME_EMAIL)".into(),
            )
        })?;
        let password = arg_or(args, "password", self.resume.password.as_deref()).ok_or_else(|| {
            ToolError::InvalidArguments(
                "Reactive Resume password is required (argument 'password' or RX_RESUME_PASSWORD)"
                    .into(),
            )
        })?;
        let base_url = arg_or(args, "base_url", Some(self.resume.base_url.as_str()))
            .unwrap_or_default();

        Ok(Credentials {
            email,
            password,
            base_url,
        })
    }
}

fn arg_or(args: &Value, key: &str, fallback: Option<&str>) -> Option<String> {
    args.get(key)
        .or_else(|| args.get("auth").and_then(|auth| auth.get(key)))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .or(fallback)
        .map(str::to_string)
}

/// Returns a non-empty string argument or the given error message.
pub(crate) fn required_str<'a>(
    args: &'a Value,
    key: &str,
    message: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(message.to_string()))
}

/// Ordered set of tools advertised to clients.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every Reactive Resume tool.
    pub fn with_resume_tools(ctx: Arc<ToolContext>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(resume::ListResumes::new(ctx.clone())));
        registry.register(Arc::new(resume::GetResume::new(ctx.clone())));
        registry.register(Arc::new(resume::CreateResume::new(ctx.clone())));
        registry.register(Arc::new(resume::UpdateResume::new(ctx.clone())));
        registry.register(Arc::new(resume::UpdateResumeSection::new(ctx.clone())));
        registry.register(Arc::new(resume::DownloadResumePdf::new(ctx)));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|existing| existing.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect()
    }
}

/// MCP `tools/call` result body.
pub fn tool_result(outcome: Result<Value, ToolError>) -> Value {
    let (text, is_error) = match outcome {
        Ok(Value::String(text)) => (text, false),
        Ok(value) => (
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            false,
        ),
        Err(e) => (format!("Error: {e}"), true),
    };
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}
