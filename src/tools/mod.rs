//! Named, typed capabilities the agent can invoke
//!
//! A [`Tool`] pairs a [`ToolSchema`] with an async handler. The
//! [`ToolRegistry`] is the capability table agents draw their tools from;
//! agents receive clones, so later registry changes do not reach agents
//! that were already built.

mod builtin;
mod expr;
mod schema;

pub use builtin::{BuiltinOptions, SearchBackend, BUILTIN_TOOL_NAMES};
pub use expr::evaluate_expression;
pub use schema::{ParamSpec, ParamType, ToolArgs, ToolSchema};

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Agent;
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    #[default]
    Utility,
    Knowledge,
    Media,
    Connector,
    Developer,
    Custom,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Utility => "utility",
            ToolCategory::Knowledge => "knowledge",
            ToolCategory::Media => "media",
            ToolCategory::Connector => "connector",
            ToolCategory::Developer => "developer",
            ToolCategory::Custom => "custom",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolCategory {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "utility" => Ok(ToolCategory::Utility),
            "knowledge" => Ok(ToolCategory::Knowledge),
            "media" => Ok(ToolCategory::Media),
            "connector" => Ok(ToolCategory::Connector),
            "developer" => Ok(ToolCategory::Developer),
            "custom" => Ok(ToolCategory::Custom),
            other => Err(EngineError::InvalidInput(format!("unknown tool category: {}", other))),
        }
    }
}

pub type ToolHandler =
    Arc<dyn Fn(RequestContext, ToolArgs) -> BoxFuture<'static, EngineResult<Value>> + Send + Sync>;

/// Tool description as sent to a model provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A named capability. Cloning is cheap; the handler is shared.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub category: ToolCategory,
    pub is_builtin: bool,
    pub version: Option<String>,
    handler: ToolHandler,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("is_builtin", &self.is_builtin)
            .finish()
    }
}

impl Tool {
    /// Build a tool from an async handler returning any serializable value.
    ///
    /// Handlers receive the caller's [`RequestContext`] and are expected to
    /// stop work once it is cancelled.
    pub fn new<F, Fut, R>(name: &str, description: &str, schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(RequestContext, ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<R>> + Send + 'static,
        R: Serialize + 'static,
    {
        let handler: ToolHandler = Arc::new(
            move |ctx: RequestContext, args: ToolArgs| -> BoxFuture<'static, EngineResult<Value>> {
                let fut = handler(ctx, args);
                Box::pin(async move {
                    let output = fut.await?;
                    serde_json::to_value(output)
                        .map_err(|e| EngineError::ToolOutput(e.to_string()))
                })
            },
        );
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            category: ToolCategory::Utility,
            is_builtin: false,
            version: None,
            handler,
        }
    }

    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub(crate) fn builtin(mut self) -> Self {
        self.is_builtin = true;
        self.version = Some(env!("CARGO_PKG_VERSION").to_string());
        self
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.to_json_schema(),
        }
    }

    /// Validate raw JSON arguments and run the handler under `ctx`.
    pub async fn invoke(&self, ctx: &RequestContext, raw_arguments: &str) -> EngineResult<Value> {
        let args = self.schema.parse_arguments(raw_arguments)?;
        self.call(ctx, args).await
    }

    pub async fn call(&self, ctx: &RequestContext, args: ToolArgs) -> EngineResult<Value> {
        ctx.run((self.handler)(ctx.clone(), args)).await
    }
}

#[derive(Default)]
struct RegistryState {
    tools: HashMap<String, Tool>,
    by_category: HashMap<ToolCategory, BTreeSet<String>>,
}

/// Capability table keyed by tool name with a per-category index.
#[derive(Default)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(&self, tool: Tool) -> EngineResult<()> {
        if tool.name.trim().is_empty() {
            return Err(EngineError::Configuration(
                "tool name cannot be empty".to_string(),
            ));
        }
        let mut state = self.state.write();
        if state.tools.contains_key(&tool.name) {
            return Err(EngineError::ToolExists(tool.name));
        }
        state
            .by_category
            .entry(tool.category)
            .or_default()
            .insert(tool.name.clone());
        tracing::debug!(tool = %tool.name, category = %tool.category, "Registered tool");
        state.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Register a user-supplied tool; the category defaults to `custom`.
    pub fn register_custom_tool(
        &self,
        mut tool: Tool,
        category: Option<ToolCategory>,
    ) -> EngineResult<()> {
        tool.category = category.unwrap_or(ToolCategory::Custom);
        tool.is_builtin = false;
        self.register_tool(tool)
    }

    pub fn get_tool(&self, name: &str) -> EngineResult<Tool> {
        self.state
            .read()
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.state.read().tools.contains_key(name)
    }

    /// All tools, sorted by name.
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.state.read().tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn list_tools_by_category(&self, category: ToolCategory) -> Vec<Tool> {
        let state = self.state.read();
        state
            .by_category
            .get(&category)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| state.tools.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Categories that currently hold at least one tool.
    pub fn categories(&self) -> Vec<ToolCategory> {
        let mut categories: Vec<ToolCategory> = self
            .state
            .read()
            .by_category
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(category, _)| *category)
            .collect();
        categories.sort();
        categories
    }

    pub fn unregister_tool(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.write();
        let tool = state
            .tools
            .remove(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
        if let Some(names) = state.by_category.get_mut(&tool.category) {
            names.remove(name);
        }
        Ok(())
    }

    /// Copy the named tools onto `agent`. Nothing is added unless every
    /// name resolves.
    pub fn add_tools_to_agent(&self, agent: &mut Agent, names: &[&str]) -> EngineResult<()> {
        let tools = {
            let state = self.state.read();
            names
                .iter()
                .map(|name| {
                    state
                        .tools
                        .get(*name)
                        .cloned()
                        .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
                })
                .collect::<EngineResult<Vec<Tool>>>()?
        };
        agent.add_tools(tools);
        Ok(())
    }

    /// JSON array describing every registered tool.
    pub fn export_tool_specifications(&self) -> EngineResult<String> {
        #[derive(Serialize)]
        struct Exported<'a> {
            name: &'a str,
            description: &'a str,
            parameters: Value,
            category: ToolCategory,
            is_builtin: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            version: Option<&'a str>,
        }

        let tools = self.list_tools();
        let exported: Vec<Exported<'_>> = tools
            .iter()
            .map(|t| Exported {
                name: &t.name,
                description: &t.description,
                parameters: t.schema.to_json_schema(),
                category: t.category,
                is_builtin: t.is_builtin,
                version: t.version.as_deref(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&exported)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool(name: &str) -> Tool {
        Tool::new(
            name,
            "Echo the input",
            ToolSchema::new().param(ParamSpec::required("text", ParamType::String, "Text to echo")),
            |_ctx, args| async move { Ok::<_, EngineError>(json!({"echo": args.str("text")?})) },
        )
    }

    #[test]
    fn test_register_rejects_empty_and_duplicate() {
        let registry = ToolRegistry::new();
        registry.register_tool(echo_tool("echo")).unwrap();

        let err = registry.register_tool(echo_tool("echo")).unwrap_err();
        assert_eq!(err.to_string(), "tool with name 'echo' already exists");

        let err = registry.register_tool(echo_tool("  ")).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: tool name cannot be empty");
    }

    #[test]
    fn test_category_index() {
        let registry = ToolRegistry::new();
        registry.register_tool(echo_tool("a")).unwrap();
        registry
            .register_custom_tool(echo_tool("b"), None)
            .unwrap();
        registry
            .register_tool(echo_tool("c").with_category(ToolCategory::Media))
            .unwrap();

        assert_eq!(
            registry.categories(),
            vec![ToolCategory::Utility, ToolCategory::Media, ToolCategory::Custom]
        );
        let custom = registry.list_tools_by_category(ToolCategory::Custom);
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].name, "b");

        registry.unregister_tool("c").unwrap();
        assert!(registry.list_tools_by_category(ToolCategory::Media).is_empty());
        assert!(!registry.categories().contains(&ToolCategory::Media));
        assert!(matches!(
            registry.unregister_tool("c"),
            Err(EngineError::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_validates_arguments() {
        let tool = echo_tool("echo");
        let ctx = RequestContext::new();
        let out = tool.invoke(&ctx, r#"{"text": "hi"}"#).await.unwrap();
        assert_eq!(out, json!({"echo": "hi"}));

        let err = tool.invoke(&ctx, "{}").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArguments(_)));
    }

    #[test]
    fn test_export_specifications() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(echo_tool("echo").with_version("1.2.0"))
            .unwrap();
        let exported: Value = serde_json::from_str(&registry.export_tool_specifications().unwrap()).unwrap();
        let first = &exported[0];
        assert_eq!(first["name"], "echo");
        assert_eq!(first["category"], "utility");
        assert_eq!(first["is_builtin"], false);
        assert_eq!(first["version"], "1.2.0");
        assert_eq!(first["parameters"]["required"], json!(["text"]));
    }
}
