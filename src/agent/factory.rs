//! Template-based agent construction

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Agent, AgentConfig, AgentDescriptor};
use crate::error::{EngineError, EngineResult};
use crate::provider::{CredentialSource, ModelSettings, ProviderCredentials, ProviderRegistry};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Conversational,
    Rag,
    Workflow,
    Custom,
}

/// Reusable agent preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTemplate {
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub default_tools: Vec<String>,
    #[serde(default)]
    pub settings: ModelSettings,
}

/// Identity of an agent to build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model: String,
    pub provider: String,
}

impl AgentSpec {
    pub fn new(name: &str, model: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            model: model.to_string(),
            provider: provider.to_string(),
        }
    }
}

fn default_templates() -> Vec<(&'static str, AgentTemplate)> {
    vec![
        (
            "default_conversation",
            AgentTemplate {
                agent_type: AgentType::Conversational,
                name: "Conversational assistant".to_string(),
                description: "General purpose chat assistant".to_string(),
                system_prompt: "You are a helpful assistant. Answer clearly and concisely."
                    .to_string(),
                default_tools: Vec::new(),
                settings: ModelSettings::new(0.7, 1000),
            },
        ),
        (
            "default_rag",
            AgentTemplate {
                agent_type: AgentType::Rag,
                name: "Knowledge assistant".to_string(),
                description: "Answers questions from knowledge bases".to_string(),
                system_prompt: "You answer questions using the knowledge_search tool. Only use \
                                information found in the knowledge base and say so when it is \
                                insufficient."
                    .to_string(),
                default_tools: vec!["knowledge_search".to_string()],
                settings: ModelSettings::new(0.5, 1500),
            },
        ),
        (
            "default_workflow",
            AgentTemplate {
                agent_type: AgentType::Workflow,
                name: "Workflow assistant".to_string(),
                description: "Completes multi-step tasks with tools".to_string(),
                system_prompt: "You complete tasks step by step, calling tools when they help."
                    .to_string(),
                default_tools: vec!["web_search".to_string(), "calculator".to_string()],
                settings: ModelSettings::new(0.3, 2000),
            },
        ),
    ]
}

/// Defaults applied to every agent the factory builds
#[derive(Debug, Clone, Copy)]
pub struct AgentDefaults {
    pub memory_size: usize,
    pub max_tool_rounds: usize,
    pub stream_buffer: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        let config = AgentConfig::default();
        Self {
            memory_size: config.memory_size,
            max_tool_rounds: config.max_tool_rounds,
            stream_buffer: config.stream_buffer,
        }
    }
}

/// Builds connected agents from templates and registered tools.
pub struct AgentFactory {
    templates: RwLock<HashMap<String, AgentTemplate>>,
    tools: Arc<ToolRegistry>,
    providers: Arc<ProviderRegistry>,
    credentials: Option<Arc<dyn CredentialSource>>,
    defaults: AgentDefaults,
}

impl AgentFactory {
    /// Factory preloaded with the `default_conversation`, `default_rag`
    /// and `default_workflow` templates.
    pub fn new(tools: Arc<ToolRegistry>, providers: Arc<ProviderRegistry>) -> Self {
        let templates = default_templates()
            .into_iter()
            .map(|(id, template)| (id.to_string(), template))
            .collect();
        Self {
            templates: RwLock::new(templates),
            tools,
            providers,
            credentials: None,
            defaults: AgentDefaults::default(),
        }
    }

    /// Resolve provider credentials from `source`. Without a source,
    /// providers are built with empty credentials.
    pub fn with_credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    pub fn with_defaults(mut self, defaults: AgentDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn register_template(&self, id: &str, template: AgentTemplate) -> EngineResult<()> {
        if id.trim().is_empty() {
            return Err(EngineError::Configuration("template ID cannot be empty".to_string()));
        }
        if template.name.trim().is_empty() {
            return Err(EngineError::Configuration("template name cannot be empty".to_string()));
        }
        self.templates.write().insert(id.to_string(), template);
        Ok(())
    }

    pub fn get_template(&self, id: &str) -> EngineResult<AgentTemplate> {
        self.templates
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))
    }

    /// Templates sorted by id
    pub fn list_templates(&self) -> Vec<(String, AgentTemplate)> {
        let mut templates: Vec<(String, AgentTemplate)> = self
            .templates
            .read()
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();
        templates.sort_by(|a, b| a.0.cmp(&b.0));
        templates
    }

    /// Build an agent from a template. Settings in `overrides` replace the
    /// template's.
    pub fn create_agent(
        &self,
        template_id: &str,
        spec: &AgentSpec,
        overrides: Option<&ModelSettings>,
    ) -> EngineResult<Agent> {
        let template = self.get_template(template_id)?;
        let description = if spec.description.is_empty() {
            template.description.clone()
        } else {
            spec.description.clone()
        };
        let config = self.config_for(
            None,
            spec,
            description,
            template.system_prompt,
            template.settings.merged(overrides),
        );
        let agent = self.assemble(config, &template.default_tools)?;
        info!(agent_id = %agent.id(), template = %template_id, "Created agent from template");
        Ok(agent)
    }

    pub fn create_custom_agent(
        &self,
        spec: &AgentSpec,
        system_prompt: &str,
        tool_names: &[String],
        settings: ModelSettings,
    ) -> EngineResult<Agent> {
        let config = self.config_for(
            None,
            spec,
            spec.description.clone(),
            system_prompt.to_string(),
            settings,
        );
        let agent = self.assemble(config, tool_names)?;
        info!(agent_id = %agent.id(), "Created custom agent");
        Ok(agent)
    }

    /// Rebuild an agent from its descriptor, keeping its id.
    pub fn restore_agent(&self, descriptor: &AgentDescriptor) -> EngineResult<Agent> {
        let spec = AgentSpec {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            model: descriptor.model.clone(),
            provider: descriptor.provider.clone(),
        };
        let config = self.config_for(
            Some(descriptor.id.clone()),
            &spec,
            descriptor.description.clone(),
            descriptor.system_prompt.clone(),
            descriptor.settings,
        );
        let mut agent = self.assemble(config, &descriptor.tools)?;
        agent.set_streaming(descriptor.streaming);
        Ok(agent)
    }

    fn config_for(
        &self,
        id: Option<String>,
        spec: &AgentSpec,
        description: String,
        system_prompt: String,
        settings: ModelSettings,
    ) -> AgentConfig {
        AgentConfig {
            id,
            name: spec.name.clone(),
            description,
            model: spec.model.clone(),
            provider: spec.provider.clone(),
            system_prompt,
            settings,
            memory_size: self.defaults.memory_size,
            max_tool_rounds: self.defaults.max_tool_rounds,
            stream_buffer: self.defaults.stream_buffer,
        }
    }

    fn assemble(&self, config: AgentConfig, tool_names: &[String]) -> EngineResult<Agent> {
        let mut agent = Agent::new(config)?;
        let names: Vec<&str> = tool_names.iter().map(String::as_str).collect();
        self.tools.add_tools_to_agent(&mut agent, &names)?;

        let credentials = match &self.credentials {
            Some(source) => source.credentials(agent.provider_name())?,
            None => ProviderCredentials::default(),
        };
        agent.connect(&self.providers, &credentials)?;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::BuiltinOptions;
    use crate::provider::StaticCredentials;

    fn factory() -> AgentFactory {
        let tools = Arc::new(ToolRegistry::new());
        tools.register_all_builtin_tools(&BuiltinOptions::default()).unwrap();
        AgentFactory::new(tools, Arc::new(ProviderRegistry::with_defaults()))
    }

    #[test]
    fn test_default_templates() {
        let factory = factory();
        let ids: Vec<String> = factory.list_templates().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["default_conversation", "default_rag", "default_workflow"]);

        let rag = factory.get_template("default_rag").unwrap();
        assert_eq!(rag.agent_type, AgentType::Rag);
        assert_eq!(rag.settings, ModelSettings::new(0.5, 1500));
        assert!(matches!(
            factory.get_template("nope"),
            Err(EngineError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_register_template_validation() {
        let factory = factory();
        let template = AgentTemplate {
            agent_type: AgentType::Custom,
            name: "Mine".into(),
            description: String::new(),
            system_prompt: "x".into(),
            default_tools: vec!["calculator".into()],
            settings: ModelSettings::default(),
        };
        assert!(factory.register_template("", template.clone()).is_err());
        assert!(factory
            .register_template(
                "mine",
                AgentTemplate {
                    name: " ".into(),
                    ..template.clone()
                }
            )
            .is_err());
        factory.register_template("mine", template).unwrap();
        assert_eq!(factory.list_templates().len(), 4);
    }

    #[test]
    fn test_create_agent_from_template() {
        let factory = factory();
        let agent = factory
            .create_agent(
                "default_workflow",
                &AgentSpec::new("worker", "echo-1", "echo"),
                Some(&ModelSettings {
                    temperature: Some(0.9),
                    max_tokens: None,
                }),
            )
            .unwrap();
        assert!(agent.is_connected());
        assert_eq!(agent.tool_names(), vec!["web_search", "calculator"]);
        assert_eq!(agent.settings(), ModelSettings::new(0.9, 2000));
        assert_eq!(agent.description(), "Completes multi-step tasks with tools");
    }

    #[test]
    fn test_missing_tool_or_provider_fails() {
        let factory = factory();
        // knowledge_search is not registered in this registry
        assert!(matches!(
            factory.create_agent("default_rag", &AgentSpec::new("r", "m", "echo"), None),
            Err(EngineError::ToolNotFound(_))
        ));
        assert!(matches!(
            factory.create_agent("default_conversation", &AgentSpec::new("c", "m", "acme"), None),
            Err(EngineError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_credentials_required_when_source_set() {
        let factory = factory().with_credentials(Arc::new(StaticCredentials::new()));
        assert!(matches!(
            factory.create_agent("default_conversation", &AgentSpec::new("c", "m", "echo"), None),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_restore_keeps_identity() {
        let factory = factory();
        let original = factory
            .create_custom_agent(
                &AgentSpec::new("custom", "echo-1", "echo"),
                "prompt",
                &["calculator".to_string()],
                ModelSettings::new(0.1, 10),
            )
            .unwrap();
        let restored = factory.restore_agent(&original.descriptor()).unwrap();
        assert_eq!(restored.descriptor(), original.descriptor());
    }
}
