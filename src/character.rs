use std::env;
use std::fs;
use std::path::PathBuf;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::traits::PromptContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub bio: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub style: Vec<String>,
    #[serde(default)]
    pub post_examples: Vec<String>,
}

impl CharacterConfig {
    pub fn persona(&self) -> String {
        let mut sections = Vec::new();
        if !self.bio.is_empty() {
            sections.push(self.bio.join(" "));
        }
        if !self.topics.is_empty() {
            sections.push(format!("Topics: {}", self.topics.join(", ")));
        }
        if !self.style.is_empty() {
            sections.push(format!("Style:\n- {}", self.style.join("\n- ")));
        }
        if !self.post_examples.is_empty() {
            sections.push(format!("Example posts:\n{}", self.post_examples.join("\n")));
        }
        sections.join("\n\n")
    }

    /// Placeholders every prompt template can rely on.
    pub fn prompt_context(&self, username: &str) -> PromptContext {
        let mut context = PromptContext::new();
        context.insert("agentName".to_string(), self.name.clone());
        context.insert("twitterUserName".to_string(), username.to_string());
        context.insert("persona".to_string(), self.persona());
        context
    }
}

pub fn load_character_config() -> Result<CharacterConfig> {
    let character_name = env::var("CHARACTER_NAME").unwrap_or_else(|_| "agent".to_string());

    let mut config_path = PathBuf::from("characters");
    config_path.push(character_name.trim());
    config_path.push("config.json");

    if !config_path.exists() {
        return Err(anyhow::anyhow!(
            "Character config not found for '{}' at {:?}",
            character_name,
            config_path
        ));
    }

    let config_str = fs::read_to_string(&config_path)?;
    let config: CharacterConfig = serde_json::from_str(&config_str)?;

    info!(character = %config.name, "loaded character profile");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_context_contains_persona() {
        let config: CharacterConfig = serde_json::from_str(
            r#"{"name": "Rina", "prompt": "You are Rina.", "bio": ["likes rust"], "topics": ["compilers", "tea"]}"#,
        )
        .unwrap();
        let context = config.prompt_context("rina_bot");
        assert_eq!(context["agentName"], "Rina");
        assert_eq!(context["twitterUserName"], "rina_bot");
        assert!(context["persona"].contains("likes rust"));
        assert!(context["persona"].contains("Topics: compilers, tea"));
    }
}
