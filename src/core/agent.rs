use async_trait::async_trait;
use rig::agent::Agent as RigAgent;
use rig::completion::Prompt;
use rig::providers::anthropic::completion::CompletionModel;
use rig::providers::anthropic::{self, CLAUDE_3_HAIKU};
use tracing::debug;

use crate::core::traits::GenerationPipeline;
use crate::models::ResponseDecision;

/// Anthropic-backed text generation with the character prompt as preamble.
pub struct Agent {
    agent: RigAgent<CompletionModel>,
}

impl Agent {
    pub fn new(anthropic_api_key: &str, prompt: &str) -> Self {
        let client = anthropic::ClientBuilder::new(anthropic_api_key).build();
        let temperature = 0.9;

        let agent = client
            .agent(CLAUDE_3_HAIKU)
            .preamble(prompt)
            .temperature(temperature)
            .max_tokens(4096)
            .build();
        Agent { agent }
    }
}

#[async_trait]
impl GenerationPipeline for Agent {
    async fn generate_text(&self, prompt: &str) -> Result<String, anyhow::Error> {
        let response = self.agent.prompt(prompt).await?;
        Ok(response.trim().to_string())
    }

    async fn should_respond(&self, prompt: &str) -> Result<ResponseDecision, anyhow::Error> {
        let response = self.agent.prompt(prompt).await?;
        let decision = parse_decision(&response);
        debug!(?decision, response = %response.trim(), "should-respond answer");
        Ok(decision)
    }
}

/// Bracketed markers win; otherwise the leading word decides. Anything
/// unrecognised is an IGNORE.
pub fn parse_decision(response: &str) -> ResponseDecision {
    let response = response.trim().to_uppercase();
    if response.contains("[RESPOND]") {
        return ResponseDecision::Respond;
    }
    if response.contains("[STOP]") {
        return ResponseDecision::Stop;
    }
    if response.contains("[IGNORE]") {
        return ResponseDecision::Ignore;
    }
    let first = response
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|word| !word.is_empty());
    match first {
        Some("RESPOND") => ResponseDecision::Respond,
        Some("STOP") => ResponseDecision::Stop,
        _ => ResponseDecision::Ignore,
    }
}
