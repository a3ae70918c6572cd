use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use tracing::{debug, info};

use crate::core::traits::{Clock, GenerationPipeline, PromptContext};
use crate::models::{InteractionState, SelectedContent, SpecialInteraction};

pub const MAX_TWEET_LENGTH: usize = 280;
const ELLIPSIS: &str = "...";

pub const POST_TEMPLATE: &str = "# About {{agentName}} (@{{twitterUserName}}):
{{persona}}

# Recent timeline:
{{timeline}}

# Task: Generate a post in the voice and style of {{agentName}} (@{{twitterUserName}}).
Write a 1-3 sentence post about one of {{agentName}}'s topics. Do not add commentary or acknowledge this request, just write the post.
Your response should not contain any questions. Brief, concise statements only. No emojis. Use \\n\\n (double spaces) between statements.
Stay under 280 characters.";

/// Chooses between a scripted special interaction and a generated post.
pub struct ContentSelector {
    interactions: BTreeMap<String, SpecialInteraction>,
    cooldown: Duration,
    state: HashMap<String, InteractionState>,
    generator: Arc<dyn GenerationPipeline>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    template: String,
}

impl ContentSelector {
    pub fn new(
        interactions: BTreeMap<String, SpecialInteraction>,
        cooldown: Duration,
        generator: Arc<dyn GenerationPipeline>,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        ContentSelector {
            interactions,
            cooldown,
            state: HashMap::new(),
            generator,
            clock,
            rng,
            template: POST_TEMPLATE.to_string(),
        }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = template.to_string();
        self
    }

    pub async fn select_content(
        &mut self,
        context: &PromptContext,
    ) -> Result<SelectedContent, anyhow::Error> {
        if let Some(special) = self.try_special() {
            return Ok(special);
        }

        let prompt = self.generator.compose_prompt(&self.template, context);
        debug!(prompt = %prompt, "generating post");
        let raw = self.generator.generate_text(&prompt).await?;
        Ok(SelectedContent::generated(format_post(&strip_quotes(&raw))))
    }

    /// One random interaction type gets a single chance per call.
    pub fn try_special(&mut self) -> Option<SelectedContent> {
        let kind = self.interactions.keys().choose(&mut self.rng)?.clone();
        let interaction = self.interactions.get(&kind)?;
        let now = self.clock.now();

        if let Some(state) = self.state.get(&kind) {
            if now - state.last_triggered_at < self.cooldown {
                debug!(interaction = %kind, "special interaction cooling down");
                return None;
            }
        }
        if self.rng.gen::<f64>() >= interaction.probability {
            return None;
        }

        let template = interaction.templates.choose(&mut self.rng)?;
        let topic = interaction.topics.choose(&mut self.rng).cloned().unwrap_or_default();
        let text = format!("{} {}", interaction.handle, template.replace("{{topic}}", &topic));

        self.state.insert(kind.clone(), InteractionState { last_triggered_at: now });
        info!(interaction = %kind, handle = %interaction.handle, "special interaction triggered");

        Some(SelectedContent {
            text: format_post(&text),
            is_special: true,
            special_type: Some(kind),
        })
    }

    pub fn interaction_state(&self, kind: &str) -> Option<InteractionState> {
        self.state.get(kind).copied()
    }
}

/// Turns escaped newlines into real ones, trims, and fits the tweet limit.
pub fn format_post(text: &str) -> String {
    let unescaped = text.replace("\\r\\n", "\n").replace("\\n", "\n");
    truncate_to_complete_sentence(unescaped.trim(), MAX_TWEET_LENGTH)
}

fn strip_quotes(text: &str) -> String {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed);
    stripped.to_string()
}

/// Lengths are counted in chars. Prefers the last full stop inside the limit,
/// then the last whitespace (plus an ellipsis), then a hard cut (plus an
/// ellipsis). The result never exceeds `max_len`.
pub fn truncate_to_complete_sentence(text: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }

    if let Some(period) = chars[..max_len].iter().rposition(|c| *c == '.') {
        let candidate: String = chars[..=period].iter().collect();
        let candidate = candidate.trim();
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }

    let budget = max_len.saturating_sub(ELLIPSIS.len());
    // A space at `budget` still lets the prefix fit.
    let window = (budget + 1).min(chars.len());
    if let Some(space) = chars[..window].iter().rposition(|c| c.is_whitespace()) {
        let candidate: String = chars[..space].iter().collect();
        let candidate = candidate.trim_end();
        if !candidate.is_empty() {
            return format!("{}{}", candidate, ELLIPSIS);
        }
    }

    let hard: String = chars[..budget].iter().collect();
    format!("{}{}", hard.trim_end(), ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"hello\""), "hello");
        assert_eq!(strip_quotes("  plain  "), "plain");
        assert_eq!(strip_quotes("\"unbalanced"), "\"unbalanced");
    }
}
