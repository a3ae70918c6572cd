use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use crate::models::{InteractionLimits, SpecialInteraction};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("POST_INTERVAL_MIN ({min}) is greater than POST_INTERVAL_MAX ({max})")]
    InvalidRange { min: i64, max: i64 },
}

/// Everything the schedulers need, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub username: String,
    pub dry_run: bool,
    pub post_interval_min: Duration,
    pub post_interval_max: Duration,
    pub post_immediately: Option<bool>,
    pub search_count: usize,
    pub max_thread_depth: usize,
    pub limits: InteractionLimits,
    pub special_interactions: BTreeMap<String, SpecialInteraction>,
    pub special_interaction_cooldown: Duration,
    pub storage_dir: PathBuf,
    pub redis_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let username = get("TWITTER_USERNAME")
            .map(|name| name.trim_start_matches('@').to_string())
            .ok_or(SettingsError::Missing("TWITTER_USERNAME"))?;

        let min: i64 = parse_or(&get, "POST_INTERVAL_MIN", 90)?;
        let max: i64 = parse_or(&get, "POST_INTERVAL_MAX", 180)?;
        if min < 0 || min > max {
            return Err(SettingsError::InvalidRange { min, max });
        }

        let defaults = InteractionLimits::default();
        let reply_probability: f64 =
            parse_or(&get, "REPLY_PROBABILITY", defaults.reply_probability)?;
        let limits = InteractionLimits {
            max_replies_per_thread: parse_or(
                &get,
                "MAX_REPLIES_PER_THREAD",
                defaults.max_replies_per_thread,
            )?,
            max_replies_per_user: parse_or(
                &get,
                "MAX_REPLIES_PER_USER",
                defaults.max_replies_per_user,
            )?,
            min_time_between_replies: Duration::minutes(parse_or(
                &get,
                "MIN_TIME_BETWEEN_REPLIES",
                defaults.min_time_between_replies.num_minutes(),
            )?),
            poll_interval: Duration::seconds(parse_or(
                &get,
                "TWITTER_POLL_INTERVAL",
                defaults.poll_interval.num_seconds(),
            )?),
            reply_probability: reply_probability.clamp(0.0, 1.0),
        };

        let special_interactions = get("SPECIAL_INTERACTIONS")
            .map(|raw| parse_special_interactions(&raw))
            .unwrap_or_default();

        Ok(Settings {
            username,
            dry_run: parse_bool(&get, "TWITTER_DRY_RUN")?.unwrap_or(false),
            post_interval_min: Duration::minutes(min),
            post_interval_max: Duration::minutes(max),
            post_immediately: parse_bool(&get, "POST_IMMEDIATELY")?,
            search_count: parse_or(&get, "TWITTER_SEARCH_COUNT", 20)?,
            max_thread_depth: parse_or(&get, "MAX_THREAD_DEPTH", 10)?,
            limits,
            special_interactions,
            special_interaction_cooldown: Duration::hours(parse_or(
                &get,
                "SPECIAL_INTERACTION_COOLDOWN",
                24,
            )?),
            storage_dir: get("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./storage")),
            redis_url: get("REDIS_URL"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, SettingsError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| SettingsError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &'static str) -> Result<Option<bool>, SettingsError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => match value.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(SettingsError::Invalid { key, value }),
        },
        None => Ok(None),
    }
}

/// Parses `{type: {handle, topics, templates, probability}}`. Each entry is
/// validated on its own; bad entries are dropped with a warning.
pub fn parse_special_interactions(raw: &str) -> BTreeMap<String, SpecialInteraction> {
    let entries: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "SPECIAL_INTERACTIONS is not a JSON object, ignoring it");
            return BTreeMap::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(kind, value)| {
            match serde_json::from_value::<SpecialInteraction>(value) {
                Ok(interaction) if !(0.0..=1.0).contains(&interaction.probability) => {
                    warn!(interaction = %kind, probability = interaction.probability, "probability out of range, dropping");
                    None
                }
                Ok(interaction) if interaction.templates.is_empty() => {
                    warn!(interaction = %kind, "no templates, dropping");
                    None
                }
                Ok(interaction) => Some((kind, interaction)),
                Err(e) => {
                    warn!(interaction = %kind, error = %e, "invalid special interaction, dropping");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[("TWITTER_USERNAME", "@agent")])).unwrap();
        assert_eq!(settings.username, "agent");
        assert!(!settings.dry_run);
        assert_eq!(settings.post_interval_min, Duration::minutes(90));
        assert_eq!(settings.post_interval_max, Duration::minutes(180));
        assert_eq!(settings.post_immediately, None);
        assert_eq!(settings.limits.max_replies_per_user, 5);
        assert!(settings.special_interactions.is_empty());
    }

    #[test]
    fn test_missing_username() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("TWITTER_USERNAME")));
    }

    #[test]
    fn test_invalid_interval_range() {
        let err = Settings::from_lookup(lookup(&[
            ("TWITTER_USERNAME", "agent"),
            ("POST_INTERVAL_MIN", "120"),
            ("POST_INTERVAL_MAX", "60"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidRange { min: 120, max: 60 }));
    }

    #[test]
    fn test_invalid_number_and_bool() {
        let err = Settings::from_lookup(lookup(&[
            ("TWITTER_USERNAME", "agent"),
            ("MAX_REPLIES_PER_USER", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "MAX_REPLIES_PER_USER", .. }));

        let err = Settings::from_lookup(lookup(&[
            ("TWITTER_USERNAME", "agent"),
            ("TWITTER_DRY_RUN", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "TWITTER_DRY_RUN", .. }));
    }

    #[test]
    fn test_overrides_and_probability_clamp() {
        let settings = Settings::from_lookup(lookup(&[
            ("TWITTER_USERNAME", "agent"),
            ("TWITTER_DRY_RUN", "true"),
            ("POST_IMMEDIATELY", "false"),
            ("REPLY_PROBABILITY", "1.5"),
            ("TWITTER_POLL_INTERVAL", "30"),
        ]))
        .unwrap();
        assert!(settings.dry_run);
        assert_eq!(settings.post_immediately, Some(false));
        assert_eq!(settings.limits.reply_probability, 1.0);
        assert_eq!(settings.limits.poll_interval, Duration::seconds(30));
    }

    #[test]
    fn test_special_interactions_drop_bad_entries() {
        let raw = r#"{
            "tate": {"handle": "@tate", "topics": ["gym"], "templates": ["hey {{topic}}"], "probability": 0.5},
            "broken": {"handle": "@x"},
            "too_likely": {"handle": "@y", "templates": ["a"], "probability": 2.0},
            "silent": {"handle": "@z", "templates": [], "probability": 0.1}
        }"#;
        let parsed = parse_special_interactions(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["tate"].handle, "@tate");
    }

    #[test]
    fn test_special_interactions_malformed_json() {
        assert!(parse_special_interactions("not json").is_empty());
        assert!(parse_special_interactions("[1, 2]").is_empty());
    }
}
