//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::client::ClientConfig;
use crate::source::SourceConfig;

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🧵 How many workers, how big the batches, how patient the retries.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 🧵 parallel publish workers, one `Client` each
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// 📦 events per bulk request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 📬 batches waiting in the channel before the reader blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// ⏳ first retry delay
    #[serde(default = "default_retry_backoff_init_ms")]
    pub retry_backoff_init_ms: u64,
    /// ⏳ retry delay ceiling
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
}

fn default_workers() -> usize {
    1
}

fn default_batch_size() -> usize {
    1600
}

fn default_queue_capacity() -> usize {
    10
}

fn default_retry_backoff_init_ms() -> u64 {
    1000
}

fn default_retry_backoff_max_ms() -> u64 {
    60_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            retry_backoff_init_ms: default_retry_backoff_init_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
        }
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`BKX_*`, `__` for nesting, so
/// `BKX_CLIENT__HOSTS='["es1:9200"]'`) with an optional TOML file. TOML wins on conflicts.
///
/// - `None`  → env vars only. No file. No assumptions.
/// - `Some`  → env vars + TOML file, merged.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BKX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    // 💬 None of that "error: error" energy.
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BKX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BKX_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::NonIndexablePolicy;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_every_knob_is_turned() -> anyhow::Result<()> {
        let file = write_test_config(
            r#"
            [client]
            hosts = ["es1:9200", "https://es2:9200"]
            api_key = "k3y"
            timeout_secs = 30
            max_retries = 5
            compression_level = 3
            index = "logs-%{[service]}-%{+yyyy.MM}"
            pipeline = "enrich"
            dead_timeout_secs = 10

            [client.headers]
            X-Tenant = "ducks"

            [client.non_indexable_policy]
            type = "dead_letter_index"
            index = "graveyard"

            [source]
            file_name = "events.ndjson"

            [runtime]
            workers = 4
            batch_size = 500
            "#,
        );

        let config = load_config(Some(file.path()))?;
        assert_eq!(config.client.hosts.len(), 2);
        assert_eq!(config.client.api_key.as_deref(), Some("k3y"));
        assert_eq!(config.client.compression_level, 3);
        assert_eq!(config.client.headers.get("X-Tenant").map(String::as_str), Some("ducks"));
        assert_eq!(
            config.client.non_indexable_policy,
            NonIndexablePolicy::DeadLetterIndex {
                index: "graveyard".to_string()
            }
        );
        assert_eq!(config.source.file_name, "events.ndjson");
        assert_eq!(config.runtime.workers, 4);
        assert_eq!(config.runtime.batch_size, 500);
        assert_eq!(config.runtime.queue_capacity, 10);
        Ok(())
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() -> anyhow::Result<()> {
        let file = write_test_config(
            r#"
            [client]
            hosts = ["localhost:9200"]

            [source]
            file_name = "in.ndjson"
            "#,
        );

        let config: AppConfig = Figment::new().merge(Toml::file(file.path())).extract()?;
        assert_eq!(config.client.protocol, "http");
        assert_eq!(config.client.timeout_secs, 90);
        assert_eq!(config.client.max_retries, 3);
        assert_eq!(config.client.compression_level, 0);
        assert_eq!(config.client.index, "events-%{+yyyy.MM.dd}");
        assert_eq!(config.client.non_indexable_policy, NonIndexablePolicy::Drop);
        assert_eq!(config.client.dead_timeout_secs, 60);
        assert_eq!(config.runtime.workers, 1);
        assert_eq!(config.runtime.batch_size, 1600);
        assert_eq!(config.runtime.retry_backoff_init_ms, 1000);
        assert_eq!(config.runtime.retry_backoff_max_ms, 60_000);
        Ok(())
    }

    #[test]
    fn the_one_where_the_policy_type_is_made_up() {
        let file = write_test_config(
            r#"
            [client]
            hosts = ["localhost:9200"]
            non_indexable_policy = { type = "shrug" }

            [source]
            file_name = "in.ndjson"
            "#,
        );
        let result: Result<AppConfig, _> = Figment::new().merge(Toml::file(file.path())).extract();
        assert!(result.is_err());
    }

    #[test]
    fn the_one_where_toml_parses_without_figment_too() -> anyhow::Result<()> {
        let config: AppConfig = toml::from_str(
            r#"
            [client]
            hosts = ["localhost:9200"]
            [source]
            file_name = "in.ndjson"
            [runtime]
            queue_capacity = 2
            "#,
        )?;
        assert_eq!(config.runtime.queue_capacity, 2);
        Ok(())
    }
}
