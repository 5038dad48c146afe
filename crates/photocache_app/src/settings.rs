//! RON settings file for the `photocache` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;
use photocache_core::TemplateUrls;
use photocache_engine::{EngineConfig, ParserSelectors};
use serde::{Deserialize, Serialize};

use crate::logging::LogDestination;

pub const CONFIG_ENV: &str = "PHOTOCACHE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "photocache.ron";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Holds both snapshots plus the downloaded pages and files.
    pub data_dir: PathBuf,
    /// RON list of `(key, remote_id)` pairs.
    pub registry_file: PathBuf,
    pub urls: TemplateUrls,
    /// Base for resolving relative sub-item urls found on pages.
    pub base_url: Option<String>,
    pub selectors: ParserSelectors,
    pub concurrency: usize,
    pub normal_interval_secs: u64,
    pub busy_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Re-acquire completed entries older than this many days.
    pub max_age_days: Option<i64>,
    pub user_agent: Option<String>,
    pub log_level: String,
    pub log_destination: LogDestination,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default_with_root(PathBuf::from("photocache-data"));
        Self {
            data_dir: engine.queue.root_dir,
            registry_file: PathBuf::from("tracked.ron"),
            urls: TemplateUrls::new(
                "https://photos.example/taxa/{id}",
                "https://photos.example/taxa/{id}/photos?page={page}",
                "https://photos.example/taxa/{id}/about",
            ),
            base_url: None,
            selectors: ParserSelectors::default(),
            concurrency: engine.queue.concurrency,
            normal_interval_secs: engine.scheduler.normal_interval.as_secs(),
            busy_interval_secs: engine.scheduler.busy_interval.as_secs(),
            shutdown_grace_secs: engine.scheduler.shutdown_grace.as_secs(),
            max_age_days: None,
            user_agent: None,
            log_level: "info".to_string(),
            log_destination: LogDestination::Terminal,
        }
    }
}

impl AppSettings {
    /// Reads the settings file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("cannot read settings {:?}", path))
            }
        };
        ron::from_str(&text).with_context(|| format!("cannot parse settings {:?}", path))
    }

    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default_with_root(self.data_dir.clone());
        config.queue.concurrency = self.concurrency.max(1);
        config.scheduler.normal_interval = Duration::from_secs(self.normal_interval_secs);
        config.scheduler.busy_interval = Duration::from_secs(self.busy_interval_secs);
        config.scheduler.shutdown_grace = Duration::from_secs(self.shutdown_grace_secs);
        if let Some(user_agent) = &self.user_agent {
            config.fetch.user_agent = user_agent.clone();
        }
        config
    }
}

/// `--config` wins over `PHOTOCACHE_CONFIG`, which wins over the default.
pub fn config_path(cli: Option<PathBuf>, env: Option<String>) -> PathBuf {
    cli.or_else(|| env.filter(|v| !v.trim().is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn empty_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photocache.ron");
        fs::write(&path, "()").unwrap();
        assert_eq!(AppSettings::load(&path).unwrap(), AppSettings::default());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = AppSettings::load(&dir.path().join("nope.ron")).unwrap();
        assert_eq!(loaded, AppSettings::default());
    }

    #[test]
    fn partial_file_overrides_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photocache.ron");
        fs::write(
            &path,
            r#"(
                data_dir: "/var/lib/photocache",
                concurrency: 0,
                busy_interval_secs: 2,
                log_level: "debug",
                log_destination: Both("photocache.log"),
            )"#,
        )
        .unwrap();

        let settings = AppSettings::load(&path).unwrap();
        assert_eq!(settings.log_level(), LevelFilter::Debug);
        assert_eq!(
            settings.log_destination,
            LogDestination::Both(PathBuf::from("photocache.log"))
        );

        let engine = settings.engine_config();
        assert_eq!(engine.queue.concurrency, 1);
        assert_eq!(engine.scheduler.busy_interval, Duration::from_secs(2));
        assert_eq!(
            engine.queue.snapshot_file,
            PathBuf::from("/var/lib/photocache/queue.json")
        );
        assert_eq!(engine.scheduler.normal_interval, Duration::from_secs(900));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photocache.ron");
        fs::write(&path, "(concurrency: \"many\")").unwrap();
        assert!(AppSettings::load(&path).is_err());
    }

    #[test]
    fn config_path_precedence() {
        assert_eq!(
            config_path(Some("a.ron".into()), Some("b.ron".into())),
            PathBuf::from("a.ron")
        );
        assert_eq!(config_path(None, Some("b.ron".into())), PathBuf::from("b.ron"));
        assert_eq!(config_path(None, Some(" ".into())), PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(config_path(None, None), PathBuf::from(DEFAULT_CONFIG_FILE));
    }
}
