use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::TenantContext;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::utils;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub tenant_id: Option<String>,
    pub entity_id: Option<String>,
    pub api_token: Option<String>,
    /// IANA zone used for "today"; the machine's zone when unset.
    pub timezone: Option<String>,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            tenant_id: None,
            entity_id: None,
            api_token: None,
            timezone: None,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Applies `TEMPLE_*` overrides. `lookup` is `std::env::var` in practice.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty("TEMPLE_API_URL") {
            self.api_base_url = url;
        }
        if let Some(tenant) = non_empty("TEMPLE_TENANT_ID") {
            self.tenant_id = Some(tenant);
        }
        if let Some(entity) = non_empty("TEMPLE_ENTITY_ID") {
            self.entity_id = Some(entity);
        }
        if let Some(token) = non_empty("TEMPLE_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(zone) = non_empty("TEMPLE_TIMEZONE") {
            self.timezone = Some(zone);
        }
        if let Some(attempts) = non_empty("TEMPLE_RETRY_ATTEMPTS").and_then(|s| s.parse().ok()) {
            self.retry_attempts = attempts;
        }
        if let Some(delay) = non_empty("TEMPLE_RETRY_BASE_MS").and_then(|s| s.parse().ok()) {
            self.retry_base_delay_ms = delay;
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn zone(&self) -> Option<Tz> {
        let name = self.timezone.as_deref()?.trim();
        match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(err) => {
                tracing::warn!("ignoring unknown timezone {name:?}: {err}");
                None
            }
        }
    }

    pub fn tenant_context(&self) -> Result<TenantContext, String> {
        let tenant_id = self
            .tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "tenant id is not configured (set TEMPLE_TENANT_ID)".to_string())?;

        let mut ctx = TenantContext::new(tenant_id);
        if let Some(entity) = self.entity_id.as_deref().filter(|e| !e.trim().is_empty()) {
            ctx = ctx.with_entity(entity.trim());
        }
        if let Some(token) = self.api_token.as_deref().filter(|t| !t.trim().is_empty()) {
            ctx = ctx.with_token(token.trim());
        }
        Ok(ctx)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config lock poisoned")]
    Poisoned,
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(utils::config_path())
    }

    /// A missing file means defaults. So does a broken one, with a warning,
    /// so a typo never keeps the client from starting.
    pub fn load_from(path: PathBuf) -> Self {
        let data = read_config(&path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), "falling back to default config: {err}");
            AppConfig::default()
        });
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn read(&self) -> AppConfig {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Applies `transform` and writes the result before returning it.
    pub fn update<F>(&self, transform: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.data.lock().map_err(|_| ConfigError::Poisoned)?;
        let mut next = guard.clone();
        transform(&mut next);
        write_config(&self.path, &next)?;
        *guard = next;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(err) => Err(err.into()),
    }
}

/// Writes through a sibling temp file so readers never see half a config.
fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    utils::ensure_parent(path)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, serde_json::to_vec_pretty(config)?)?;
    fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"tenant_id": "t-1"}"#).unwrap();
        assert_eq!(config.tenant_id.as_deref(), Some("t-1"));
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn env_overrides_win_and_blanks_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("TEMPLE_API_URL", "https://api.example.org/v2"),
            ("TEMPLE_TENANT_ID", "  "),
            ("TEMPLE_RETRY_ATTEMPTS", "3"),
            ("TEMPLE_RETRY_BASE_MS", "not-a-number"),
            ("TEMPLE_TIMEZONE", "Asia/Kolkata"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig {
            tenant_id: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "https://api.example.org/v2");
        assert_eq!(config.tenant_id.as_deref(), Some("from-file"));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_base_delay_ms, 1000);
        assert_eq!(config.zone(), Some(chrono_tz::Asia::Kolkata));
    }

    #[test]
    fn unknown_zone_falls_back_to_local() {
        let config = AppConfig {
            timezone: Some("Mars/Olympus".into()),
            ..AppConfig::default()
        };
        assert_eq!(config.zone(), None);
    }

    #[test]
    fn tenant_context_requires_tenant() {
        assert!(AppConfig::default().tenant_context().is_err());

        let config = AppConfig {
            tenant_id: Some(" t-1 ".into()),
            entity_id: Some("".into()),
            api_token: Some("abc".into()),
            ..AppConfig::default()
        };
        let ctx = config.tenant_context().unwrap();
        assert_eq!(ctx.tenant_id, "t-1");
        assert_eq!(ctx.entity_id, None);
        assert_eq!(ctx.token.as_deref(), Some("abc"));
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::load_from(path.clone());
        assert_eq!(store.read(), AppConfig::default());

        let updated = store
            .update(|config| config.tenant_id = Some("t-42".into()))
            .unwrap();
        assert_eq!(updated.tenant_id.as_deref(), Some("t-42"));
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = ConfigStore::load_from(path);
        assert_eq!(reloaded.read().tenant_id.as_deref(), Some("t-42"));
    }

    #[test]
    fn broken_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ tenant_id: ").unwrap();

        assert!(matches!(read_config(&path), Err(ConfigError::Json(_))));
        assert_eq!(ConfigStore::load_from(path).read(), AppConfig::default());
    }

    #[test]
    fn failed_write_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be makes the rename fail
        let path = dir.path().join("config.json");
        fs::create_dir(&path).unwrap();
        let store = ConfigStore {
            path,
            data: Mutex::new(AppConfig::default()),
        };

        let err = store
            .update(|config| config.tenant_id = Some("t-9".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert_eq!(store.read().tenant_id, None);
    }
}
