//! Panel-level settings (default source, debug logging, port).
//!
//! A small JSON file in the data dir, merged over defaults on load.
//! Unknown keys in an update payload are preserved-by-merge rather than
//! rejected; the port is normalized to a sane value.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

pub const DEFAULT_PORT: u16 = 8500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub default_source: String,
    pub debug_logging: bool,
    pub port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_source: "qobuz".to_string(),
            debug_logging: false,
            port: DEFAULT_PORT,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> AppSettings {
        let saved = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str::<Value>(&content).unwrap_or(Value::Null),
            Err(_) => Value::Null,
        };
        merge_settings(saved.as_object().cloned().unwrap_or_default())
    }

    /// Merge a patch over the stored settings and persist the result.
    pub async fn update(&self, patch: Map<String, Value>) -> anyhow::Result<AppSettings> {
        let mut current = serde_json::to_value(self.load().await)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        for (key, value) in patch {
            current.insert(key, value);
        }
        let settings = merge_settings(current);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&settings)?;
        tokio::fs::write(&self.path, json).await?;
        info!(?settings, "persisted app settings");
        Ok(settings)
    }
}

fn merge_settings(saved: Map<String, Value>) -> AppSettings {
    let defaults = AppSettings::default();
    AppSettings {
        default_source: saved
            .get("defaultSource")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or(defaults.default_source),
        debug_logging: saved
            .get("debugLogging")
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.debug_logging),
        port: saved.get("port").map(normalize_port).unwrap_or(defaults.port),
    }
}

/// Accept a port as a number or numeric string; anything unusable falls
/// back to the default.
fn normalize_port(value: &Value) -> u16 {
    let port = match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    };
    u16::try_from(port)
        .ok()
        .filter(|p| *p > 0)
        .unwrap_or(DEFAULT_PORT)
}
