//! Provider configuration passthrough.
//!
//! The provider config file is an external collaborator: the panel edits it
//! section by section, and a download backend consumes it. This module only
//! validates updates against the known section schemas — explicit field
//! descriptors instead of a free-form key-value dump — and persists the
//! result as TOML. Unknown sections and keys are ignored on update; a known
//! key with the wrong type is a validation error and nothing is written.

use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::info;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    /// Integer constrained to an inclusive range.
    Int { min: i64, max: i64 },
    Text,
    /// Credential strings — same validation as Text, tagged so a UI can
    /// mask them.
    Secret,
    TextList,
}

pub struct FieldDesc {
    pub key: &'static str,
    pub kind: FieldKind,
}

pub struct SectionSchema {
    pub name: &'static str,
    pub fields: &'static [FieldDesc],
}

const fn field(key: &'static str, kind: FieldKind) -> FieldDesc {
    FieldDesc { key, kind }
}

/// The sections the panel knows how to edit.
pub static SECTIONS: &[SectionSchema] = &[
    SectionSchema {
        name: "qobuz",
        fields: &[
            field("email_or_userid", FieldKind::Text),
            field("password_or_token", FieldKind::Secret),
            field("app_id", FieldKind::Text),
            field("secrets", FieldKind::TextList),
            field("use_auth_token", FieldKind::Bool),
            field("quality", FieldKind::Int { min: 0, max: 4 }),
        ],
    },
    SectionSchema {
        name: "tidal",
        fields: &[
            field("access_token", FieldKind::Secret),
            field("refresh_token", FieldKind::Secret),
            field("user_id", FieldKind::Text),
            field("country_code", FieldKind::Text),
            field("token_expiry", FieldKind::Text),
            field("quality", FieldKind::Int { min: 0, max: 3 }),
        ],
    },
    SectionSchema {
        name: "deezer",
        fields: &[
            field("arl", FieldKind::Secret),
            field("quality", FieldKind::Int { min: 0, max: 2 }),
        ],
    },
    SectionSchema {
        name: "soundcloud",
        fields: &[
            field("client_id", FieldKind::Secret),
            field("app_version", FieldKind::Text),
            field("quality", FieldKind::Int { min: 0, max: 0 }),
        ],
    },
    SectionSchema {
        name: "downloads",
        fields: &[
            field("folder", FieldKind::Text),
            field("source_subdirectories", FieldKind::Bool),
            field("concurrency", FieldKind::Bool),
            field("max_connections", FieldKind::Int { min: 1, max: 32 }),
            field("requests_per_minute", FieldKind::Int { min: 0, max: 6000 }),
        ],
    },
    SectionSchema {
        name: "database",
        fields: &[
            field("downloads_enabled", FieldKind::Bool),
            field("downloads_path", FieldKind::Text),
            field("failed_downloads_enabled", FieldKind::Bool),
            field("failed_downloads_path", FieldKind::Text),
        ],
    },
];

fn schema_for(section: &str) -> Option<&'static SectionSchema> {
    SECTIONS.iter().find(|s| s.name == section)
}

fn check_value(section: &str, desc: &FieldDesc, value: &Value) -> Result<(), ApiError> {
    let ok = match desc.kind {
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Int { min, max } => value
            .as_i64()
            .map(|n| n >= min && n <= max)
            .unwrap_or(false),
        FieldKind::Text | FieldKind::Secret => value.is_string(),
        FieldKind::TextList => value
            .as_array()
            .map(|items| items.iter().all(|v| v.is_string()))
            .unwrap_or(false),
    };
    if ok {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "invalid value for {section}.{}",
            desc.key
        )))
    }
}

/// Schema-checked store over the provider config TOML file.
pub struct SectionStore {
    path: PathBuf,
}

impl SectionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Current config as a JSON object keyed by section.
    pub async fn export(&self) -> Value {
        toml_to_json(&self.read_doc().await)
    }

    /// Apply per-section updates. The whole payload is validated before
    /// anything is written, so a bad key never half-applies a batch.
    pub async fn update(&self, updates: Map<String, Value>) -> Result<Value, ApiError> {
        // Validate first.
        for (section, values) in &updates {
            let Some(schema) = schema_for(section) else {
                continue;
            };
            let Some(values) = values.as_object() else {
                return Err(ApiError::Validation(format!(
                    "section '{section}' must be an object"
                )));
            };
            for (key, value) in values {
                if let Some(desc) = schema.fields.iter().find(|f| f.key == *key) {
                    check_value(section, desc, value)?;
                }
            }
        }

        let mut doc = self.read_doc().await;
        let table = doc.as_table_mut().expect("config root is a table");
        for (section, values) in &updates {
            let Some(schema) = schema_for(section) else {
                info!(%section, "ignoring unknown config section");
                continue;
            };
            let Some(values) = values.as_object() else {
                continue;
            };
            let entry = table
                .entry(section.clone())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
            let Some(section_table) = entry.as_table_mut() else {
                continue;
            };
            for (key, value) in values {
                if schema.fields.iter().any(|f| f.key == *key) {
                    section_table.insert(key.clone(), json_to_toml(value));
                } else {
                    info!(%section, %key, "ignoring unknown config key");
                }
            }
        }

        self.write_doc(&doc).await.map_err(ApiError::Internal)?;
        info!(sections = ?updates.keys().collect::<Vec<_>>(), "applied config update");
        Ok(self.export().await)
    }

    async fn read_doc(&self) -> toml::Value {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content
                .parse::<toml::Value>()
                .unwrap_or(toml::Value::Table(toml::map::Map::new())),
            Err(_) => toml::Value::Table(toml::map::Map::new()),
        }
    }

    async fn write_doc(&self, doc: &toml::Value) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(doc)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

fn json_to_toml(value: &Value) -> toml::Value {
    match value {
        Value::Bool(b) => toml::Value::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                toml::Value::Integer(i)
            } else {
                toml::Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => toml::Value::String(s.clone()),
        Value::Array(items) => toml::Value::Array(items.iter().map(json_to_toml).collect()),
        Value::Object(map) => toml::Value::Table(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_toml(v)))
                .collect(),
        ),
        Value::Null => toml::Value::String(String::new()),
    }
}

fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => Value::from(*f),
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}
