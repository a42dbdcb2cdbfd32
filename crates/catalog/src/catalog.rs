//! The ordered set of configured servers and its bundle format.

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use mcp::{ServerConfig, TransportKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Bundle format version written by [`ServerCatalog::export`].
pub const BUNDLE_VERSION: &str = "1.0.0";

/// A configured server plus bookkeeping timestamps (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    #[serde(flatten)]
    pub config: ServerConfig,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Versioned, exchangeable snapshot of a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub servers: Vec<ServerRecord>,
}

/// How [`ServerCatalog::import`] treats records already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportMode {
    /// Update existing ids in place and append new ones.
    #[default]
    Merge,
    /// Make the incoming set the whole catalog.
    Replace,
}

/// Counts reported by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Ordered server configurations keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCatalog {
    records: Vec<ServerRecord>,
}

impl ServerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog saved with [`save`](Self::save). A missing file is an
    /// empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no catalog file; starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut catalog = Self::new();
        let summary = catalog.import(&json, ImportMode::Replace)?;
        debug!(path = %path.display(), servers = summary.imported, "catalog loaded");
        Ok(catalog)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.export_json()?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn list(&self) -> &[ServerRecord] {
        &self.records
    }

    pub fn configs(&self) -> impl Iterator<Item = &ServerConfig> {
        self.records.iter().map(|record| &record.config)
    }

    pub fn get(&self, id: &str) -> Option<&ServerRecord> {
        self.records.iter().find(|record| record.config.id == id)
    }

    /// Replace the record with the same id, keeping its creation time, or
    /// append a new one.
    pub fn upsert(&mut self, config: ServerConfig) -> &ServerRecord {
        let now = now_millis();
        let index = match self.position(&config.id) {
            Some(index) => {
                let record = &mut self.records[index];
                record.config = config;
                record.updated_at = now;
                index
            }
            None => {
                self.records.push(ServerRecord {
                    config,
                    created_at: now,
                    updated_at: now,
                });
                self.records.len() - 1
            }
        };
        &self.records[index]
    }

    /// Remove the record with `id`; returns whether one existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.config.id != id);
        self.records.len() != before
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn export(&self) -> ExportBundle {
        ExportBundle {
            version: BUNDLE_VERSION.to_string(),
            exported_at: Utc::now(),
            servers: self.records.clone(),
        }
    }

    /// The export bundle as pretty-printed JSON.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    /// Import servers from a bundle document.
    ///
    /// Records without a name or with an unknown transport type are skipped.
    /// Records without an id get a fresh one. Ids are never re-keyed: in
    /// merge mode a matching id is updated in place.
    pub fn import(&mut self, json: &str, mode: ImportMode) -> Result<ImportSummary> {
        let document: Value = serde_json::from_str(json)?;
        let Value::Object(mut bundle) = document else {
            return Err(Error::InvalidBundle("expected a JSON object".into()));
        };
        let Some(Value::Array(servers)) = bundle.remove("servers") else {
            return Err(Error::InvalidBundle("missing servers array".into()));
        };
        match bundle.get("version").and_then(Value::as_str) {
            Some(BUNDLE_VERSION) => {}
            version => warn!(?version, expected = BUNDLE_VERSION, "unexpected bundle version"),
        }

        if mode == ImportMode::Replace {
            self.records.clear();
        }

        let now = now_millis();
        let mut summary = ImportSummary::default();
        for (index, raw) in servers.into_iter().enumerate() {
            match parse_record(raw, now) {
                Ok(record) => {
                    self.merge(record, now);
                    summary.imported += 1;
                }
                Err(reason) => {
                    warn!(index, %reason, "skipping server record");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            imported = summary.imported,
            skipped = summary.skipped,
            ?mode,
            "servers imported"
        );
        Ok(summary)
    }

    fn merge(&mut self, record: ServerRecord, now: i64) {
        match self.position(&record.config.id) {
            Some(index) => {
                let existing = &mut self.records[index];
                existing.config = record.config;
                existing.updated_at = now;
            }
            None => self.records.push(record),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|record| record.config.id == id)
    }
}

fn parse_record(raw: Value, now: i64) -> std::result::Result<ServerRecord, String> {
    let Value::Object(mut fields) = raw else {
        return Err("record is not an object".into());
    };

    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or("record has no name")?
        .to_string();

    let known_kind = fields
        .get("type")
        .cloned()
        .is_some_and(|kind| serde_json::from_value::<TransportKind>(kind).is_ok());
    if !known_kind {
        return Err(format!("record {name} has an unknown transport type"));
    }

    let has_id = fields
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        fields.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    fields.entry("createdAt").or_insert_with(|| now.into());
    fields.entry("updatedAt").or_insert_with(|| now.into());

    serde_json::from_value(Value::Object(fields)).map_err(|e| format!("record {name}: {e}"))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
