//! Versioned document envelope and schema migration chain

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DomainError;

/// Envelope every persisted document is wrapped in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedDocument<T> {
    pub schema_version: u32,
    pub payload: T,
}

/// Pure upgrade step from schema `vN` to `vN+1`
pub type MigrationFn = fn(Value) -> Result<Value, DomainError>;

/// A single schema migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version this migration upgrades from
    pub from_version: u32,
    pub description: &'static str,
    pub migrate: MigrationFn,
}

/// Ordered chain of migrations for one document family (`cache`, `queue`)
#[derive(Debug, Clone)]
pub struct MigrationChain {
    name: &'static str,
    current_version: u32,
    migrations: Vec<Migration>,
}

impl MigrationChain {
    pub fn new(name: &'static str, current_version: u32) -> Self {
        Self {
            name,
            current_version,
            migrations: Vec::new(),
        }
    }

    pub fn with_migration(
        mut self,
        from_version: u32,
        description: &'static str,
        migrate: MigrationFn,
    ) -> Self {
        self.migrations.push(Migration {
            from_version,
            description,
            migrate,
        });
        self.migrations.sort_by_key(|m| m.from_version);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Storage key for a given schema version, e.g. `queue_v2`
    pub fn storage_key(&self, version: u32) -> String {
        format!("{}_v{}", self.name, version)
    }

    pub fn current_key(&self) -> String {
        self.storage_key(self.current_version)
    }

    /// Keys of older schema versions, newest first
    pub fn legacy_keys(&self) -> Vec<(u32, String)> {
        (1..self.current_version)
            .rev()
            .map(|version| (version, self.storage_key(version)))
            .collect()
    }

    /// Applies every migration from `from_version` up to the current version
    pub fn upgrade(&self, from_version: u32, payload: Value) -> Result<Value, DomainError> {
        if from_version > self.current_version {
            return Err(DomainError::migration(
                from_version,
                format!(
                    "{} schema is newer than supported v{}",
                    self.name, self.current_version
                ),
            ));
        }

        let mut version = from_version;
        let mut payload = payload;

        while version < self.current_version {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.from_version == version)
                .ok_or_else(|| {
                    DomainError::migration(version, format!("no {} migration registered", self.name))
                })?;

            tracing::debug!(
                document = self.name,
                from = version,
                to = version + 1,
                description = migration.description,
                "Applying schema migration"
            );

            payload = (migration.migrate)(payload)?;
            version += 1;
        }

        Ok(payload)
    }

    /// Serializes a payload inside the current-version envelope
    pub fn encode<T: Serialize>(&self, payload: &T) -> Result<String, DomainError> {
        let document = VersionedDocument {
            schema_version: self.current_version,
            payload,
        };
        Ok(serde_json::to_string(&document)?)
    }

    /// Parses a stored document found under the key of `key_version`,
    /// upgrading it to the current schema.
    ///
    /// Documents written before the envelope existed (no `schemaVersion`)
    /// are taken as a bare payload of the key's version.
    pub fn decode<T: DeserializeOwned>(&self, raw: &str, key_version: u32) -> Result<T, DomainError> {
        let root: Value = serde_json::from_str(raw)?;

        let (version, payload) = match root {
            Value::Object(mut map) if map.contains_key("schemaVersion") => {
                let version = map
                    .get("schemaVersion")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32)
                    .unwrap_or(key_version);
                let payload = map.remove("payload").unwrap_or(Value::Null);
                (version, payload)
            }
            other => (key_version, other),
        };

        let upgraded = self.upgrade(version, payload)?;
        let upgraded = if upgraded.is_null() {
            Value::Object(Default::default())
        } else {
            upgraded
        };

        Ok(serde_json::from_value(upgraded)?)
    }
}
