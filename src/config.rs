//! Bridge configuration record.
//!
//! One `Config` exists per bridge, persisted by the host storage under the key
//! `config`. It carries the lease policy and the connection parameters for the
//! identity provider and the permission store. Nothing here is cached: every
//! consumer reads a fresh snapshot through [`ConfigStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::fields::{FieldData, FieldDefault, FieldKind, FieldSchema, FieldValue};
use crate::storage::{Storage, StorageEntry};

pub const CONFIG_KEY: &str = "config";
pub const DEFAULT_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_MAX_TTL_SECONDS: u64 = 3600;

pub const CONFIG_FIELDS: &[FieldSchema] = &[
    FieldSchema {
        name: "use_session_expiry_ttl",
        kind: FieldKind::Bool,
        required: false,
        default: Some(FieldDefault::Bool(false)),
        description: "Use the identity-provider session expiry as the credential TTL",
    },
    FieldSchema {
        name: "ttl_seconds",
        kind: FieldKind::DurationSecond,
        required: false,
        default: Some(FieldDefault::Seconds(DEFAULT_TTL_SECONDS)),
        description: "TTL of the issued credential in seconds (when use_session_expiry_ttl is false)",
    },
    FieldSchema {
        name: "max_ttl_seconds",
        kind: FieldKind::DurationSecond,
        required: false,
        default: Some(FieldDefault::Seconds(DEFAULT_MAX_TTL_SECONDS)),
        description: "Maximum TTL of the issued credential in seconds",
    },
    FieldSchema {
        name: "permission_store_host",
        kind: FieldKind::String,
        required: true,
        default: None,
        description: "host[:port] of the permission store",
    },
    FieldSchema {
        name: "identity_provider_url",
        kind: FieldKind::String,
        required: true,
        default: None,
        description: "Base URL of the identity provider",
    },
    FieldSchema {
        name: "identity_provider_description",
        kind: FieldKind::String,
        required: true,
        default: None,
        description: "Description of the identity provider instance",
    },
    FieldSchema {
        name: "identity_provider_user_agent",
        kind: FieldKind::String,
        required: false,
        default: None,
        description: "User agent sent with identity-provider requests",
    },
    FieldSchema {
        name: "identity_provider_headers",
        kind: FieldKind::KvPairs,
        required: false,
        default: None,
        description: "Headers sent with every identity-provider request",
    },
    FieldSchema {
        name: "identity_provider_debug",
        kind: FieldKind::Bool,
        required: true,
        default: None,
        description: "Log every identity-provider request and response status",
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub use_session_expiry_ttl: bool,
    #[serde(default = "Config::default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "Config::default_max_ttl_seconds")]
    pub max_ttl_seconds: u64,
    pub permission_store_host: String,
    pub identity_provider_url: String,
    pub identity_provider_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_user_agent: Option<String>,
    #[serde(default)]
    pub identity_provider_headers: BTreeMap<String, String>,
    pub identity_provider_debug: bool,
}

impl Config {
    fn default_ttl_seconds() -> u64 { DEFAULT_TTL_SECONDS }
    fn default_max_ttl_seconds() -> u64 { DEFAULT_MAX_TTL_SECONDS }

    /// Minimal record with the required connection parameters and default lease policy.
    pub fn new<S: Into<String>>(permission_store_host: S, identity_provider_url: S, identity_provider_description: S) -> Self {
        Self {
            use_session_expiry_ttl: false,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            max_ttl_seconds: DEFAULT_MAX_TTL_SECONDS,
            permission_store_host: permission_store_host.into(),
            identity_provider_url: identity_provider_url.into(),
            identity_provider_description: identity_provider_description.into(),
            identity_provider_user_agent: None,
            identity_provider_headers: BTreeMap::new(),
            identity_provider_debug: false,
        }
    }

    /// Build a record from a create request. Every required field must be present.
    pub fn decode_create(raw: &Map<String, Value>) -> BridgeResult<Self> {
        let data = FieldData::decode(CONFIG_FIELDS, raw)?;
        data.check_required()?;
        let mut config = Config::new(
            data.require_str("permission_store_host")?,
            data.require_str("identity_provider_url")?,
            data.require_str("identity_provider_description")?,
        );
        config.apply(&data);
        Ok(config)
    }

    /// Build a record from an update request: provided fields are merged onto the
    /// stored record; with nothing stored this is a create.
    pub fn decode_update(existing: Option<Config>, raw: &Map<String, Value>) -> BridgeResult<Self> {
        let Some(mut config) = existing else { return Self::decode_create(raw); };
        let data = FieldData::decode(CONFIG_FIELDS, raw)?;
        config.apply(&data);
        config.validate()?;
        Ok(config)
    }

    /// Copy every explicitly provided field onto the record.
    fn apply(&mut self, data: &FieldData<'_>) {
        if let Some(FieldValue::Bool(v)) = data.get_ok("use_session_expiry_ttl") {
            self.use_session_expiry_ttl = *v;
        }
        if let Some(FieldValue::Seconds(v)) = data.get_ok("ttl_seconds") {
            self.ttl_seconds = *v;
        }
        if let Some(FieldValue::Seconds(v)) = data.get_ok("max_ttl_seconds") {
            self.max_ttl_seconds = *v;
        }
        if let Some(FieldValue::String(v)) = data.get_ok("permission_store_host") {
            self.permission_store_host = v.clone();
        }
        if let Some(FieldValue::String(v)) = data.get_ok("identity_provider_url") {
            self.identity_provider_url = v.clone();
        }
        if let Some(FieldValue::String(v)) = data.get_ok("identity_provider_description") {
            self.identity_provider_description = v.clone();
        }
        if let Some(FieldValue::String(v)) = data.get_ok("identity_provider_user_agent") {
            self.identity_provider_user_agent = if v.is_empty() { None } else { Some(v.clone()) };
        }
        if let Some(FieldValue::KvPairs(v)) = data.get_ok("identity_provider_headers") {
            self.identity_provider_headers = v.clone();
        }
        if let Some(FieldValue::Bool(v)) = data.get_ok("identity_provider_debug") {
            self.identity_provider_debug = *v;
        }
        debug!(fields = ?CONFIG_FIELDS.iter().filter(|f| data.get_ok(f.name).is_some()).map(|f| f.name).collect::<Vec<_>>(), "config.apply");
    }

    /// Required connection parameters are present.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.permission_store_host.trim().is_empty() {
            return Err(BridgeError::missing_field("permission_store_host"));
        }
        if self.identity_provider_url.trim().is_empty() {
            return Err(BridgeError::missing_field("identity_provider_url"));
        }
        if self.identity_provider_description.trim().is_empty() {
            return Err(BridgeError::missing_field("identity_provider_description"));
        }
        Ok(())
    }

    /// The record as a JSON object using the config field names.
    pub fn to_response(&self) -> BridgeResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(BridgeError::internal("config did not serialize to an object")),
        }
    }
}

/// Reads and writes the configuration record through the storage collaborator.
#[derive(Clone)]
pub struct ConfigStore {
    storage: Arc<dyn Storage>,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self { Self { storage } }

    pub async fn read(&self) -> BridgeResult<Option<Config>> {
        debug!("reading config");
        let Some(entry) = self.storage.get(CONFIG_KEY).await? else {
            debug!("config entry was absent");
            return Ok(None);
        };
        let config: Config = entry.decode_json()?;
        Ok(Some(config))
    }

    /// Fresh snapshot, or `ConfigUnavailable` when none is stored.
    pub async fn require(&self) -> BridgeResult<Config> {
        self.read().await?.ok_or_else(BridgeError::config_unavailable)
    }

    pub async fn write(&self, config: &Config) -> BridgeResult<()> {
        config.validate()?;
        let entry = StorageEntry::json(CONFIG_KEY, config)?;
        self.storage.put(entry).await?;
        debug!("successfully stored config");
        Ok(())
    }

    pub async fn delete(&self) -> BridgeResult<()> {
        self.storage.delete(CONFIG_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn raw(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn full_create() -> Map<String, Value> {
        raw(json!({
            "permission_store_host": "keto:4466",
            "identity_provider_url": "http://kratos:4433",
            "identity_provider_description": "kratos",
            "identity_provider_debug": false,
        }))
    }

    #[test]
    fn create_applies_defaults() {
        let c = Config::decode_create(&full_create()).unwrap();
        assert!(!c.use_session_expiry_ttl);
        assert_eq!(c.ttl_seconds, 3600);
        assert_eq!(c.max_ttl_seconds, 3600);
        assert!(c.identity_provider_user_agent.is_none());
        assert!(c.identity_provider_headers.is_empty());
    }

    #[test]
    fn create_requires_connection_fields() {
        for field in ["permission_store_host", "identity_provider_url", "identity_provider_description", "identity_provider_debug"] {
            let mut body = full_create();
            body.remove(field);
            let err = Config::decode_create(&body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MissingField, "{field}");
            assert_eq!(err.message(), format!("{field} is required"));
        }
    }

    #[test]
    fn create_rejects_mistyped_fields() {
        let mut body = full_create();
        body.insert("ttl_seconds".into(), json!("an hour"));
        assert_eq!(Config::decode_create(&body).unwrap_err().kind(), ErrorKind::InvalidField);
    }

    #[test]
    fn update_merges_onto_stored_record() {
        let stored = Config::decode_create(&full_create()).unwrap();
        let updated = Config::decode_update(
            Some(stored.clone()),
            &raw(json!({"ttl_seconds": 60, "identity_provider_headers": {"X-Tenant": "a"}})),
        )
        .unwrap();
        assert_eq!(updated.ttl_seconds, 60);
        assert_eq!(updated.max_ttl_seconds, stored.max_ttl_seconds);
        assert_eq!(updated.permission_store_host, "keto:4466");
        assert_eq!(updated.identity_provider_headers.get("X-Tenant").map(String::as_str), Some("a"));
    }

    #[test]
    fn update_cannot_blank_required_fields() {
        let stored = Config::decode_create(&full_create()).unwrap();
        let err = Config::decode_update(Some(stored), &raw(json!({"identity_provider_url": ""}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }

    #[test]
    fn update_without_stored_record_is_create() {
        let err = Config::decode_update(None, &raw(json!({"ttl_seconds": 5}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }

    #[test]
    fn response_uses_field_names() {
        let c = Config::decode_create(&full_create()).unwrap();
        let map = c.to_response().unwrap();
        for field in CONFIG_FIELDS.iter().filter(|f| f.name != "identity_provider_user_agent") {
            assert!(map.contains_key(field.name), "{}", field.name);
        }
    }

    #[tokio::test]
    async fn store_round_trip_and_absence() {
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        assert_eq!(store.require().await.unwrap_err().kind(), ErrorKind::ConfigUnavailable);

        let c = Config::new("keto:4466", "http://kratos:4433", "kratos");
        store.write(&c).await.unwrap();
        assert_eq!(store.require().await.unwrap(), c);

        store.delete().await.unwrap();
        assert!(store.read().await.unwrap().is_none());
    }
}
