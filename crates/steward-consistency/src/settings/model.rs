use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Persisted settings record, one per resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsRecord {
    #[serde(default)]
    pub values: HashMap<String, String>,
    /// Fencing token of the lease that authorized the last write
    #[serde(default)]
    pub token: u64,
    /// Number of merges applied
    #[serde(default)]
    pub version: u64,
}

impl SettingsRecord {
    /// Apply `delta` key by key; an empty value deletes the key
    pub fn apply_delta(&mut self, delta: &HashMap<String, String>) {
        for (key, value) in delta {
            if value.is_empty() {
                self.values.remove(key);
            } else {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            version: self.version,
            values: self.values.clone(),
        }
    }
}

/// Settings as delivered to watchers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub version: u64,
    pub values: HashMap<String, String>,
}
