use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{DEFAULT_USER_NAME, DeviceId};

/// Persisted activation record. Missing keys read back as their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ActivationRecord {
    #[serde(default)]
    pub activated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub service_paused: bool,
    /// Unix milliseconds; `0` means never recorded.
    #[serde(default)]
    pub last_connection: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    Activated {
        device_id: DeviceId,
        user_name: String,
    },
}

impl ActivationRecord {
    pub fn activation(&self) -> ActivationState {
        if !self.activated {
            return ActivationState::Inactive;
        }
        match self.device_id.as_deref().map(str::trim) {
            Some(device_id) if !device_id.is_empty() => ActivationState::Activated {
                device_id: device_id.to_owned(),
                user_name: self
                    .user_name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_USER_NAME.to_owned()),
            },
            _ => {
                warn!("activation record is marked activated but has no device id");
                ActivationState::Inactive
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to load activation state: {0}")]
    Load(String),
    #[error("failed to save activation state: {0}")]
    Save(String),
}

/// Typed access to the persisted activation record.
///
/// Implementors provide whole-record `load`/`save`; every screen goes through
/// the provided operations below.
pub trait ActivationRepository {
    fn load(&self) -> Result<ActivationRecord, StoreError>;
    fn save(&self, record: &ActivationRecord) -> Result<(), StoreError>;

    fn activation_state(&self) -> Result<ActivationState, StoreError> {
        Ok(self.load()?.activation())
    }

    fn is_activated(&self) -> Result<bool, StoreError> {
        Ok(matches!(
            self.activation_state()?,
            ActivationState::Activated { .. }
        ))
    }

    fn record_activation(&self, device_id: &str, user_name: &str) -> Result<(), StoreError> {
        let mut record = self.load()?;
        record.activated = true;
        record.device_id = Some(device_id.to_owned());
        record.user_name = Some(user_name.to_owned());
        self.save(&record)
    }

    fn is_service_paused(&self) -> Result<bool, StoreError> {
        Ok(self.load()?.service_paused)
    }

    fn set_service_paused(&self, paused: bool) -> Result<(), StoreError> {
        let mut record = self.load()?;
        if record.service_paused == paused {
            return Ok(());
        }
        record.service_paused = paused;
        self.save(&record)
    }

    fn last_connection(&self) -> Result<i64, StoreError> {
        Ok(self.load()?.last_connection)
    }

    /// Clears every persisted field. Used by every disconnect path.
    fn reset(&self) -> Result<(), StoreError> {
        self.save(&ActivationRecord::default())
    }
}

impl<R: ActivationRepository + ?Sized> ActivationRepository for &R {
    fn load(&self) -> Result<ActivationRecord, StoreError> {
        (**self).load()
    }

    fn save(&self, record: &ActivationRecord) -> Result<(), StoreError> {
        (**self).save(record)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    record: Mutex<ActivationRecord>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ActivationRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    pub fn snapshot(&self) -> ActivationRecord {
        self.record
            .lock()
            .map(|record| record.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl ActivationRepository for MemoryRepository {
    fn load(&self) -> Result<ActivationRecord, StoreError> {
        self.record
            .lock()
            .map(|record| record.clone())
            .map_err(|_| StoreError::Load("memory repository lock poisoned".to_owned()))
    }

    fn save(&self, record: &ActivationRecord) -> Result<(), StoreError> {
        let mut locked = self
            .record
            .lock()
            .map_err(|_| StoreError::Save("memory repository lock poisoned".to_owned()))?;
        *locked = record.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_activation_sets_all_fields() {
        let repo = MemoryRepository::new();
        repo.record_activation("DEV-1", "Dana").unwrap();

        assert!(repo.is_activated().unwrap());
        assert_eq!(
            repo.activation_state().unwrap(),
            ActivationState::Activated {
                device_id: "DEV-1".to_owned(),
                user_name: "Dana".to_owned(),
            }
        );
    }

    #[test]
    fn activated_without_device_id_reads_inactive() {
        let repo = MemoryRepository::with_record(ActivationRecord {
            activated: true,
            user_name: Some("Dana".to_owned()),
            ..ActivationRecord::default()
        });
        assert_eq!(repo.activation_state().unwrap(), ActivationState::Inactive);
        assert!(!repo.is_activated().unwrap());
    }

    #[test]
    fn missing_user_name_falls_back_to_default() {
        let record = ActivationRecord {
            activated: true,
            device_id: Some("DEV-1".to_owned()),
            ..ActivationRecord::default()
        };
        assert_eq!(
            record.activation(),
            ActivationState::Activated {
                device_id: "DEV-1".to_owned(),
                user_name: DEFAULT_USER_NAME.to_owned(),
            }
        );
    }

    #[test]
    fn reset_is_idempotent() {
        let repo = MemoryRepository::new();
        repo.record_activation("DEV-1", "Dana").unwrap();
        repo.set_service_paused(true).unwrap();

        repo.reset().unwrap();
        let once = repo.snapshot();
        repo.reset().unwrap();
        let twice = repo.snapshot();

        assert_eq!(once, ActivationRecord::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn record_deserializes_with_missing_keys() {
        let record: ActivationRecord = serde_json::from_str(r#"{"activated":true}"#).unwrap();
        assert!(record.activated);
        assert_eq!(record.device_id, None);
        assert!(!record.service_paused);
        assert_eq!(record.last_connection, 0);
    }
}
