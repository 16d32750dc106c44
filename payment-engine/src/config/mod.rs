//! Configuration module for payment-engine.

use crate::services::payments::{PaymentSettings, DEFAULT_SERVICE_DESCRIPTION};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub storage: StorageConfig,
    pub payments: PaymentConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    File,
}

impl StorageBackend {
    pub fn from_string(s: &str) -> Result<Self, AppError> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "file" => Ok(StorageBackend::File),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "STORAGE_BACKEND must be 'memory' or 'file', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// `None` disables the quota.
    pub quota_bytes: Option<usize>,
    pub cas_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub max_write_attempts: u32,
    pub default_service_description: String,
}

impl PaymentConfig {
    pub fn settings(&self) -> PaymentSettings {
        PaymentSettings {
            max_write_attempts: self.max_write_attempts,
            default_service_description: self.default_service_description.clone(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "payment-engine".to_string(),
            log_level: "info".to_string(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                data_dir: PathBuf::from("data"),
                quota_bytes: Some(DEFAULT_QUOTA_BYTES),
                cas_attempts: 5,
            },
            payments: PaymentConfig {
                max_write_attempts: 3,
                default_service_description: DEFAULT_SERVICE_DESCRIPTION.to_string(),
            },
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let quota_bytes = match env::var("STORAGE_QUOTA_BYTES") {
            Ok(raw) => {
                let bytes: usize = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "STORAGE_QUOTA_BYTES must be a byte count, got '{}'",
                        raw
                    ))
                })?;
                // 0 turns the quota off
                (bytes > 0).then_some(bytes)
            }
            Err(_) => Some(DEFAULT_QUOTA_BYTES),
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "payment-engine".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            storage: StorageConfig {
                backend: match env::var("STORAGE_BACKEND") {
                    Ok(raw) => StorageBackend::from_string(&raw)?,
                    Err(_) => StorageBackend::Memory,
                },
                data_dir: env::var("STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("data")),
                quota_bytes,
                cas_attempts: env::var("STORAGE_CAS_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            },
            payments: PaymentConfig {
                max_write_attempts: env::var("PAYMENT_MAX_WRITE_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                default_service_description: env::var("PAYMENT_DEFAULT_DESCRIPTION")
                    .unwrap_or_else(|_| DEFAULT_SERVICE_DESCRIPTION.to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(StorageBackend::from_string("File").unwrap(), StorageBackend::File);
        assert_eq!(StorageBackend::from_string("memory").unwrap(), StorageBackend::Memory);
        assert!(StorageBackend::from_string("redis").is_err());
    }

    #[test]
    fn defaults_keep_quota_on() {
        let config = EngineConfig::default();
        assert_eq!(config.storage.quota_bytes, Some(DEFAULT_QUOTA_BYTES));
        assert_eq!(config.payments.settings().max_write_attempts, 3);
    }
}
