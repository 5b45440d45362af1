//! Environment-driven configuration (spec.md §6 "Configuration (env)").
//!
//! Parsed once at startup, following the teacher's `gateway::config_parser`
//! convention of a single `Config` struct rather than scattered `env::var`
//! calls throughout the codebase.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStorageType {
    Local,
    AzureBlob,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub file_storage_type: FileStorageType,
    pub file_storage_path: Option<String>,
    pub api_port: u16,
    pub cors_origins: Vec<String>,
    pub azure_storage_connection_string: Option<String>,
    pub azure_storage_container: Option<String>,
    pub service_account_path: Option<String>,
}

impl Config {
    /// Reads the environment variables named in spec.md §6. Missing
    /// `DATABASE_URL` is the only hard failure; everything else defaults.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::validation("DATABASE_URL must be set"))?;

        let file_storage_type = match std::env::var("FILE_STORAGE_TYPE").as_deref() {
            Ok("azure_blob") => FileStorageType::AzureBlob,
            _ => FileStorageType::Local,
        };

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let api_port = std::env::var("API_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8000);

        Ok(Self {
            database_url,
            file_storage_type,
            file_storage_path: std::env::var("FILE_STORAGE_PATH").ok(),
            api_port,
            cors_origins,
            azure_storage_connection_string: std::env::var("AZURE_STORAGE_CONNECTION_STRING").ok(),
            azure_storage_container: std::env::var("AZURE_STORAGE_CONTAINER").ok(),
            service_account_path: std::env::var("GOOGLE_SERVICE_ACCOUNT_PATH").ok(),
        })
    }
}
