// Configuration module
//
// Settings come from the process environment, after `.env` has been loaded
// by `dotenvy`. Every variable has a default except `DATABASE_URL`, which
// the postgres backend requires.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use crate::logging::LogFormat;

/// Which store backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local tables, lost on exit. For development.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow!("unknown storage backend '{}'", other)),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub auth: AuthSettings,
    pub logging: LoggingSettings,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Worker threads; actix picks one per core when unset
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub pool_size: u32,
}

/// How the authenticated identity reaches the service
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Request header carrying the identity asserted by the auth service
    pub identity_header: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            identity_header: "x-user-id".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

/// Admin profile ensured at startup so a fresh deployment has someone who
/// can create staff.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub user_id: Uuid,
    pub full_name: String,
    pub email: String,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps variable names to values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = parse_or(&lookup, "EHR_STORAGE", StorageBackend::Postgres)?;
        let database_url = lookup("DATABASE_URL");
        if backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("DATABASE_URL must be set when EHR_STORAGE=postgres"));
        }

        let workers = match lookup("EHR_WORKERS") {
            Some(_) => Some(parse_or(&lookup, "EHR_WORKERS", 1usize)?),
            None => None,
        };

        let bootstrap_admin = match lookup("EHR_BOOTSTRAP_ADMIN_ID") {
            Some(_) => Some(BootstrapAdmin {
                user_id: parse_or(&lookup, "EHR_BOOTSTRAP_ADMIN_ID", Uuid::nil())?,
                full_name: lookup("EHR_BOOTSTRAP_ADMIN_NAME").unwrap_or_else(|| "Administrator".to_string()),
                email: lookup("EHR_BOOTSTRAP_ADMIN_EMAIL").unwrap_or_else(|| "admin@localhost".to_string()),
            }),
            None => None,
        };

        Ok(AppConfig {
            server: ServerSettings {
                host: lookup("EHR_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: parse_or(&lookup, "EHR_PORT", 8080)?,
                workers,
            },
            storage: StorageSettings {
                backend,
                database_url,
                pool_size: parse_or(&lookup, "EHR_DB_POOL_SIZE", 10)?,
            },
            auth: AuthSettings {
                identity_header: lookup("EHR_IDENTITY_HEADER")
                    .unwrap_or_else(|| AuthSettings::default().identity_header)
                    .to_lowercase(),
            },
            logging: LoggingSettings {
                level: lookup("EHR_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                format: LogFormat::from_name(&lookup("EHR_LOG_FORMAT").unwrap_or_default()),
            },
            bootstrap_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn memory_backend_needs_no_database_url() {
        let config = load(&[("EHR_STORAGE", "memory")]).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.workers, None);
        assert_eq!(config.storage.pool_size, 10);
        assert_eq!(config.auth.identity_header, "x-user-id");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let config = load(&[("DATABASE_URL", "postgres://localhost/ehr")]).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
    }

    #[test]
    fn invalid_port_names_the_variable() {
        let err = load(&[("EHR_STORAGE", "memory"), ("EHR_PORT", "eighty")]).unwrap_err();
        assert!(format!("{:#}", err).contains("EHR_PORT"));
    }

    #[test]
    fn bootstrap_admin_is_read_when_id_present() {
        let id = Uuid::new_v4();
        let id_text = id.to_string();
        let config = load(&[
            ("EHR_STORAGE", "memory"),
            ("EHR_BOOTSTRAP_ADMIN_ID", id_text.as_str()),
            ("EHR_BOOTSTRAP_ADMIN_EMAIL", "root@hospital.test"),
            ("EHR_LOG_FORMAT", "json"),
        ])
        .unwrap();
        let admin = config.bootstrap_admin.unwrap();
        assert_eq!(admin.user_id, id);
        assert_eq!(admin.full_name, "Administrator");
        assert_eq!(admin.email, "root@hospital.test");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
