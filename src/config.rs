//! Run configuration loaded from environment variables

use crate::error::ConfigError;
use crate::ingestion::types::CredentialTier;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CSV_PATH: &str = "public/leads_filtrado_revisado.csv";

/// Where the rows go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// PostgREST (Supabase) base URL plus API key
    Rest {
        base_url: String,
        api_key: String,
        tier: CredentialTier,
    },
    /// Direct Postgres connection string
    Postgres { database_url: String },
}

impl Backend {
    pub fn tier(&self) -> CredentialTier {
        match self {
            Backend::Rest { tier, .. } => *tier,
            // A direct connection runs as whatever role the URL names
            Backend::Postgres { .. } => CredentialTier::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub table: String,
    pub csv_path: PathBuf,
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub toggle_rls: bool,
    pub clear_before_import: bool,
    /// Write even when the table already holds rows
    pub allow_existing_rows: bool,
    pub request_timeout: Duration,
    pub sample_size: usize,
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Core parsing, decoupled from the real environment so tests can feed a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let parse_num = |var: &str, default: u64| -> Result<u64, ConfigError> {
            match get(var) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
                    var: var.to_string(),
                    reason: e.to_string(),
                }),
            }
        };

        let parse_flag = |var: &str| -> Result<bool, ConfigError> {
            match get(var) {
                None => Ok(false),
                Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::InvalidEnvVar {
                    var: var.to_string(),
                    reason: format!("expected a boolean, got '{raw}'"),
                }),
            }
        };

        let remote_url = get("REMOTE_URL")
            .or_else(|| get("VITE_SUPABASE_URL"))
            .ok_or_else(|| ConfigError::MissingEnvVar("REMOTE_URL".to_string()))?;

        let backend = if is_postgres_url(&remote_url) {
            Backend::Postgres {
                database_url: remote_url,
            }
        } else {
            let (api_key, tier) = if let Some(key) = get("REMOTE_KEY") {
                let tier = match get("REMOTE_KEY_ROLE").as_deref().map(str::trim) {
                    None => CredentialTier::Unknown,
                    Some("anon") => CredentialTier::Anon,
                    Some("service_role") => CredentialTier::ServiceRole,
                    Some(other) => {
                        return Err(ConfigError::InvalidEnvVar {
                            var: "REMOTE_KEY_ROLE".to_string(),
                            reason: format!("expected 'anon' or 'service_role', got '{other}'"),
                        })
                    }
                };
                (key, tier)
            } else if let Some(key) = get("SUPABASE_SERVICE_ROLE_KEY") {
                (key, CredentialTier::ServiceRole)
            } else if let Some(key) = get("VITE_SUPABASE_ANON_KEY") {
                (key, CredentialTier::Anon)
            } else {
                return Err(ConfigError::MissingEnvVar("REMOTE_KEY".to_string()));
            };

            Backend::Rest {
                base_url: remote_url.trim_end_matches('/').to_string(),
                api_key,
                tier,
            }
        };

        let table = table_from_lookup(&lookup)?;

        let batch_size = usize::try_from(parse_num("BATCH_SIZE", 50)?).unwrap_or(usize::MAX);
        if batch_size == 0 {
            return Err(ConfigError::InvalidEnvVar {
                var: "BATCH_SIZE".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            backend,
            table,
            csv_path: get("CSV_PATH")
                .unwrap_or_else(|| DEFAULT_CSV_PATH.to_string())
                .into(),
            batch_size,
            inter_batch_delay: Duration::from_millis(parse_num("INTER_BATCH_DELAY_MS", 1000)?),
            toggle_rls: parse_flag("TOGGLE_RLS")?,
            clear_before_import: parse_flag("CLEAR_BEFORE_IMPORT")?,
            allow_existing_rows: parse_flag("ALLOW_EXISTING_ROWS")?,
            request_timeout: Duration::from_secs(parse_num("REQUEST_TIMEOUT_SECS", 30)?),
            sample_size: usize::try_from(parse_num("SAMPLE_SIZE", 3)?).unwrap_or(usize::MAX),
        })
    }
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Target table alone, for commands that never connect
pub fn table_from_env() -> Result<String, ConfigError> {
    dotenvy::dotenv().ok();
    table_from_lookup(|key| std::env::var(key).ok())
}

/// `REMOTE_TABLE`, `leads` when unset
pub fn table_from_lookup<F>(lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let table = lookup("REMOTE_TABLE")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "leads".to_string());
    if !is_valid_table_name(&table) {
        return Err(ConfigError::InvalidEnvVar {
            var: "REMOTE_TABLE".to_string(),
            reason: format!("'{table}' is not a plain SQL identifier"),
        });
    }
    Ok(table)
}

/// `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[
            ("REMOTE_URL", "https://example.supabase.co/"),
            ("REMOTE_KEY", "secret"),
        ])
        .unwrap();

        assert_eq!(
            config.backend,
            Backend::Rest {
                base_url: "https://example.supabase.co".to_string(),
                api_key: "secret".to_string(),
                tier: CredentialTier::Unknown,
            }
        );
        assert_eq!(config.table, "leads");
        assert_eq!(config.csv_path, PathBuf::from(DEFAULT_CSV_PATH));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.inter_batch_delay, Duration::from_millis(1000));
        assert!(!config.toggle_rls);
        assert!(!config.clear_before_import);
        assert!(!config.allow_existing_rows);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.sample_size, 3);
    }

    #[test]
    fn test_missing_url_is_fatal() {
        let err = config_from(&[("REMOTE_KEY", "secret")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(var) if var == "REMOTE_URL"));
    }

    #[test]
    fn test_missing_key_is_fatal_for_rest() {
        let err = config_from(&[("REMOTE_URL", "https://example.supabase.co")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(var) if var == "REMOTE_KEY"));
    }

    #[test]
    fn test_postgres_url_needs_no_key() {
        let config = config_from(&[("REMOTE_URL", "postgres://u:p@localhost/db")]).unwrap();
        assert_eq!(
            config.backend,
            Backend::Postgres {
                database_url: "postgres://u:p@localhost/db".to_string()
            }
        );
    }

    #[test]
    fn test_service_role_alias_preferred_over_anon() {
        let config = config_from(&[
            ("VITE_SUPABASE_URL", "https://example.supabase.co"),
            ("VITE_SUPABASE_ANON_KEY", "anon-key"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service-key"),
        ])
        .unwrap();

        match config.backend {
            Backend::Rest { api_key, tier, .. } => {
                assert_eq!(api_key, "service-key");
                assert_eq!(tier, CredentialTier::ServiceRole);
            }
            other => panic!("expected REST backend, got {other:?}"),
        }
    }

    #[test]
    fn test_anon_alias() {
        let config = config_from(&[
            ("VITE_SUPABASE_URL", "https://example.supabase.co"),
            ("VITE_SUPABASE_ANON_KEY", "anon-key"),
        ])
        .unwrap();
        assert_eq!(config.backend.tier(), CredentialTier::Anon);
    }

    #[test]
    fn test_declared_key_role() {
        let config = config_from(&[
            ("REMOTE_URL", "https://example.supabase.co"),
            ("REMOTE_KEY", "k"),
            ("REMOTE_KEY_ROLE", "service_role"),
        ])
        .unwrap();
        assert_eq!(config.backend.tier(), CredentialTier::ServiceRole);

        let err = config_from(&[
            ("REMOTE_URL", "https://example.supabase.co"),
            ("REMOTE_KEY", "k"),
            ("REMOTE_KEY_ROLE", "admin"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { var, .. } if var == "REMOTE_KEY_ROLE"));
    }

    #[test]
    fn test_overrides_and_flags() {
        let config = config_from(&[
            ("REMOTE_URL", "https://example.supabase.co"),
            ("REMOTE_KEY", "k"),
            ("BATCH_SIZE", "10"),
            ("INTER_BATCH_DELAY_MS", "100"),
            ("TOGGLE_RLS", "yes"),
            ("CLEAR_BEFORE_IMPORT", "TRUE"),
            ("ALLOW_EXISTING_ROWS", "on"),
            ("CSV_PATH", "data/leads.csv"),
            ("REMOTE_TABLE", "public.leads"),
        ])
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.inter_batch_delay, Duration::from_millis(100));
        assert!(config.toggle_rls);
        assert!(config.clear_before_import);
        assert!(config.allow_existing_rows);
        assert_eq!(config.csv_path, PathBuf::from("data/leads.csv"));
        assert_eq!(config.table, "public.leads");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = [
            ("REMOTE_URL", "https://example.supabase.co"),
            ("REMOTE_KEY", "k"),
        ];

        for (var, value) in [
            ("BATCH_SIZE", "0"),
            ("BATCH_SIZE", "fifty"),
            ("INTER_BATCH_DELAY_MS", "-5"),
            ("TOGGLE_RLS", "maybe"),
            ("REMOTE_TABLE", "leads; drop table leads"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((var, value));
            let err = config_from(&pairs).unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidEnvVar { var: v, .. } if v == var),
                "{var}={value} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("leads"));
        assert!(is_valid_table_name("public.leads"));
        assert!(is_valid_table_name("_staging2"));
        assert!(!is_valid_table_name("2leads"));
        assert!(!is_valid_table_name("a.b.c"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("leads\""));
    }

    #[test]
    fn test_table_without_credentials() {
        let table = |value: Option<&str>| table_from_lookup(|_| value.map(str::to_string));

        assert_eq!(table(None).unwrap(), "leads");
        assert_eq!(table(Some("  ")).unwrap(), "leads");
        assert_eq!(table(Some("crm.leads")).unwrap(), "crm.leads");
        assert!(matches!(
            table(Some("leads; drop table leads")),
            Err(ConfigError::InvalidEnvVar { var, .. }) if var == "REMOTE_TABLE"
        ));
    }
}
