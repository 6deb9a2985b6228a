//! Runtime configuration, with environment overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Project that receives recycled codebooks.
pub const DEFAULT_LITTER_PROJECT_ID: i64 = 1;

/// Language used for display labels when the caller does not pick one.
pub const DEFAULT_LANGUAGE_ID: i64 = 1;

pub const DEFAULT_DATABASE_PATH: &str = "~/.codebook/codebook.db";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodebookConfig {
    pub litter_project_id: i64,
    pub database_path: PathBuf,
    pub default_language_id: i64,
}

impl Default for CodebookConfig {
    fn default() -> Self {
        Self {
            litter_project_id: DEFAULT_LITTER_PROJECT_ID,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            default_language_id: DEFAULT_LANGUAGE_ID,
        }
    }
}

impl CodebookConfig {
    /// Build a config from the defaults, overridden by `CODEBOOK_*`
    /// environment variables. Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(id) = env_i64("CODEBOOK_LITTER_PROJECT_ID") {
            config.litter_project_id = id;
        }
        if let Ok(path) = std::env::var("CODEBOOK_DB_PATH") {
            let path = path.trim();
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }
        if let Some(id) = env_i64("CODEBOOK_DEFAULT_LANGUAGE_ID") {
            config.default_language_id = id;
        }
        config
    }
}

fn env_i64(key: &str) -> Option<i64> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<i64>().ok(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CodebookConfig::default();
        assert_eq!(config.litter_project_id, 1);
        assert_eq!(config.default_language_id, 1);
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE_PATH));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: CodebookConfig =
            serde_json::from_str(r#"{"litter_project_id": 42}"#).unwrap();
        assert_eq!(config.litter_project_id, 42);
        assert_eq!(config.default_language_id, DEFAULT_LANGUAGE_ID);
    }

    #[test]
    fn env_override_ignores_garbage() {
        std::env::set_var("CODEBOOK_DEFAULT_LANGUAGE_ID", "not-a-number");
        let config = CodebookConfig::from_env();
        assert_eq!(config.default_language_id, DEFAULT_LANGUAGE_ID);
        std::env::remove_var("CODEBOOK_DEFAULT_LANGUAGE_ID");
    }
}
