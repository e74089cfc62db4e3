use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Defaults applied when a builder session expands joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Primary identity field of joined collections.
    pub primary_key: String,
    /// Default foreign key is `<collection><suffix>`.
    pub foreign_key_suffix: String,
    /// Name of the `let` variable bound by correlated joins.
    pub let_variable: String,
    /// Inner-pipeline row cap; zero or negative means unbounded.
    pub lookup_limit: i64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            primary_key: "_id".to_string(),
            foreign_key_suffix: "_id".to_string(),
            let_variable: "foreign_key".to_string(),
            lookup_limit: 1,
        }
    }
}

impl BuilderConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read overrides from `OXIAGG_*` env vars; unset ones keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(v) = env::var("OXIAGG_PRIMARY_KEY") {
            config.primary_key = v;
        }
        if let Ok(v) = env::var("OXIAGG_FOREIGN_KEY_SUFFIX") {
            config.foreign_key_suffix = v;
        }
        if let Ok(v) = env::var("OXIAGG_LET_VARIABLE") {
            config.let_variable = v;
        }
        if let Ok(v) = env::var("OXIAGG_LOOKUP_LIMIT") {
            config.lookup_limit = v.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("OXIAGG_LOOKUP_LIMIT must be an integer, got '{v}'"))
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_json_fields_keep_defaults() {
        let config = BuilderConfig::from_json(r#"{"lookup_limit": 0}"#).unwrap();
        assert_eq!(config.lookup_limit, 0);
        assert_eq!(config.primary_key, "_id");
        assert_eq!(config.let_variable, "foreign_key");
    }

    // One test owns every OXIAGG_* variable so parallel tests never race on them.
    #[test]
    fn from_env_defaults_overrides_and_malformed_limit() {
        const VARS: [&str; 4] = [
            "OXIAGG_PRIMARY_KEY",
            "OXIAGG_FOREIGN_KEY_SUFFIX",
            "OXIAGG_LET_VARIABLE",
            "OXIAGG_LOOKUP_LIMIT",
        ];
        // SAFETY: no other test reads or writes these variables.
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
        assert_eq!(BuilderConfig::from_env().unwrap(), BuilderConfig::default());

        unsafe {
            env::set_var("OXIAGG_LET_VARIABLE", "fk");
            env::set_var("OXIAGG_LOOKUP_LIMIT", " 0 ");
        }
        let config = BuilderConfig::from_env().unwrap();
        assert_eq!(config.let_variable, "fk");
        assert_eq!(config.lookup_limit, 0);
        assert_eq!(config.primary_key, "_id");

        unsafe {
            env::set_var("OXIAGG_LOOKUP_LIMIT", "many");
        }
        let err = BuilderConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            BuilderConfig::from_json("{"),
            Err(Error::Json(_))
        ));
    }
}
