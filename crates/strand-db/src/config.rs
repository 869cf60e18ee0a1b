//! Connection settings.
//!
//! [`DbConfig`] can be built in code or read from the environment:
//! - `STRAND_INSTANCE`: instance id this connection writes as (default: 0)
//! - `STRAND_VERIFY`: re-hash the head lineage on open (`1`/`true`/`yes`)

use strand_core::InstanceId;

use crate::error::DbError;

pub const ENV_INSTANCE: &str = "STRAND_INSTANCE";
pub const ENV_VERIFY: &str = "STRAND_VERIFY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbConfig {
    /// The instance new nodes and entity ids belong to.
    pub instance: InstanceId,
    /// Check stored bytes against their hashes along the head lineage.
    pub verify_on_open: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            instance: InstanceId::ROOT,
            verify_on_open: false,
        }
    }
}

impl DbConfig {
    pub fn for_instance(instance: InstanceId) -> Self {
        DbConfig {
            instance,
            ..Self::default()
        }
    }

    /// Reads the `STRAND_*` variables; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, DbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DbError> {
        let mut config = DbConfig::default();
        if let Some(raw) = lookup(ENV_INSTANCE) {
            let id = raw.trim().parse::<u32>().map_err(|_| DbError::Config {
                key: ENV_INSTANCE.into(),
                value: raw.clone(),
            })?;
            config.instance = InstanceId(id);
        }
        if let Some(raw) = lookup(ENV_VERIFY) {
            config.verify_on_open = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(DbError::Config {
                        key: ENV_VERIFY.into(),
                        value: raw,
                    })
                }
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = DbConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DbConfig::default());
    }

    #[test]
    fn reads_instance_and_verify() {
        let config =
            DbConfig::from_lookup(lookup(&[(ENV_INSTANCE, "42"), (ENV_VERIFY, "Yes")])).unwrap();
        assert_eq!(config.instance, InstanceId(42));
        assert!(config.verify_on_open);
    }

    #[test]
    fn rejects_garbage() {
        let err = DbConfig::from_lookup(lookup(&[(ENV_INSTANCE, "-1")])).unwrap_err();
        assert!(matches!(err, DbError::Config { key, .. } if key == ENV_INSTANCE));
        assert!(DbConfig::from_lookup(lookup(&[(ENV_VERIFY, "maybe")])).is_err());
    }
}
