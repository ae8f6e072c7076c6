//! Typed access to opaque node and handler options.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;

/// Calculator-specific options of one node, kept as a TOML table until a
/// calculator asks for a typed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOptions {
    table: toml::Table,
}

impl NodeOptions {
    pub fn new(table: toml::Table) -> Self {
        Self { table }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<&toml::Value> {
        self.table.get(key)
    }

    /// Deserialize `key` as `T`. Missing keys give `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(value) => value
                .clone()
                .try_into::<T>()
                .map(Some)
                .map_err(|e| Error::Config(format!("option \"{}\": {}", key, e))),
        }
    }

    /// Deserialize `key` as `T`, falling back to `default` when missing.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Deserialize the whole table into an options struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.table.clone())
            .try_into::<T>()
            .map_err(|e| Error::Config(format!("invalid options: {}", e)))
    }

    pub fn table(&self) -> &toml::Table {
        &self.table
    }
}

impl From<toml::Table> for NodeOptions {
    fn from(table: toml::Table) -> Self {
        Self::new(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn options(text: &str) -> NodeOptions {
        NodeOptions::new(toml::from_str(text).unwrap())
    }

    #[test]
    fn test_typed_get() {
        let opts = options("ranges = [[0, 1], [1, 3]]\nelement_only = true");
        let ranges: Vec<(i64, i64)> = opts.get("ranges").unwrap().unwrap();
        assert_eq!(ranges, vec![(0, 1), (1, 3)]);
        assert_eq!(opts.get_or("element_only", false).unwrap(), true);
        assert_eq!(opts.get_or("missing", 7i64).unwrap(), 7);
    }

    #[test]
    fn test_type_error_names_key() {
        let opts = options("count = \"three\"");
        let err = opts.get::<i64>("count").unwrap_err();
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn test_parse_struct() {
        #[derive(Deserialize)]
        struct Limits {
            trigger_queue_size: usize,
            #[serde(default)]
            target_queue_size: Option<usize>,
        }
        let limits: Limits = options("trigger_queue_size = 4").parse().unwrap();
        assert_eq!(limits.trigger_queue_size, 4);
        assert_eq!(limits.target_queue_size, None);
    }
}
