//! Configuration for the database.
//!
//! # Example
//!
//! ```
//! use summadb::SummaConfig;
//!
//! // Minimal config (in-memory store, defaults everywhere)
//! let config = SummaConfig::default();
//! assert_eq!(config.port, 5000);
//!
//! // On-disk store
//! let config = SummaConfig {
//!     db_path: Some("/tmp/summa.db".into()),
//!     port: 5984,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for a [`SummaDb`](crate::SummaDb) instance and its server.
///
/// All fields have sensible defaults. Without `db_path` the database lives
/// in memory and vanishes on exit.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaConfig {
    /// Path of the underlying store file. `None` means in-memory.
    #[serde(default)]
    pub db_path: Option<String>,

    /// HTTP listen port (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Fsync every write batch (default: true). Turning this off trades
    /// durability of the last few batches for write throughput.
    #[serde(default = "default_durable_writes")]
    pub durable_writes: bool,

    /// Length of generated document ids in `_bulk_docs` (default: 5)
    #[serde(default = "default_id_length")]
    pub id_length: usize,
}

fn default_port() -> u16 {
    5000
}
fn default_durable_writes() -> bool {
    true
}
fn default_id_length() -> usize {
    5
}

impl Default for SummaConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            port: default_port(),
            durable_writes: default_durable_writes(),
            id_length: default_id_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: SummaConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.db_path, None);
        assert_eq!(config.port, 5000);
        assert!(config.durable_writes);
        assert_eq!(config.id_length, 5);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let config: SummaConfig =
            serde_json::from_str(r#"{"db_path": "/tmp/x.db", "port": 5984}"#).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("/tmp/x.db"));
        assert_eq!(config.port, 5984);
    }
}
