//! JSON configuration for zones, transfer batches, and snapshot history
//! locations.
//!
//! All configuration lives as JSON files in a `system/` directory next to
//! the data. The transfer list and zone definitions are required where
//! used; the monitoring overrides are optional and fall back to defaults.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Zone definition file names inside the system directory.
pub const ZONE_S_CONFIG: &str = "zone_s_config.json";
pub const ZONE_W_CONFIG: &str = "zone_w_config.json";
/// Transfer batch definition inside the system directory.
pub const TRANSFERS_CONFIG: &str = "zone_transfers_config.json";
/// Optional history-directory overrides inside the system directory.
pub const MONITORING_CONFIG: &str = "monitoring_config.json";

/// A storage zone: the set of directory trees it comprises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub directories: Vec<PathBuf>,
}

/// One source-to-destination pair in a transfer batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSpec {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// The transfer batch consumed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBatch {
    pub transfers: Vec<TransferSpec>,
}

/// Optional overrides for where snapshot history is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Override for the checksum snapshot history directory
    #[serde(default)]
    pub checksum_history_dir: Option<PathBuf>,
    /// Override for the directory-structure snapshot history directory
    #[serde(default)]
    pub structure_history_dir: Option<PathBuf>,
}

/// Load a zone definition from `<system_dir>/<file_name>`.
pub fn load_zone(system_dir: &Path, file_name: &str) -> Result<ZoneConfig, EngineError> {
    read_json(&system_dir.join(file_name))
}

/// Load the transfer batch from the system directory. A missing or
/// malformed file is an error; an empty `transfers` list is valid.
pub fn load_transfers(system_dir: &Path) -> Result<Vec<TransferSpec>, EngineError> {
    let batch: TransferBatch = read_json(&system_dir.join(TRANSFERS_CONFIG))?;
    debug!("loaded {} transfer(s)", batch.transfers.len());
    Ok(batch.transfers)
}

/// Load the monitoring overrides, falling back to defaults when the file
/// does not exist.
pub fn load_monitoring(system_dir: &Path) -> Result<MonitoringConfig, EngineError> {
    let path = system_dir.join(MONITORING_CONFIG);
    if !path.exists() {
        debug!("no {}, using default history locations", MONITORING_CONFIG);
        return Ok(MonitoringConfig::default());
    }
    read_json(&path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    if !path.exists() {
        return Err(EngineError::PathNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| EngineError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_transfers_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let batch = r#"{
            "transfers": [
                {"source": "/zone_s/a", "destination": "/zone_w/a"},
                {"source": "/zone_s/b", "destination": "/zone_w/b"}
            ]
        }"#;
        fs::write(temp_dir.path().join(TRANSFERS_CONFIG), batch).unwrap();

        let transfers = load_transfers(temp_dir.path()).expect("load failed");
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].source, PathBuf::from("/zone_s/a"));
        assert_eq!(transfers[1].destination, PathBuf::from("/zone_w/b"));
    }

    #[test]
    fn test_missing_transfers_file_is_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        assert!(matches!(
            load_transfers(temp_dir.path()),
            Err(EngineError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_json_is_reported_with_reason() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join(TRANSFERS_CONFIG), "{not json").unwrap();
        assert!(matches!(
            load_transfers(temp_dir.path()),
            Err(EngineError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_zone_directories() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join(ZONE_S_CONFIG),
            r#"{"directories": ["/zone_s/projects", "/zone_s/archive"]}"#,
        )
        .unwrap();

        let zone = load_zone(temp_dir.path(), ZONE_S_CONFIG).expect("load failed");
        assert_eq!(zone.directories.len(), 2);
    }

    #[test]
    fn test_missing_monitoring_config_defaults() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = load_monitoring(temp_dir.path()).expect("load failed");
        assert!(config.checksum_history_dir.is_none());
        assert!(config.structure_history_dir.is_none());
    }

    #[test]
    fn test_monitoring_overrides_parsed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join(MONITORING_CONFIG),
            r#"{"checksum_history_dir": "/var/history/checksums"}"#,
        )
        .unwrap();

        let config = load_monitoring(temp_dir.path()).expect("load failed");
        assert_eq!(
            config.checksum_history_dir,
            Some(PathBuf::from("/var/history/checksums"))
        );
        assert!(config.structure_history_dir.is_none());
    }
}
