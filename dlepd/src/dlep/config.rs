use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use dlep_packet::DlepMac;

/// Session-core configuration.  Loaded from a YAML file; every key has a
/// default so a partial file (or none at all) works.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DlepConfig {
    /// Run as the modem (true) or the router (false).
    pub is_modem: bool,

    /// Free-form peer type string advertised at session initialization.
    pub peer_type: String,

    /// Interval between heartbeats we send, in catalogue units
    /// (milliseconds with the default catalogue).  0 disables heartbeats.
    pub heartbeat_interval: u32,

    /// Number of missed peer heartbeats after which the session is declared
    /// dead.
    pub missed_heartbeat_threshold: u32,

    /// Seconds between retransmissions of an unacknowledged request.
    pub retry_interval_seconds: u64,

    /// Retransmissions attempted beyond the original send.
    pub max_retries: u32,

    /// TCP port of the session listener.
    pub session_port: u16,

    /// Address ("host:port") to actively connect to, if any.  Typically set
    /// on the router, pointing at the modem.
    pub connect: Option<String>,

    /// Extension ids we are willing to use.
    pub supported_extensions: Vec<u16>,

    /// Destinations we answer with Not Interested when a peer brings them
    /// up, as "aa:bb:cc:dd:ee:ff" strings.
    pub uninterested_destinations: Vec<String>,

    /// Accepted for config-file compatibility; discovery runs outside the
    /// session core.
    pub discovery_enable: bool,

    /// Accepted for config-file compatibility; destination advertisement
    /// runs outside the session core.
    pub destination_advertise_enable: bool,
}

impl Default for DlepConfig {
    fn default() -> Self {
        Self {
            is_modem: false,
            peer_type: String::new(),
            heartbeat_interval: 60000,
            missed_heartbeat_threshold: 2,
            retry_interval_seconds: 1,
            max_retries: 3,
            session_port: 854,
            connect: None,
            supported_extensions: Vec::new(),
            uninterested_destinations: Vec::new(),
            discovery_enable: false,
            destination_advertise_enable: false,
        }
    }
}

impl DlepConfig {
    pub fn load(path: &Path) -> anyhow::Result<DlepConfig> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&text)?;
        Ok(config)
    }

    /// Parsed uninterested-destination set.  Malformed entries are skipped.
    pub fn uninterested(&self) -> BTreeSet<DlepMac> {
        self.uninterested_destinations
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}
