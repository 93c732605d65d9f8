use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use jazz_services::{RelayError, RelayOptions, Transport, RELAY_PROGRAM, RELAY_VERSION};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// MIDI device node
    pub device: PathBuf,
    /// Address to accept the client on
    pub listen: String,
    /// Serve the socket on stdin instead of listening (inetd)
    pub inherit_stdin: bool,
    pub unregister_stale: bool,
    pub program: u32,
    pub version: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/midi"),
            listen: "0.0.0.0:7311".to_string(),
            inherit_stdin: false,
            unregister_stale: true,
            program: RELAY_PROGRAM,
            version: RELAY_VERSION,
        }
    }
}

impl RelayConfig {
    pub fn to_options(&self) -> Result<RelayOptions, RelayError> {
        let transport = if self.inherit_stdin {
            Transport::Inherited
        } else {
            let addr: SocketAddr = self
                .listen
                .parse()
                .map_err(|e| RelayError::Config(format!("bad listen address {:?}: {e}", self.listen)))?;
            Transport::Listen(addr)
        };
        let mut options = RelayOptions::new(&self.device, transport);
        options.program = self.program;
        options.version = self.version;
        options.unregister_stale = self.unregister_stale;
        Ok(options)
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jazz")
        .join("relayd.toml")
}

/// Read the config file; a missing or unreadable file yields defaults
pub fn load_config(path: &Path) -> RelayConfig {
    let Ok(text) = std::fs::read_to_string(path) else {
        debug!(path = %path.display(), "No config file, using defaults");
        return RelayConfig::default();
    };
    match toml::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), "Ignoring invalid config: {}", e);
            RelayConfig::default()
        }
    }
}

pub fn save_config(path: &Path, config: &RelayConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("jazz-relayd-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: RelayConfig = toml::from_str("device = \"/dev/snd/midiC1D0\"\n").unwrap();
        assert_eq!(config.device, PathBuf::from("/dev/snd/midiC1D0"));
        assert_eq!(config.program, RELAY_PROGRAM);
        assert!(config.unregister_stale);
    }

    #[test]
    fn test_missing_and_invalid_files() {
        assert_eq!(load_config(&temp_path("missing.toml")), RelayConfig::default());
        let path = temp_path("invalid.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "listen = [").unwrap();
        assert_eq!(load_config(&path), RelayConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("saved.toml");
        let config = RelayConfig {
            inherit_stdin: true,
            version: 2,
            ..RelayConfig::default()
        };
        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn test_to_options() {
        let options = RelayConfig::default().to_options().unwrap();
        assert_eq!(options.transport, Transport::Listen("0.0.0.0:7311".parse().unwrap()));
        let bad = RelayConfig {
            listen: "nowhere".into(),
            ..RelayConfig::default()
        };
        assert!(bad.to_options().is_err());
        let inetd = RelayConfig {
            listen: "nowhere".into(),
            inherit_stdin: true,
            ..RelayConfig::default()
        };
        assert_eq!(inetd.to_options().unwrap().transport, Transport::Inherited);
    }
}
