use crate::modules::protocol::DEVICE_PORT;
use std::path::PathBuf;

pub const PORT_ENV: &str = "LAB_DEVICE_PORT";
pub const DATA_DIR_ENV: &str = "LAB_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    pub device_port: u16,
    pub data_dir: PathBuf,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            device_port: DEVICE_PORT,
            data_dir: default_data_dir(),
        }
    }
}

impl PanelConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(PORT_ENV) {
            match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => config.device_port = port,
                _ => tracing::warn!("ignoring {PORT_ENV}={raw:?}, using {}", config.device_port),
            }
        }

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            let dir = dir.trim();
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        config
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.device_port = port;
        }
        self
    }

    pub fn with_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.data_dir = dir;
        }
        self
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("remote-lab"))
        .unwrap_or_else(|| PathBuf::from(".remote-lab"))
}
