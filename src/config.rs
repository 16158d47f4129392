use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use parking_lot::RwLock;

use crate::igmp::query::{self, FLAG_SUPPRESS_ROUTER_PROCESSING, QRV_MASK};
use crate::igmp::IgmpCode;
use crate::igmp::ALL_IGMPV3_ROUTERS;
use crate::interface::LocalInterface;

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Arc<Option<PathBuf>>,
    config: Arc<RwLock<Option<Config>>>,
    broadcast: tokio::sync::broadcast::Sender<()>,
}

impl ConfigManager {
    /// Without a path the built-in defaults are used.
    pub fn new<P: AsRef<Path>>(path: Option<P>) -> Self {
        let path = path.map(|path| path.as_ref().to_path_buf());
        Self {
            config_path: Arc::new(path),
            config: Arc::new(RwLock::new(None)),
            broadcast: tokio::sync::broadcast::channel(1).0,
        }
    }

    fn notify_change(&self) {
        let _ = self.broadcast.send(());
    }

    pub async fn load(&self) -> Result<(), std::io::Error> {
        tokio::task::block_in_place(|| {
            let config = match self.config_path.as_ref() {
                Some(path) => Config::from_file(path)?,
                None => Config::default(),
            };
            let result = Some(config);
            let orig = std::mem::replace(&mut *self.config.write(), result.clone());
            if orig != result {
                self.notify_change();
            }
            Ok(())
        })
    }

    pub fn get(&self) -> Option<Config> {
        self.config.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.config.read().is_some()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.broadcast.subscribe()
    }
}

const MIN_QUERY_INTERVAL_SECS: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(file)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, std::io::Error> {
        let config: Config = toml::from_str(content).map_err(std::io::Error::other)?;
        Ok(config)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// interface name, e.g. "eth0"
    pub interface: Option<String>,

    /// local address of the interface
    pub interface_address: Option<Ipv4Addr>,
}

impl GlobalConfig {
    pub fn local_interface(&self) -> Result<LocalInterface, std::io::Error> {
        let mut interface = match &self.interface {
            Some(name) => LocalInterface::by_name(name)?,
            None => LocalInterface::ANY,
        };
        if let Some(address) = self.interface_address {
            interface.address = address;
        }
        Ok(interface)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct QueryConfig {
    pub max_response_time_ms: u32,

    /// querier's robustness variable; values above 7 are sent as 0
    pub robustness: u8,

    pub suppress_router_processing: bool,

    pub query_interval_secs: u32,

    pub destination: Ipv4Addr,

    /// send the general query again every query interval
    pub repeat: bool,

    pub verify_checksum: bool,

    /// deliver our own queries back to the local receive loop
    pub loopback: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_response_time_ms: 10_000,
            robustness: 2,
            suppress_router_processing: false,
            query_interval_secs: 125,
            destination: ALL_IGMPV3_ROUTERS,
            repeat: false,
            verify_checksum: true,
            loopback: true,
        }
    }
}

impl QueryConfig {
    pub fn max_response_code(&self) -> IgmpCode {
        IgmpCode::from_value(self.max_response_time_ms / 100)
    }

    pub fn query_interval_code(&self) -> IgmpCode {
        IgmpCode::from_value(self.query_interval_secs)
    }

    pub fn flags(&self) -> u8 {
        let qrv = if self.robustness > QRV_MASK { 0 } else { self.robustness };
        let s = if self.suppress_router_processing { FLAG_SUPPRESS_ROUTER_PROCESSING } else { 0 };
        s | qrv
    }

    /// Interval actually announced in the query, after QQIC rounding. Never
    /// shorter than one second, even when the configured interval is 0.
    pub fn query_interval(&self) -> Duration {
        Duration::from_secs(self.query_interval_code().value().max(MIN_QUERY_INTERVAL_SECS) as u64)
    }

    pub fn general_query(&self) -> Vec<u8> {
        query::build_general_query(self.max_response_code().raw(), self.flags(), self.query_interval_code().raw())
    }
}
