//! State configuration, grounded in how the node picks its database
//! directory per network.

use std::path::PathBuf;

use bitpeg_chain::Network;
use serde::{Deserialize, Serialize};

/// Configuration for the peg state service.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The root directory for the state databases.
    pub cache_dir: PathBuf,

    /// Whether to use an ephemeral (temporary, deleted on drop) database.
    /// Used by tests.
    pub ephemeral: bool,
}

impl Config {
    pub(crate) fn sled_config(&self, network: Network) -> sled::Config {
        let net_dir = match network {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        let path = self.cache_dir.join(net_dir).join("peg");

        let config = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024);
        if self.ephemeral {
            config.temporary(true)
        } else {
            config
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap().join("cache"))
            .join("bitpeg");

        Self {
            cache_dir,
            ephemeral: false,
        }
    }
}
