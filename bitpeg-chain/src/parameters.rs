//! Consensus parameters for the peg system.
//!
//! All chain-dependent knobs the peg engine consults live in [`PegParams`];
//! tests and the exchange layer construct their own instead of reading
//! process-wide state.

use serde::{Deserialize, Serialize};

/// Highest value the peg supply index can take.
pub const PEG_MAX_SUPPLY_INDEX: usize = 1198;

/// Dust value carried by each freeze notary output a withdrawal emits.
pub const PEG_MAKETX_FREEZE_VALUE: i64 = 5_000;

/// An enum describing the possible network choices.
///
/// Regtest is reachable only through explicit configuration; there is no
/// command-line fallback that silently selects it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The test network.
    Testnet,
    /// The regression-test network.
    Regtest,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

/// The peg parameter block of a network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegParams {
    pub network: Network,

    /// Height at which the peg system activates; below it all supply indices
    /// are zero and no votes are counted.
    pub peg_start_height: u32,

    /// Block span between supply-index updates before any interval switch.
    pub peg_interval: u32,

    /// Height at which the testnet interval switches to
    /// [`PegParams::peg_interval_after_switch`]; `None` disables the switch.
    pub peg_interval_switch_height: Option<u32>,
    pub peg_interval_after_switch: u32,

    /// The designated vote payee addresses.
    pub peg_inflate_addr: String,
    pub peg_deflate_addr: String,
    pub peg_nochange_addr: String,

    /// Seconds a reserve freeze (`**F**`) locks its output.
    pub peg_frozen_time: u32,
    /// Seconds a voluntary liquid freeze (`**V**`) locks its output.
    pub peg_v_frozen_time: u32,

    /// The unspendable address burns are paid to.
    pub burn_address: String,

    /// Below this height the legacy staking computation applies.
    pub legacy_stake_fork_height: u32,
}

impl PegParams {
    pub fn mainnet() -> Self {
        PegParams {
            network: Network::Mainnet,
            peg_start_height: 1_000_000_000,
            peg_interval: 200,
            peg_interval_switch_height: None,
            peg_interval_after_switch: 200,
            peg_inflate_addr: "bNyZrPLQAMPvYedrVLDcBSd8fbLdNgnRPz".to_string(),
            peg_deflate_addr: "bNyZrP2SbrV6v5HqeBoXZXZDE2e4fe6STo".to_string(),
            peg_nochange_addr: "bNyZrPeFFNP6GFJZCkE82DDN7JC4K5Vrkk".to_string(),
            peg_frozen_time: 3600 * 24 * 30,
            peg_v_frozen_time: 3600 * 24 * 30 * 4,
            burn_address: "bJnV8J5v74MGctMyVSVPfGu1mGQ9nMTiB3".to_string(),
            legacy_stake_fork_height: 0,
        }
    }

    pub fn testnet() -> Self {
        PegParams {
            network: Network::Testnet,
            peg_start_height: 1_000_000_000,
            peg_interval: 200,
            // at block 10K the testnet switches to 20 block intervals
            peg_interval_switch_height: Some(10_000),
            peg_interval_after_switch: 20,
            peg_inflate_addr: "n29zWn5WYvU6WRLBMvK49i2eoFRkxMMCdV".to_string(),
            peg_deflate_addr: "mzbVXs9bQtS7i82gXrKEGEhWUvJRStNtRh".to_string(),
            peg_nochange_addr: "mzCbx5ioAgyndeiMeDAPjFgp3xjUaiYvma".to_string(),
            peg_frozen_time: 3600 * 24,
            peg_v_frozen_time: 3600 * 24 * 4,
            burn_address: "bJnV8J5v74MGctMyVSVPfGu1mGQ9nMTiB3".to_string(),
            legacy_stake_fork_height: 200_000,
        }
    }

    pub fn regtest() -> Self {
        let mut params = PegParams::testnet();
        params.network = Network::Regtest;
        params
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => PegParams::mainnet(),
            Network::Testnet => PegParams::testnet(),
            Network::Regtest => PegParams::regtest(),
        }
    }

    /// The peg interval in force at `height`.
    pub fn peg_interval(&self, height: u32) -> u32 {
        match self.peg_interval_switch_height {
            Some(switch) if height >= switch => self.peg_interval_after_switch,
            _ => self.peg_interval,
        }
    }

    /// The peg cycle `height` belongs to.
    pub fn peg_cycle(&self, height: u32) -> u32 {
        height / self.peg_interval(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testnet_interval_switches_at_10k() {
        let params = PegParams::testnet();
        assert_eq!(params.peg_interval(9_999), 200);
        assert_eq!(params.peg_interval(10_000), 20);
        assert_eq!(params.peg_interval(1_000_000), 20);
    }

    #[test]
    fn mainnet_interval_is_constant() {
        let params = PegParams::mainnet();
        assert_eq!(params.peg_interval(0), 200);
        assert_eq!(params.peg_interval(5_000_000), 200);
    }
}
