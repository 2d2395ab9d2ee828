//! Dogecoin network parameters.

use serde::{Deserialize, Serialize};

/// Protocol version advertised in our `version` message.
pub const PROTOCOL_VERSION: i32 = 70015;

/// Service bits advertised. Bit 0 (NODE_NETWORK) is set even though we serve
/// no blocks: several mainnet nodes drop relay-only peers that advertise 0.
pub const SERVICES: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Wire magic, written little-endian as the first four header bytes.
    pub fn magic(self) -> u32 {
        match self {
            Network::Mainnet => 0xC0C0_C0C0,
            Network::Testnet => 0xDCB7_C1FC,
        }
    }

    pub fn p2p_port(self) -> u16 {
        match self {
            Network::Mainnet => 22556,
            Network::Testnet => 44556,
        }
    }

    /// DNS seeds, tried in order.
    pub fn dns_seeds(self) -> &'static [&'static str] {
        match self {
            Network::Mainnet => &[
                "seed.multidoge.org",
                "seed2.multidoge.org",
                "seed.dogecoin.com",
                "seed.doger.dogecoin.com",
            ],
            Network::Testnet => &[
                "testseed.jrn.me.uk",
                "testnet-seed.multidoge.org",
                "testnet-seed.dogecoin.com",
                "testnet.dnsseed.dogecoin.com",
            ],
        }
    }

    /// Version byte for P2PKH addresses ("D…" on mainnet).
    pub fn p2pkh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x1E,
            Network::Testnet => 0x71,
        }
    }

    /// Version byte for P2SH addresses ("9…"/"A…" on mainnet).
    pub fn p2sh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x16,
            Network::Testnet => 0xC4,
        }
    }

    /// Version byte for WIF-encoded private keys.
    pub fn wif_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x9E,
            Network::Testnet => 0xF1,
        }
    }

    /// BIP-32 extended public key version word.
    pub fn bip32_pub(self) -> u32 {
        match self {
            Network::Mainnet => 0x02FA_CAFD,
            Network::Testnet => 0x0432_A9A8,
        }
    }

    /// BIP-32 extended private key version word.
    pub fn bip32_priv(self) -> u32 {
        match self {
            Network::Mainnet => 0x02FA_C398,
            Network::Testnet => 0x0432_A243,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

/// User agent string sent during the handshake.
pub fn user_agent() -> String {
    format!("/OpenClawDoge:{}/", env!("CARGO_PKG_VERSION"))
}
