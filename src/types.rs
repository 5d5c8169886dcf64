// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// The closed set of crypto assets traded on Up/Down markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Bitcoin,
    Ethereum,
    Solana,
    Xrp,
}

impl Asset {
    /// All tracked assets, in scan order.
    pub const ALL: [Asset; 4] = [Asset::Bitcoin, Asset::Ethereum, Asset::Solana, Asset::Xrp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ethereum",
            Self::Solana => "solana",
            Self::Xrp => "xrp",
        }
    }

    /// Map an exchange stream symbol (e.g. "btcusdt") to an asset.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_lowercase().as_str() {
            "btcusdt" => Some(Self::Bitcoin),
            "ethusdt" => Some(Self::Ethereum),
            "solusdt" => Some(Self::Solana),
            "xrpusdt" => Some(Self::Xrp),
            _ => None,
        }
    }

    /// The exchange stream symbol for this asset.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Bitcoin => "btcusdt",
            Self::Ethereum => "ethusdt",
            Self::Solana => "solusdt",
            Self::Xrp => "xrpusdt",
        }
    }

    /// Parse the lowercase asset name used in market metadata.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bitcoin" | "btc" => Some(Self::Bitcoin),
            "ethereum" | "eth" => Some(Self::Ethereum),
            "solana" | "sol" => Some(Self::Solana),
            "xrp" => Some(Self::Xrp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market window timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            "4h" => Some(Self::H4),
            _ => None,
        }
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> i64 {
        match self {
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
        }
    }

    /// How long a dry-run order may sit unfilled before it is expired.
    pub fn dry_run_expiry_secs(&self) -> i64 {
        self.window_secs()
    }

    /// How long past market end we keep polling before marking the outcome
    /// unknown. Longer markets resolve slower on-chain.
    pub fn resolution_timeout_secs(&self) -> i64 {
        match self {
            Self::M5 => 600,
            Self::M15 => 900,
            Self::H1 => 7_200,
            Self::H4 => 18_000,
        }
    }

    /// Probability clamp bounds for the ensemble output.
    pub fn prob_clamp(&self) -> (f64, f64) {
        match self {
            Self::M5 => (0.30, 0.70),
            Self::M15 => (0.32, 0.68),
            Self::H1 => (0.35, 0.65),
            Self::H4 => (0.35, 0.65),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Predicted / resolved market direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// +1.0 for up, -1.0 for down. Used by the weighted ensemble.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Up => 1.0,
            Self::Down => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "up" | "yes" => Some(Self::Up),
            "down" | "no" => Some(Self::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order side on the CLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Time-in-force for CLOB orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good till cancelled.
    Gtc,
    /// Fill or kill — entire order fills immediately or cancels.
    Fok,
    /// Immediate or cancel.
    Ioc,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gtc => write!(f, "GTC"),
            Self::Fok => write!(f, "FOK"),
            Self::Ioc => write!(f, "IOC"),
        }
    }
}

/// Which strategy opened a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Directional,
    Straddle,
    Snipe,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Directional
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directional => write!(f, "directional"),
            Self::Straddle => write!(f, "straddle"),
            Self::Snipe => write!(f, "snipe"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_symbol_roundtrip() {
        for asset in Asset::ALL {
            assert_eq!(Asset::from_symbol(asset.symbol()), Some(asset));
            assert_eq!(Asset::from_name(asset.as_str()), Some(asset));
        }
        assert_eq!(Asset::from_symbol("dogeusdt"), None);
    }

    #[test]
    fn timeframe_parsing() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::from_str_opt(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::from_str_opt("weekly"), None);
    }

    #[test]
    fn timeframe_clamps_are_ordered() {
        for tf in Timeframe::ALL {
            let (lo, hi) = tf.prob_clamp();
            assert!(lo < 0.5 && 0.5 < hi);
            assert!((lo + hi - 1.0).abs() < 1e-9, "clamp must be symmetric around 0.5");
        }
    }

    #[test]
    fn direction_sign_and_opposite() {
        assert_eq!(Direction::Up.sign(), 1.0);
        assert_eq!(Direction::Down.sign(), -1.0);
        assert_eq!(Direction::Up.opposite(), Direction::Down);
        assert_eq!(Direction::from_str_opt("YES"), Some(Direction::Up));
        assert_eq!(Direction::from_str_opt("no"), Some(Direction::Down));
        assert_eq!(Direction::from_str_opt("maybe"), None);
    }

    #[test]
    fn serde_lowercase_names() {
        let j = serde_json::to_string(&Direction::Up).unwrap();
        assert_eq!(j, "\"up\"");
        let j = serde_json::to_string(&Asset::Bitcoin).unwrap();
        assert_eq!(j, "\"bitcoin\"");
        let j = serde_json::to_string(&Timeframe::M5).unwrap();
        assert_eq!(j, "\"5m\"");
    }
}
