// =============================================================================
// Market data — price cache and the three external feeds
// =============================================================================

pub mod market_feed;
pub mod oracle_feed;
pub mod price_cache;
pub mod spot_feed;

pub use market_feed::{MarketFeed, TokenBook};
pub use oracle_feed::OraclePrices;
pub use price_cache::{Candle, PriceCache};
pub use spot_feed::SpotDepthMap;
