pub mod browser;
pub mod config;
pub mod engine;
pub mod error;
pub mod marketplaces;
pub mod product;
pub mod proxy;
pub mod queue;
pub mod relay;
pub mod session;
pub mod sink;
pub mod stealth;

pub use config::{EngineConfig, ProxySettings, RelaySettings};
pub use engine::{Engine, MarketplaceRateLimiter, RateLimitDecision};
pub use error::ScrapeError;
pub use marketplaces::{
    Marketplace, MarketplaceScraper, ScrapeTarget, ScraperRegistry,
};
pub use product::{Availability, ScrapedProduct, SellerType};
pub use proxy::{ProxyCandidate, ProxyRotator};
pub use queue::{FailedJob, Job, JobQueue, RetryOutcome, RetryPolicy, ordinal_for};
pub use relay::RelayClient;
pub use session::SessionPool;
pub use sink::{PriceHistorySink, ProductSink};
pub use stealth::Fingerprint;
