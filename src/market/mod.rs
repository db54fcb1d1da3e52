// Market data: tick aggregation, price resolution and the unified service
pub mod aggregator;
pub mod resolver;
pub mod service;

pub use aggregator::CandleAggregator;
pub use resolver::{FeedHealth, PriceProvider, PriceResolver, ResolverConfig};
pub use service::MarketDataService;
