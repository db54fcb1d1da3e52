use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{timeout, Duration};

use crate::error::{BotError, Result};
use crate::models::{PriceQuote, PriceSource};

/// One price source the resolver can query
///
/// Implementations live in `crate::api`; the resolver only sees this
/// capability surface, so fallback order is data, not control flow.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn source(&self) -> PriceSource;
    async fn fetch(&self) -> Result<PriceQuote>;
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_ttl_secs: u64,
    pub provider_timeout_secs: u64,
    /// Broad plausibility band for the asset; anything outside is garbage
    pub min_price_usd: f64,
    pub max_price_usd: f64,
    /// Tighter clamp applied to accepted oracle quotes
    pub oracle_min_usd: f64,
    pub oracle_max_usd: f64,
    /// Max relative divergence tolerated by `check_health`
    pub divergence_tolerance: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 10,
            provider_timeout_secs: 8,
            min_price_usd: 0.01,
            max_price_usd: 100_000.0,
            oracle_min_usd: 0.05,
            oracle_max_usd: 50_000.0,
            divergence_tolerance: 0.02,
        }
    }
}

/// Result of cross-validating two independent providers
#[derive(Debug, Clone)]
pub struct FeedHealth {
    pub healthy: bool,
    pub divergence: f64,
    pub primary: PriceSource,
    pub reference: PriceSource,
}

/// Produces a current price from ordered providers with caching, fallback
/// and plausibility bounding
///
/// Provider order is fixed at construction: the fast low-rate-limit source
/// first, broader aggregators next, the on-chain oracle as last resort.
pub struct PriceResolver {
    providers: Vec<Box<dyn PriceProvider>>,
    cache: RwLock<Option<PriceQuote>>,
    config: ResolverConfig,
}

impl PriceResolver {
    pub fn new(providers: Vec<Box<dyn PriceProvider>>, config: ResolverConfig) -> Self {
        Self {
            providers,
            cache: RwLock::new(None),
            config,
        }
    }

    /// Resolve a current price
    ///
    /// `force` bypasses the TTL check and always queries providers, but a
    /// stale cache still backstops total provider failure. Fails with
    /// `NoReasonablePrice` only when every provider is exhausted and no
    /// cached value exists.
    pub async fn get_price(&self, force: bool) -> Result<PriceQuote> {
        let now = Utc::now();

        if !force {
            if let Some(cached) = self.cached() {
                if cached.age_secs(now) < self.config.cache_ttl_secs as i64 {
                    return Ok(cached);
                }
            }
        }

        let per_call = Duration::from_secs(self.config.provider_timeout_secs);

        for provider in &self.providers {
            let source = provider.source();
            let outcome = match timeout(per_call, provider.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(BotError::Provider {
                    source,
                    reason: format!("timed out after {}s", self.config.provider_timeout_secs),
                }),
            };

            match outcome {
                Ok(mut quote) => {
                    if !self.plausible(quote.price) {
                        tracing::warn!(
                            source = %source,
                            price = quote.price,
                            "discarding implausible quote"
                        );
                        continue;
                    }

                    if quote.source == PriceSource::Oracle {
                        let clamped = quote
                            .price
                            .clamp(self.config.oracle_min_usd, self.config.oracle_max_usd);
                        if clamped != quote.price {
                            tracing::warn!(
                                raw = quote.price,
                                clamped,
                                "oracle quote clamped to configured band"
                            );
                            quote.price = clamped;
                        }
                    }

                    self.store(quote.clone());
                    return Ok(quote);
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "price provider failed");
                    // Stale-tolerant: an unforced call prefers the last good
                    // quote over walking the rest of the chain
                    if !force {
                        if let Some(cached) = self.cached() {
                            tracing::debug!(source = %cached.source, "serving stale cached quote");
                            return Ok(cached);
                        }
                    }
                }
            }
        }

        // Every provider exhausted; the last good quote is still better than
        // nothing, even on a forced refresh
        if let Some(cached) = self.cached() {
            tracing::warn!(
                age_secs = cached.age_secs(now),
                "all providers failed, returning stale cache"
            );
            return Ok(cached);
        }

        Err(BotError::NoReasonablePrice)
    }

    /// Cross-validate the primary provider against the last (the oracle in
    /// the production ordering) and flag divergence beyond tolerance
    pub async fn check_health(&self) -> Result<FeedHealth> {
        if self.providers.len() < 2 {
            return Err(BotError::Other(
                "health check requires at least two providers".to_string(),
            ));
        }

        let per_call = Duration::from_secs(self.config.provider_timeout_secs);
        let primary = &self.providers[0];
        let reference = &self.providers[self.providers.len() - 1];

        let a = timeout(per_call, primary.fetch())
            .await
            .map_err(|_| BotError::Provider {
                source: primary.source(),
                reason: "health check timeout".to_string(),
            })??;
        let b = timeout(per_call, reference.fetch())
            .await
            .map_err(|_| BotError::Provider {
                source: reference.source(),
                reason: "health check timeout".to_string(),
            })??;

        let mid = (a.price + b.price) / 2.0;
        let divergence = if mid > 0.0 {
            (a.price - b.price).abs() / mid
        } else {
            f64::INFINITY
        };

        Ok(FeedHealth {
            healthy: divergence <= self.config.divergence_tolerance,
            divergence,
            primary: a.source,
            reference: b.source,
        })
    }

    pub fn cached(&self) -> Option<PriceQuote> {
        self.cache.read().ok().and_then(|guard| guard.clone())
    }

    fn store(&self, quote: PriceQuote) {
        if let Ok(mut guard) = self.cache.write() {
            *guard = Some(quote);
        }
    }

    fn plausible(&self, price: f64) -> bool {
        price.is_finite()
            && price > 0.0
            && price >= self.config.min_price_usd
            && price <= self.config.max_price_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: pops one canned response per fetch, then repeats
    /// the last one
    struct ScriptedProvider {
        source: PriceSource,
        responses: Mutex<VecDeque<std::result::Result<f64, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(
            source: PriceSource,
            responses: Vec<std::result::Result<f64, String>>,
        ) -> Box<Self> {
            Box::new(Self {
                source,
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceProvider for ScriptedProvider {
        fn source(&self) -> PriceSource {
            self.source
        }

        async fn fetch(&self) -> Result<PriceQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let response = if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap_or(Err("empty".into()))
            };

            match response {
                Ok(price) => Ok(PriceQuote {
                    price,
                    timestamp: Utc::now(),
                    confidence: 0.9,
                    source: self.source,
                }),
                Err(reason) => Err(BotError::Provider {
                    source: self.source,
                    reason,
                }),
            }
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig {
            cache_ttl_secs: 60,
            min_price_usd: 1.0,
            max_price_usd: 10_000.0,
            oracle_min_usd: 50.0,
            oracle_max_usd: 500.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers() {
        let provider = ScriptedProvider::new(PriceSource::DexScreener, vec![Ok(100.0)]);
        let resolver = PriceResolver::new(vec![provider], config());

        let first = resolver.get_price(false).await.unwrap();
        let second = resolver.get_price(false).await.unwrap();

        assert_eq!(first.price, 100.0);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache() {
        let provider =
            ScriptedProvider::new(PriceSource::DexScreener, vec![Ok(100.0), Ok(110.0)]);
        let resolver = PriceResolver::new(vec![provider], config());

        assert_eq!(resolver.get_price(false).await.unwrap().price, 100.0);
        assert_eq!(resolver.get_price(true).await.unwrap().price, 110.0);
    }

    #[tokio::test]
    async fn test_fallback_to_next_provider_without_cache() {
        let failing = ScriptedProvider::new(PriceSource::DexScreener, vec![Err("boom".into())]);
        let backup = ScriptedProvider::new(PriceSource::CoinGecko, vec![Ok(101.5)]);
        let resolver = PriceResolver::new(vec![failing, backup], config());

        let quote = resolver.get_price(false).await.unwrap();
        assert_eq!(quote.price, 101.5);
        assert_eq!(quote.source, PriceSource::CoinGecko);
    }

    #[tokio::test]
    async fn test_provider_error_serves_stale_cache_when_not_forced() {
        let provider = ScriptedProvider::new(
            PriceSource::DexScreener,
            vec![Ok(100.0), Err("down".into())],
        );
        let backup = ScriptedProvider::new(PriceSource::CoinGecko, vec![Ok(999.0)]);
        let resolver = PriceResolver::new(vec![provider, backup], {
            let mut cfg = config();
            cfg.cache_ttl_secs = 0; // every call re-queries
            cfg
        });

        assert_eq!(resolver.get_price(false).await.unwrap().price, 100.0);

        // Unforced + cache present: the stale quote wins over the backup
        let quote = resolver.get_price(false).await.unwrap();
        assert_eq!(quote.price, 100.0);
        assert_eq!(quote.source, PriceSource::DexScreener);
    }

    #[tokio::test]
    async fn test_forced_call_falls_back_to_stale_cache_when_all_fail() {
        let provider = ScriptedProvider::new(
            PriceSource::DexScreener,
            vec![Ok(100.0), Err("down".into())],
        );
        let resolver = PriceResolver::new(vec![provider], config());

        assert_eq!(resolver.get_price(false).await.unwrap().price, 100.0);

        let quote = resolver.get_price(true).await.unwrap();
        assert_eq!(quote.price, 100.0);
    }

    #[tokio::test]
    async fn test_no_reasonable_price_without_cache() {
        let provider = ScriptedProvider::new(PriceSource::DexScreener, vec![Err("down".into())]);
        let resolver = PriceResolver::new(vec![provider], config());

        let result = resolver.get_price(true).await;
        assert!(matches!(result, Err(BotError::NoReasonablePrice)));
    }

    #[tokio::test]
    async fn test_implausible_quote_rejected() {
        // First provider returns garbage magnitude, second a sane price
        let garbage = ScriptedProvider::new(PriceSource::DexScreener, vec![Ok(1e9)]);
        let sane = ScriptedProvider::new(PriceSource::CoinGecko, vec![Ok(105.0)]);
        let resolver = PriceResolver::new(vec![garbage, sane], config());

        let quote = resolver.get_price(true).await.unwrap();
        assert_eq!(quote.price, 105.0);
    }

    #[tokio::test]
    async fn test_quote_never_outside_plausibility_band() {
        let provider = ScriptedProvider::new(PriceSource::DexScreener, vec![Ok(0.5)]);
        let resolver = PriceResolver::new(vec![provider], config());

        // 0.5 is below min_price_usd=1.0 and there is no fallback or cache
        assert!(resolver.get_price(true).await.is_err());
    }

    #[tokio::test]
    async fn test_oracle_quote_clamped() {
        let oracle = ScriptedProvider::new(PriceSource::Oracle, vec![Ok(9_000.0)]);
        let resolver = PriceResolver::new(vec![oracle], config());

        // Within the broad band but above the oracle clamp of 500
        let quote = resolver.get_price(true).await.unwrap();
        assert_eq!(quote.price, 500.0);
    }

    #[tokio::test]
    async fn test_check_health_divergence() {
        let a = ScriptedProvider::new(PriceSource::DexScreener, vec![Ok(100.0)]);
        let b = ScriptedProvider::new(PriceSource::Oracle, vec![Ok(110.0)]);
        let resolver = PriceResolver::new(vec![a, b], config());

        let health = resolver.check_health().await.unwrap();
        assert!(!health.healthy);
        assert!(health.divergence > 0.09);

        let a = ScriptedProvider::new(PriceSource::DexScreener, vec![Ok(100.0)]);
        let b = ScriptedProvider::new(PriceSource::Oracle, vec![Ok(100.5)]);
        let resolver = PriceResolver::new(vec![a, b], config());

        let health = resolver.check_health().await.unwrap();
        assert!(health.healthy);
    }
}
