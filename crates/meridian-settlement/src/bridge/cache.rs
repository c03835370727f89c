//! Short-TTL spot price cache wrapped around a bridge.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::trace;

use super::{
    CfmmBridge,
    ExecutionResult,
    Route,
    TokenId,
};

/// Default freshness window of a cached price.
const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Caches `(token_in, token_out) -> price` pairs with a TTL.
///
/// The reverse pair is kept consistent: inserting a positive price also
/// stores its reciprocal for the flipped pair. Expired entries are purged
/// lazily on access.
pub struct PriceCache {
    ttl: Duration,
    entries: Mutex<HashMap<(TokenId, TokenId), (Decimal, Instant)>>,
}

impl PriceCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, token_in: TokenId, token_out: TokenId, price: Decimal) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("price cache lock poisoned");
        entries.retain(|_, (_, at)| now.duration_since(*at) < self.ttl);
        entries.insert((token_in, token_out), (price, now));
        if price > Decimal::ZERO {
            entries.insert((token_out, token_in), (Decimal::ONE / price, now));
        }
    }

    #[must_use]
    pub fn get(&self, token_in: TokenId, token_out: TokenId) -> Option<Decimal> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("price cache lock poisoned");
        match entries.get(&(token_in, token_out)) {
            Some((price, at)) if now.duration_since(*at) < self.ttl => Some(*price),
            Some(_) => {
                entries.remove(&(token_in, token_out));
                None
            }
            None => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("price cache lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// A [`CfmmBridge`] wrapper that answers `spot_price` from the cache when
/// possible and feeds observed prices back into it.
pub struct CachingBridge<B> {
    inner: B,
    cache: PriceCache,
}

impl<B> CachingBridge<B> {
    #[must_use]
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            cache: PriceCache::default(),
        }
    }

    #[must_use]
    pub fn with_ttl(inner: B, ttl: Duration) -> Self {
        Self {
            inner,
            cache: PriceCache::new(ttl),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }
}

#[async_trait]
impl<B: CfmmBridge> CfmmBridge for CachingBridge<B> {
    async fn get_route(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount: Decimal,
        slippage: Decimal,
    ) -> Option<Route> {
        let route = self.inner.get_route(token_in, token_out, amount, slippage).await?;
        self.cache.insert(token_in, token_out, route.price);
        Some(route)
    }

    async fn execute_direct(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount: Decimal,
        slippage: Decimal,
    ) -> Option<ExecutionResult> {
        let result = self
            .inner
            .execute_direct(token_in, token_out, amount, slippage)
            .await?;
        self.cache.insert(token_in, token_out, result.price);
        Some(result)
    }

    async fn spot_price(&self, token_in: TokenId, token_out: TokenId) -> Option<Decimal> {
        if let Some(price) = self.cache.get(token_in, token_out) {
            trace!(%token_in, %token_out, %price, "spot price served from cache");
            return Some(price);
        }
        let price = self.inner.spot_price(token_in, token_out).await?;
        self.cache.insert(token_in, token_out, price);
        Some(price)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn reverse_pair_is_kept_consistent() {
        let cache = PriceCache::default();
        cache.insert(TokenId(1), TokenId(2), dec!(4));
        assert_eq!(cache.get(TokenId(1), TokenId(2)), Some(dec!(4)));
        assert_eq!(cache.get(TokenId(2), TokenId(1)), Some(dec!(0.25)));
    }

    #[test]
    fn zero_price_has_no_reverse_entry() {
        let cache = PriceCache::default();
        cache.insert(TokenId(1), TokenId(2), dec!(0));
        assert_eq!(cache.get(TokenId(1), TokenId(2)), Some(dec!(0)));
        assert_eq!(cache.get(TokenId(2), TokenId(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_the_ttl() {
        let cache = PriceCache::new(Duration::from_secs(1));
        cache.insert(TokenId(1), TokenId(2), dec!(4));
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(cache.get(TokenId(1), TokenId(2)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_purged_on_insert() {
        let cache = PriceCache::new(Duration::from_secs(1));
        cache.insert(TokenId(1), TokenId(2), dec!(4));
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.insert(TokenId(3), TokenId(4), dec!(2));
        // Only the fresh pair and its reverse remain.
        assert_eq!(cache.len(), 2);
    }
}
