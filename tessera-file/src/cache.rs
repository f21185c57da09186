use async_trait::async_trait;
use bytes::Bytes;
use moka::future::{Cache, CacheBuilder};
use moka::policy::EvictionPolicy;
use rustc_hash::FxBuildHasher;
use tessera_error::TesseraResult;

use crate::ByteRange;

/// The default capacity of a [`MokaPageCache`].
pub const DEFAULT_PAGE_CACHE_BYTES: u64 = 64 << 20;

/// A cache of raw page bytes, keyed by their location in one file.
///
/// A cache instance must not be shared between readers of different files.
#[async_trait]
pub trait PageCache: Send + Sync {
    async fn get(&self, range: ByteRange) -> TesseraResult<Option<Bytes>>;
    async fn put(&self, range: ByteRange, bytes: Bytes) -> TesseraResult<()>;
}

/// A [`PageCache`] that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpPageCache;

#[async_trait]
impl PageCache for NoOpPageCache {
    async fn get(&self, _range: ByteRange) -> TesseraResult<Option<Bytes>> {
        Ok(None)
    }

    async fn put(&self, _range: ByteRange, _bytes: Bytes) -> TesseraResult<()> {
        Ok(())
    }
}

/// A [`PageCache`] based around an in-memory Moka cache.
pub struct MokaPageCache(Cache<ByteRange, Bytes, FxBuildHasher>);

impl MokaPageCache {
    pub fn new(max_capacity_bytes: u64) -> Self {
        Self(
            CacheBuilder::new(max_capacity_bytes)
                .name("tessera-page-cache")
                // Weight each page by its size in bytes.
                .weigher(|_, bytes: &Bytes| u32::try_from(bytes.len()).unwrap_or(u32::MAX))
                // Pages are re-read across scans of the same file, not within one scan.
                .eviction_policy(EvictionPolicy::tiny_lfu())
                .build_with_hasher(FxBuildHasher),
        )
    }
}

impl Default for MokaPageCache {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_CACHE_BYTES)
    }
}

#[async_trait]
impl PageCache for MokaPageCache {
    async fn get(&self, range: ByteRange) -> TesseraResult<Option<Bytes>> {
        Ok(self.0.get(&range).await)
    }

    async fn put(&self, range: ByteRange, bytes: Bytes) -> TesseraResult<()> {
        self.0.insert(range, bytes).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn moka_cache_round_trip() {
        let cache = MokaPageCache::default();
        let range = ByteRange::new(4, 3);
        assert_eq!(cache.get(range).await.unwrap(), None);

        cache.put(range, Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(
            cache.get(range).await.unwrap(),
            Some(Bytes::from_static(b"abc"))
        );
        assert_eq!(cache.get(ByteRange::new(4, 2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn noop_cache_forgets() {
        let cache = NoOpPageCache;
        cache
            .put(ByteRange::new(0, 1), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(cache.get(ByteRange::new(0, 1)).await.unwrap(), None);
    }
}
