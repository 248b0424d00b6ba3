#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::cache::Cache;
    use crate::store::{StoreKind, StoreOptions};
    use crate::value::ByteView;

    #[tokio::test]
    async fn get_before_first_write_is_a_cheap_miss() {
        let cache = Cache::new(StoreOptions::default());

        assert!(cache.get("anything").is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.items, 0, "a read must not construct the store");
    }

    #[tokio::test]
    async fn add_then_get_counts_a_hit() {
        let cache = Cache::new(StoreOptions::default());
        cache.add("k", ByteView::from("v")).unwrap();

        assert_eq!(cache.get("k"), Some(ByteView::from("v")));
        assert!(cache.get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.items, 1);
    }

    #[tokio::test]
    async fn add_with_expiration_honors_the_deadline() {
        let cache = Cache::new(StoreOptions::default());
        cache
            .add_with_expiration("k", ByteView::from("v"), Instant::now() + Duration::from_millis(40))
            .unwrap();

        assert!(cache.get("k").is_some());
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(cache.get("k").is_none(), "entry should have expired");
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache = Cache::new(StoreOptions::default());
        assert!(!cache.delete("k"), "delete on an uninitialized cache is a no-op");

        cache.add("k", ByteView::from("v")).unwrap();
        assert!(cache.delete("k"));
        assert!(cache.get("k").is_none());

        cache.add("a", ByteView::from("1")).unwrap();
        cache.add("b", ByteView::from("2")).unwrap();
        cache.clear();
        assert_eq!(cache.stats().items, 0);
    }

    #[tokio::test]
    async fn lazy_init_is_single_shot_under_contention() {
        let cache = Arc::new(Cache::new(StoreOptions {
            kind: StoreKind::Lru2,
            bucket_count: 4,
            ..StoreOptions::default()
        }));

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.add(&format!("k{}", i), ByteView::from("v")).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.stats().items, 16, "every writer must land in the same store");
    }
}
