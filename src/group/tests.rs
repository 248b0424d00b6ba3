#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::CacheError;
    use crate::group::{FnLoader, GroupOptions, GroupRegistry, Loader};
    use crate::store::StoreOptions;

    /// Loader returning "data-<key>" and counting its invocations.
    fn counting_loader(counter: Arc<AtomicU32>) -> Arc<dyn Loader> {
        Arc::new(FnLoader(move |key: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<Vec<u8>, anyhow::Error>(format!("data-{}", key).into_bytes())
            }
        }))
    }

    /// Like `counting_loader`, but each load takes `delay` to finish.
    fn slow_loader(counter: Arc<AtomicU32>, delay: Duration) -> Arc<dyn Loader> {
        Arc::new(FnLoader(move |key: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok::<Vec<u8>, anyhow::Error>(format!("data-{}", key).into_bytes())
            }
        }))
    }

    // ============================================================
    // READ PATH
    // ============================================================

    #[tokio::test]
    async fn single_node_read_through() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::clone(&calls)),
            GroupOptions::default(),
        );

        let first = group.get("u1").await.unwrap();
        assert_eq!(first.to_bytes(), b"data-u1".to_vec());
        assert_eq!(group.stats().loader_hits, 1);
        assert_eq!(group.stats().loads, 1);

        let second = group.get("u1").await.unwrap();
        assert_eq!(second.to_bytes(), b"data-u1".to_vec());
        assert_eq!(group.stats().local_hits, 1, "second read must come from the cache");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "loader must not run again");
    }

    #[tokio::test]
    async fn concurrent_reads_coalesce_onto_one_load() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            slow_loader(Arc::clone(&calls), Duration::from_millis(100)),
            GroupOptions::default(),
        );

        let mut handles = Vec::new();
        for _ in 0..10 {
            let group = Arc::clone(&group);
            handles.push(tokio::spawn(async move { group.get("hot").await }));
        }
        for handle in handles {
            let view = handle.await.unwrap().unwrap();
            assert_eq!(view.to_bytes(), b"data-hot".to_vec());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "all ten reads share one load");
        assert_eq!(group.stats().loads, 1);
    }

    #[tokio::test]
    async fn loader_error_reaches_the_caller() {
        let registry = GroupRegistry::new();
        let loader = Arc::new(FnLoader(|_key: String| async move {
            Err::<Vec<u8>, anyhow::Error>(anyhow::anyhow!("origin is down"))
        }));
        let group = registry.new_group("users", 1 << 20, loader, GroupOptions::default());

        let error = group.get("u1").await.unwrap_err();
        assert!(matches!(error, CacheError::Loader(_)), "got {:?}", error);
        assert_eq!(group.stats().loader_errors, 1);
    }

    #[tokio::test]
    async fn load_deadline_falls_through_without_caching() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            slow_loader(Arc::clone(&calls), Duration::from_millis(300)),
            GroupOptions {
                load_timeout: Some(Duration::from_millis(50)),
                ..GroupOptions::default()
            },
        );

        let error = group.get("slow").await.unwrap_err();
        assert_eq!(error, CacheError::DeadlineExceeded);
        assert_eq!(group.stats().loader_errors, 1);

        // Nothing was cached, so the next read hits the loader again.
        let error = group.get("slow").await.unwrap_err();
        assert_eq!(error, CacheError::DeadlineExceeded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let registry = GroupRegistry::new();
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::new(AtomicU32::new(0))),
            GroupOptions::default(),
        );

        assert_eq!(group.get("").await.unwrap_err(), CacheError::EmptyKey);
        assert_eq!(group.set("", b"v".to_vec()).await.unwrap_err(), CacheError::EmptyKey);
        assert_eq!(group.delete("").await.unwrap_err(), CacheError::EmptyKey);
    }

    // ============================================================
    // WRITE PATH
    // ============================================================

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::clone(&calls)),
            GroupOptions::default(),
        );

        group.set("k", b"v".to_vec()).await.unwrap();
        let view = group.get("k").await.unwrap();
        assert_eq!(view.to_bytes(), b"v".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "the write satisfied the read");
    }

    #[tokio::test]
    async fn delete_then_get_reloads_exactly_once() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::clone(&calls)),
            GroupOptions::default(),
        );

        group.set("k", b"v".to_vec()).await.unwrap();
        group.delete("k").await.unwrap();

        let view = group.get("k").await.unwrap();
        assert_eq!(view.to_bytes(), b"data-k".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_value_is_rejected() {
        let registry = GroupRegistry::new();
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::new(AtomicU32::new(0))),
            GroupOptions::default(),
        );

        assert_eq!(group.set("k", Vec::new()).await.unwrap_err(), CacheError::EmptyValue);
        assert_eq!(
            group.set_from_peer("k", Vec::new()).unwrap_err(),
            CacheError::EmptyValue
        );
    }

    #[tokio::test]
    async fn peer_originated_writes_apply_locally() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::clone(&calls)),
            GroupOptions::default(),
        );

        group.set_from_peer("k42", b"v".to_vec()).unwrap();
        let view = group.get("k42").await.unwrap();
        assert_eq!(view.to_bytes(), b"v".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        group.delete_from_peer("k42").unwrap();
        group.get("k42").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "delete removed the local copy");
    }

    #[tokio::test]
    async fn default_ttl_expires_cached_loads() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::clone(&calls)),
            GroupOptions {
                expiration: Some(Duration::from_millis(40)),
                cache: Some(StoreOptions {
                    reaper_interval: Duration::from_millis(20),
                    ..StoreOptions::default()
                }),
                ..GroupOptions::default()
            },
        );

        group.get("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        group.get("k").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2, "the entry must expire between reads");
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    #[tokio::test]
    async fn close_rejects_everything_and_is_idempotent() {
        let registry = GroupRegistry::new();
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::new(AtomicU32::new(0))),
            GroupOptions::default(),
        );

        group.close().await;
        group.close().await;

        assert_eq!(group.get("k").await.unwrap_err(), CacheError::Closed);
        assert_eq!(group.set("k", b"v".to_vec()).await.unwrap_err(), CacheError::Closed);
        assert_eq!(group.delete("k").await.unwrap_err(), CacheError::Closed);
        assert_eq!(group.set_from_peer("k", b"v".to_vec()).unwrap_err(), CacheError::Closed);
        assert_eq!(group.delete_from_peer("k").unwrap_err(), CacheError::Closed);
        assert_eq!(group.clear().unwrap_err(), CacheError::Closed);

        assert!(registry.get("users").is_none(), "close must release the name");
    }

    #[tokio::test]
    async fn registry_replaces_groups_with_the_same_name() {
        let registry = GroupRegistry::new();
        let first = registry.new_group(
            "dup",
            1 << 20,
            counting_loader(Arc::new(AtomicU32::new(0))),
            GroupOptions::default(),
        );
        let second = registry.new_group(
            "dup",
            1 << 20,
            counting_loader(Arc::new(AtomicU32::new(0))),
            GroupOptions::default(),
        );

        assert_eq!(registry.len(), 1);
        let current = registry.get("dup").unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));

        // Closing the replaced group must not evict its successor.
        first.close().await;
        assert!(registry.get("dup").is_some());
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let group = registry.new_group(
            "users",
            1 << 20,
            counting_loader(Arc::clone(&calls)),
            GroupOptions::default(),
        );

        group.set("k", b"v".to_vec()).await.unwrap();
        group.clear().unwrap();
        group.get("k").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "clear must force a reload");
    }
}
