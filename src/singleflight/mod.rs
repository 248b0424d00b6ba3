//! Per-key request coalescing.
//!
//! Concurrent loads for the same key collapse onto a single execution whose
//! result — value or error — is shared with every caller in the window. A
//! failing load still suppresses the duplicates that raced with it; the next
//! call after the window runs the work again.


use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{oneshot, watch};

use crate::error::{CacheError, Result};

/// A single in-flight (or just-completed) execution for one key.
struct Call<T> {
    result: OnceLock<Result<T>>,
    done: watch::Sender<bool>,
}

pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Arc<Call<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `work` for `key`, coalescing concurrent callers onto one
    /// execution. Every caller in the window observes the same result.
    pub async fn do_call<F, Fut>(&self, key: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (call, leader) = {
            let mut calls = self.calls.lock().unwrap();
            match calls.get(key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let call = Arc::new(Call {
                        result: OnceLock::new(),
                        done: watch::channel(false).0,
                    });
                    calls.insert(key.to_string(), Arc::clone(&call));
                    (call, true)
                }
            }
        };

        if !leader {
            let mut done = call.done.subscribe();
            if !*done.borrow_and_update() {
                // The sender lives inside the call record, so this resolves
                // once the slot has been filled.
                let _ = done.changed().await;
            }
            return call
                .result
                .get()
                .cloned()
                .unwrap_or_else(|| Err(CacheError::Loader("coalesced load produced no result".into())));
        }

        let mut flight = Flight {
            calls: &self.calls,
            key: key.to_string(),
            call,
            finished: false,
        };
        let result = work().await;
        flight.finish(result.clone());
        result
    }

    /// Like [`do_call`](Self::do_call), but hands back a channel that will
    /// deliver the shared result exactly once.
    pub fn do_chan<F, Fut>(self: &Arc<Self>, key: &str, work: F) -> oneshot::Receiver<Result<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let flight = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            let result = flight.do_call(&key, work).await;
            let _ = tx.send(result);
        });
        rx
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion guard for the leading caller. Removes the call record and
/// wakes the waiters, even when the leader's future is dropped mid-load.
struct Flight<'a, T> {
    calls: &'a Mutex<HashMap<String, Arc<Call<T>>>>,
    key: String,
    call: Arc<Call<T>>,
    finished: bool,
}

impl<T> Flight<'_, T> {
    fn finish(&mut self, result: Result<T>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let _ = self.call.result.set(result);
        self.calls.lock().unwrap().remove(&self.key);
        self.call.done.send_replace(true);
    }
}

impl<T> Drop for Flight<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Err(CacheError::Loader("origin load cancelled".into())));
        }
    }
}
