//! In-flight request deduplication.
//!
//! Widgets tend to fire the same connect request twice (double clicks,
//! remounts). An identical request arriving within the window joins the
//! call already in flight instead of starting a second agent. If that call
//! fails, the joiner issues its own.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parley_types::SessionCredentials;
use tokio::time::Instant;

use crate::upstream::RelayError;

/// Outcome shared between every request with the same key.
pub type StartResult = Result<SessionCredentials, Arc<RelayError>>;

type SharedStart = Shared<BoxFuture<'static, StartResult>>;

struct Entry {
    generation: u64,
    started: Instant,
    pending: SharedStart,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

enum Claim {
    Joined { generation: u64, pending: SharedStart },
    Owner { generation: u64, pending: SharedStart },
}

/// Dedup key: the agent name plus the query map in canonical (sorted) form.
pub fn request_key(agent: &str, query: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(query).unwrap_or_default();
    format!("{agent}-{canonical}")
}

/// Registry of upstream start calls that identical requests may share.
pub struct InFlightRegistry {
    window: Duration,
    inner: Mutex<Inner>,
}

impl InFlightRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("in-flight registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Runs `start` unless an identical request is already in flight, in
    /// which case its result is reused.
    ///
    /// `start` is called at most once per invocation of `run`.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: &str, start: F) -> StartResult
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<SessionCredentials, RelayError>> + Send + 'static,
    {
        let mut may_join = true;
        loop {
            match self.claim(key, &start, may_join) {
                Claim::Joined {
                    generation,
                    pending,
                } => match pending.await {
                    Ok(credentials) => return Ok(credentials),
                    Err(err) => {
                        tracing::warn!(%key, error = %err, "shared request failed, issuing a fresh one");
                        self.remove(key, generation);
                        may_join = false;
                    }
                },
                Claim::Owner {
                    generation,
                    pending,
                } => {
                    let result = pending.await;
                    match &result {
                        Ok(_) => self.evict_after_window(key.to_string(), generation),
                        Err(_) => self.remove(key, generation),
                    }
                    return result;
                }
            }
        }
    }

    /// Joins a live entry or inserts a new one, atomically.
    fn claim<F, Fut>(&self, key: &str, start: &F, may_join: bool) -> Claim
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<SessionCredentials, RelayError>> + Send + 'static,
    {
        let mut inner = self.lock();
        if may_join {
            if let Some(entry) = inner.entries.get(key) {
                let age = entry.started.elapsed();
                if age < self.window {
                    tracing::info!(
                        %key,
                        age_ms = age.as_millis() as u64,
                        "duplicate request, reusing in-flight start"
                    );
                    return Claim::Joined {
                        generation: entry.generation,
                        pending: entry.pending.clone(),
                    };
                }
            }
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let pending = start().map(|result| result.map_err(Arc::new)).boxed().shared();
        inner.entries.insert(
            key.to_string(),
            Entry {
                generation,
                started: Instant::now(),
                pending: pending.clone(),
            },
        );
        Claim::Owner {
            generation,
            pending,
        }
    }

    /// Removes `key` only if it still holds the entry from `generation`.
    fn remove(&self, key: &str, generation: u64) {
        let mut inner = self.lock();
        if inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            inner.entries.remove(key);
        }
    }

    fn evict_after_window(self: &Arc<Self>, key: String, generation: u64) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(registry.window).await;
            registry.remove(&key, generation);
        });
    }

    /// Drops entries older than the window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        let window = self.window;
        inner
            .entries
            .retain(|_, entry| entry.started.elapsed() <= window);
        before - inner.entries.len()
    }
}
