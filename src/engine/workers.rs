// Bounded background task executor. The teacher's bridges each spawn a
// `tokio::spawn` loop gated by an `Arc<AtomicBool>` stop flag; this
// generalizes that shape into a pool with a concurrency cap and single-flight
// guarantee per owning entity, so two jobs for the same
// `(entity_kind, entity_id)` never run at once.

use log::{error, warn};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<(&'static str, String)>>>,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(concurrency.max(1))), in_flight: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Submits `fut` to run under `entity_kind`/`entity_id`'s single-flight
    /// slot. If a job for the same entity is already running, this one is
    /// skipped and logged rather than queued — the caller is expected to
    /// re-submit on its own schedule (e.g. the next crawl tick) rather than
    /// pile up redundant work for the same entity.
    pub async fn submit<F>(&self, entity_kind: &'static str, entity_id: impl Into<String>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let entity_id = entity_id.into();
        let key = (entity_kind, entity_id.clone());

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(key.clone()) {
                warn!("skipping submit for {entity_kind}:{entity_id}, already in flight");
                return;
            }
        }

        let semaphore = self.semaphore.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    error!("worker pool semaphore closed, dropping job for {}:{}", key.0, key.1);
                    in_flight.lock().await.remove(&key);
                    return;
                }
            };
            fut.await;
            drop(permit);
            in_flight.lock().await.remove(&key);
        });
    }

    pub async fn is_in_flight(&self, entity_kind: &'static str, entity_id: &str) -> bool {
        self.in_flight.lock().await.contains(&(entity_kind, entity_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn caps_concurrency_at_configured_limit() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit("test", i.to_string(), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn second_submit_for_same_entity_is_skipped_while_first_runs() {
        let pool = WorkerPool::new(4);
        let completions = Arc::new(AtomicUsize::new(0));

        let completions_a = completions.clone();
        pool.submit("crawl", "job-1", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            completions_a.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        assert!(pool.is_in_flight("crawl", "job-1").await);

        let completions_b = completions.clone();
        pool.submit("crawl", "job-1", async move {
            completions_b.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(!pool.is_in_flight("crawl", "job-1").await);
    }
}
