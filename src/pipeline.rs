use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::alert::CanonicalAlert;
use crate::config::Config;
use crate::correlation::CorrelationEngine;
use crate::store::{self, Db};
use crate::stream::Broadcaster;

/// Handle to the alert pipeline. Ingest sources (HTTP handler, file tailer)
/// push canonical alerts through `submit`; a single worker task consumes
/// them, which serializes every store/ring/broadcast/correlator mutation
/// and gives all clients one global delivery order.
pub struct AlertPipeline {
    tx: mpsc::UnboundedSender<CanonicalAlert>,
    recent: Arc<Mutex<VecDeque<CanonicalAlert>>>,
    broadcaster: Arc<Broadcaster>,
}

struct WorkerSettings {
    retention_limit: i64,
    startup_load_limit: usize,
    prune_interval: u64,
}

impl AlertPipeline {
    pub async fn start(pool: Db, broadcaster: Arc<Broadcaster>, config: &Config) -> Arc<AlertPipeline> {
        // Warm the replay ring from the store; a read failure starts empty.
        let ring = match store::recent_alerts(&pool, config.startup_load_limit as i64).await {
            Ok(alerts) => {
                println!("[PIPELINE] Loaded {} recent alerts from store", alerts.len());
                VecDeque::from(alerts)
            }
            Err(e) => {
                println!("[PIPELINE] Could not load recent alerts: {}. Starting empty.", e);
                VecDeque::new()
            }
        };
        let recent = Arc::new(Mutex::new(ring));

        let (tx, rx) = mpsc::unbounded_channel();
        let settings = WorkerSettings {
            retention_limit: config.retention_limit,
            startup_load_limit: config.startup_load_limit,
            prune_interval: config.prune_interval.max(1),
        };
        let correlator = CorrelationEngine::new(
            config.correlation_window_seconds,
            config.correlation_threshold,
        );

        tokio::spawn(run_worker(
            rx,
            pool,
            broadcaster.clone(),
            recent.clone(),
            correlator,
            settings,
        ));

        Arc::new(AlertPipeline {
            tx,
            recent,
            broadcaster,
        })
    }

    /// Queues an alert for processing. Returns false once the worker is gone.
    pub fn submit(&self, alert: CanonicalAlert) -> bool {
        self.tx.send(alert).is_ok()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Recent alerts in ascending timestamp order. The ring holds arrival
    /// order, and the merged stream is not timestamp-ordered (correlation
    /// synthetics and backlogged tailer lines interleave), so snapshots
    /// re-sort before serving. The sort is stable: alerts sharing a
    /// timestamp keep their delivery order.
    pub async fn recent_snapshot(&self) -> Vec<CanonicalAlert> {
        let mut alerts: Vec<CanonicalAlert> = self.recent.lock().await.iter().cloned().collect();
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        alerts
    }

    /// Recent alerts pre-serialized for a WebSocket replay batch.
    pub async fn replay_snapshot(&self) -> Vec<String> {
        self.recent_snapshot()
            .await
            .iter()
            .filter_map(|alert| serde_json::to_string(alert).ok())
            .collect()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<CanonicalAlert>,
    pool: Db,
    broadcaster: Arc<Broadcaster>,
    recent: Arc<Mutex<VecDeque<CanonicalAlert>>>,
    mut correlator: CorrelationEngine,
    settings: WorkerSettings,
) {
    let mut processed: u64 = 0;

    while let Some(alert) = rx.recv().await {
        // A triggered synthetic re-enters the same path right after its
        // trigger; the correlator's source guard stops any further chain.
        let mut next = Some(alert);
        while let Some(alert) = next.take() {
            let payload = match serde_json::to_string(&alert) {
                Ok(payload) => payload,
                Err(e) => {
                    println!("[PIPELINE] Dropping unserializable alert {}: {}", alert.id, e);
                    continue;
                }
            };

            // 1. Persist (best effort: delivery continues on store errors)
            if let Err(e) = store::insert_alert(&pool, &alert, &payload).await {
                println!("[DATABASE] Error inserting alert {}: {}", alert.id, e);
            }

            // 2. Periodic prune, off the hot path
            processed += 1;
            if processed % settings.prune_interval == 0 {
                let pool = pool.clone();
                let keep = settings.retention_limit;
                tokio::spawn(async move {
                    match store::prune_alerts(&pool, keep).await {
                        Ok(0) => {}
                        Ok(n) => println!("[DATABASE] Pruned {} alerts beyond retention", n),
                        Err(e) => println!("[DATABASE] Prune failed: {}", e),
                    }
                });
            }

            // 3. Recent ring, serving replay without touching the store
            {
                let mut ring = recent.lock().await;
                ring.push_back(alert.clone());
                while ring.len() > settings.startup_load_limit {
                    ring.pop_front();
                }
            }

            // 4. Fan out to connected clients
            broadcaster.send_message(&payload);

            // 5. Correlate
            if let Some(synth) = correlator.process(&alert) {
                println!("[CORRELATION] {}", synth.title);
                next = Some(synth);
            }
        }
    }

    println!("[PIPELINE] Ingest channel closed, worker exiting");
}
