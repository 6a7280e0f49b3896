use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::storage::Storage;

/// Runs `storage.flush()` once per `interval`, forever, until `shutdown`
/// resolves. Each tick awaits the interval first and then performs at
/// most one flush; cancellation between ticks never leaves a partial
/// flush behind because `flush()` itself only commits inside a single
/// checkpoint transaction.
pub async fn run(storage: Arc<Mutex<Storage>>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut guard = storage.lock().await;
                if let Err(err) = guard.flush() {
                    log::error!("periodic flush failed: {err}");
                }
            }
            _ = shutdown.changed() => {
                log::info!("flush scheduler shutting down");
                break;
            }
        }
    }
}
