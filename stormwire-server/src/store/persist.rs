//! Snapshot persistence
//!
//! Crash-recovery only: the active set is periodically serialized to a
//! single JSON file and reloaded on startup, dropping anything that expired
//! while the process was down.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use stormwire_common::alert::Alert;

use super::AlertStore;
use crate::error::Error;

/// How often the active set is written out.
pub const SNAPSHOT_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    generated_at: DateTime<Utc>,
    alerts: Vec<Alert>,
}

/// Write the current active set to `path`. The write goes through a
/// temporary file and rename so a crash mid-write never corrupts the
/// snapshot.
pub fn save(store: &AlertStore, path: &Path) -> Result<usize, Error> {
    let alerts = store.snapshot();
    let count = alerts.len();
    let file = SnapshotFile {
        generated_at: Utc::now(),
        alerts,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(count)
}

/// Load a snapshot, dropping entries whose expiration has passed. A missing
/// file is an empty snapshot, not an error.
pub fn load(path: &Path, now: DateTime<Utc>) -> Result<Vec<Alert>, Error> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let file: SnapshotFile = serde_json::from_str(&raw)
        .map_err(|e| Error::Persistence(format!("unreadable snapshot {}: {e}", path.display())))?;

    let total = file.alerts.len();
    let alive: Vec<Alert> = file
        .alerts
        .into_iter()
        .filter(|a| !a.is_expired_at(now))
        .collect();
    info!(
        loaded = alive.len(),
        dropped = total - alive.len(),
        generated_at = %file.generated_at,
        "loaded alert snapshot"
    );
    Ok(alive)
}

/// Periodic snapshot loop; writes a final snapshot on shutdown.
pub async fn run_persistence(
    store: &AlertStore,
    path: std::path::PathBuf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(SNAPSHOT_INTERVAL_SECONDS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = save(store, &path) {
                    warn!(error = %e, "periodic snapshot failed");
                }
            }
            _ = shutdown.changed() => {
                match save(store, &path) {
                    Ok(count) => info!(count, "final snapshot written"),
                    Err(e) => warn!(error = %e, "final snapshot failed"),
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stormwire_common::alert::{AlertSource, Significance};

    fn alert(id: &str, expires_in_minutes: i64) -> Alert {
        let mut alert = Alert::new(id.to_string(), AlertSource::Push);
        alert.phenomenon = "SV".into();
        alert.significance = Significance::Warning;
        alert.affected_areas = vec!["OHC085".into()];
        alert.expiration_time = Some(Utc::now() + Duration::minutes(expires_in_minutes));
        alert.finish_classification();
        alert
    }

    #[test]
    fn save_load_round_trip_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let store = AlertStore::new(60);
        store.upsert(alert("KCLE-SV.W-201815-0001", 45));
        store.upsert(alert("KCLE-SV.W-201815-0002", -10));
        // The expired record is still active in the store (eviction has not
        // run) but must be dropped on reload.
        assert_eq!(save(&store, &path).unwrap(), 2);

        let loaded = load(&path, Utc::now()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].product_id, "KCLE-SV.W-201815-0001");
    }

    #[test]
    fn restore_rehydrates_without_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let store = AlertStore::new(60);
        store.upsert(alert("KCLE-SV.W-201815-0001", 45));
        save(&store, &path).unwrap();

        let restored = AlertStore::new(60);
        let mut rx = restored.subscribe();
        restored.restore(load(&path, Utc::now()).unwrap());
        assert_eq!(restored.len(), 1);
        assert!(rx.try_recv().is_err());

        // A fresh subscriber's bulk equals the rehydrated set.
        let (snapshot, _) = restored.snapshot_and_subscribe();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].product_id, "KCLE-SV.W-201815-0001");
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&dir.path().join("absent.json"), Utc::now()).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load(&path, Utc::now()).is_err());
    }
}
