//! Precompiled header cache
//!
//! Maps a header compilation's output key (its `-o` path cut at `.gch`) to the
//! artifact produced for it and the header it was built from. A key is either
//! `Building` while exactly one job compiles it, or `Ready`. Other requests
//! for a building key wait on a watch channel and observe the same artifact.
//!
//! All mutation happens under the coordination lock that guards
//! [`IndexState`](crate::index::IndexState); waiting happens outside it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Subdirectory of the database holding relocated artifacts
pub const PCH_DIR: &str = "pch";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PchEntry {
    pub artifact_path: PathBuf,
    pub origin_header: PathBuf,
}

/// Progress of one key, as seen by waiters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PchStatus {
    Building,
    Ready(PchEntry),
    Failed,
}

#[derive(Debug)]
enum Slot {
    Building(watch::Receiver<PchStatus>),
    Ready(PchEntry),
}

/// Exclusive right to compile one key
#[derive(Debug)]
pub struct PchReservation {
    key: String,
    sender: watch::Sender<PchStatus>,
}

/// Answer to [`PchTable::reserve`]
#[derive(Debug)]
pub enum Reservation {
    /// A live entry already exists
    Ready(PchEntry),
    /// Another job is compiling the key
    Wait(watch::Receiver<PchStatus>),
    /// The caller must compile the key and then complete or release it
    Reserved(PchReservation),
}

/// Result of moving artifacts into the database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationReport {
    pub relocated: usize,
    pub dropped: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PchTable {
    slots: HashMap<String, Slot>,
    from_unsaved: HashSet<String>,
}

impl PchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the persisted `pch` value
    pub fn from_map(entries: BTreeMap<String, PchEntry>) -> Self {
        Self {
            slots: entries
                .into_iter()
                .map(|(key, entry)| (key, Slot::Ready(entry)))
                .collect(),
            from_unsaved: HashSet::new(),
        }
    }

    /// Live entries in their persisted form
    pub fn to_map(&self) -> BTreeMap<String, PchEntry> {
        self.slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(entry) => Some((key.clone(), entry.clone())),
                Slot::Building(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn reserve(&mut self, key: &str) -> Reservation {
        match self.slots.get(key) {
            Some(Slot::Ready(entry)) => return Reservation::Ready(entry.clone()),
            // a closed channel means the builder went away without reporting
            Some(Slot::Building(rx)) if rx.has_changed().is_ok() => {
                return Reservation::Wait(rx.clone());
            }
            _ => {}
        }

        let (sender, receiver) = watch::channel(PchStatus::Building);
        self.slots
            .insert(key.to_string(), Slot::Building(receiver));
        debug!("Reserved precompiled header slot {}", key);
        Reservation::Reserved(PchReservation {
            key: key.to_string(),
            sender,
        })
    }

    /// Record a successful compilation and wake every waiter
    pub fn complete(&mut self, reservation: PchReservation, entry: PchEntry, from_unsaved: bool) {
        let PchReservation { key, sender } = reservation;
        if from_unsaved {
            self.from_unsaved.insert(key.clone());
        } else {
            self.from_unsaved.remove(&key);
        }
        self.slots.insert(key, Slot::Ready(entry.clone()));
        let _ = sender.send(PchStatus::Ready(entry));
    }

    /// Give the slot up after a failed compilation
    pub fn release(&mut self, reservation: PchReservation) {
        let PchReservation { key, sender } = reservation;
        self.slots.remove(&key);
        self.from_unsaved.remove(&key);
        let _ = sender.send(PchStatus::Failed);
    }

    /// Receiver for a key that is currently being compiled
    pub fn in_flight(&self, key: &str) -> Option<watch::Receiver<PchStatus>> {
        match self.slots.get(key) {
            Some(Slot::Building(rx)) => Some(rx.clone()),
            _ => None,
        }
    }

    /// Live entry for an `-include` value
    ///
    /// An entry whose artifact no longer exists is dropped.
    pub fn lookup_for_include(&mut self, key: &str) -> Option<PchEntry> {
        let entry = match self.slots.get(key) {
            Some(Slot::Ready(entry)) => entry.clone(),
            _ => return None,
        };
        if entry.artifact_path.is_file() {
            Some(entry)
        } else {
            warn!(
                "Dropping precompiled header {}: {} is gone",
                key,
                entry.artifact_path.display()
            );
            self.remove(key);
            None
        }
    }

    pub fn is_from_unsaved(&self, key: &str) -> bool {
        self.from_unsaved.contains(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.from_unsaved.remove(key);
        self.slots.remove(key).is_some()
    }

    /// Rename every live artifact to `<db_dir>/pch/<storage_key>`
    ///
    /// Entries that cannot be moved are dropped.
    pub fn relocate_all(&mut self, db_dir: &Path) -> RelocationReport {
        let mut report = RelocationReport::default();
        let keys: Vec<String> = self.to_map().into_keys().collect();
        if keys.is_empty() {
            return report;
        }

        let pch_dir = db_dir.join(PCH_DIR);
        if let Err(e) = std::fs::create_dir_all(&pch_dir) {
            warn!("Failed to create {}: {}", pch_dir.display(), e);
        }

        for key in keys {
            let Some(Slot::Ready(entry)) = self.slots.get_mut(&key) else {
                continue;
            };
            let destination = pch_dir.join(storage_key(&key));
            if entry.artifact_path == destination {
                report.relocated += 1;
                continue;
            }
            if destination.exists() {
                let _ = std::fs::remove_file(&destination);
            }
            match std::fs::rename(&entry.artifact_path, &destination) {
                Ok(()) => {
                    entry.artifact_path = destination;
                    report.relocated += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to move precompiled header {} to {}: {}",
                        entry.artifact_path.display(),
                        destination.display(),
                        e
                    );
                    self.remove(&key);
                    report.dropped.push(key);
                }
            }
        }
        report
    }
}

/// File name of a key's artifact inside the database
pub fn storage_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Wait until a building key is resolved; `None` if its compilation failed
pub async fn wait_ready(mut receiver: watch::Receiver<PchStatus>) -> Option<PchEntry> {
    loop {
        match &*receiver.borrow_and_update() {
            PchStatus::Ready(entry) => return Some(entry.clone()),
            PchStatus::Failed => return None,
            PchStatus::Building => {}
        }
        if receiver.changed().await.is_err() {
            return match &*receiver.borrow() {
                PchStatus::Ready(entry) => Some(entry.clone()),
                _ => None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(artifact: &Path) -> PchEntry {
        PchEntry {
            artifact_path: artifact.to_path_buf(),
            origin_header: PathBuf::from("/src/all.h"),
        }
    }

    #[tokio::test]
    async fn test_second_request_waits_for_first() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("all.pch");
        std::fs::write(&artifact, "pch").unwrap();

        let mut table = PchTable::new();
        let Reservation::Reserved(reservation) = table.reserve("/build/all.h") else {
            panic!("first request must reserve");
        };
        let Reservation::Wait(receiver) = table.reserve("/build/all.h") else {
            panic!("second request must wait");
        };
        let waiter = tokio::spawn(wait_ready(receiver));

        table.complete(reservation, entry(&artifact), false);
        assert_eq!(waiter.await.unwrap(), Some(entry(&artifact)));
        assert!(matches!(table.reserve("/build/all.h"), Reservation::Ready(_)));
    }

    #[tokio::test]
    async fn test_release_fails_waiters_and_frees_slot() {
        let mut table = PchTable::new();
        let Reservation::Reserved(reservation) = table.reserve("k") else {
            panic!("expected reservation");
        };
        let Reservation::Wait(receiver) = table.reserve("k") else {
            panic!("expected wait");
        };
        table.release(reservation);

        assert_eq!(wait_ready(receiver).await, None);
        assert!(matches!(table.reserve("k"), Reservation::Reserved(_)));
    }

    #[test]
    fn test_abandoned_reservation_can_be_taken_over() {
        let mut table = PchTable::new();
        let first = table.reserve("k");
        drop(first);
        assert!(matches!(table.reserve("k"), Reservation::Reserved(_)));
    }

    #[test]
    fn test_stale_entry_is_dropped_on_lookup() {
        let mut table = PchTable::from_map(
            [("k".to_string(), entry(Path::new("/no/such/artifact.pch")))]
                .into_iter()
                .collect(),
        );
        assert_eq!(table.lookup_for_include("k"), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_relocation_renames_into_database() {
        let staging = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let artifact = staging.path().join("tmp.pch");
        std::fs::write(&artifact, "pch").unwrap();

        let mut table = PchTable::from_map(
            [
                ("/build/all.h".to_string(), entry(&artifact)),
                ("/build/gone.h".to_string(), entry(&staging.path().join("gone.pch"))),
            ]
            .into_iter()
            .collect(),
        );
        let report = table.relocate_all(db.path());

        assert_eq!(report.relocated, 1);
        assert_eq!(report.dropped, vec!["/build/gone.h".to_string()]);
        let expected = db.path().join(PCH_DIR).join(storage_key("/build/all.h"));
        assert_eq!(table.to_map()["/build/all.h"].artifact_path, expected);
        assert!(expected.is_file());
        assert!(!artifact.exists());

        // relocating again is a no-op
        assert_eq!(table.relocate_all(db.path()).relocated, 1);
    }

    #[test]
    fn test_storage_key_is_sha256_hex() {
        let key = storage_key("/build/all.h");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, storage_key("/build/other.h"));
    }
}
