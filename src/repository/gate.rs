//! Per-id write serialization.
//!
//! Writers to the same id queue on one async mutex. Each slot also carries a
//! generation that moves whenever a writer takes or releases the lock, so a
//! read that started before (or during) a write can tell that its value may
//! be stale and skip mirroring it into the local tiers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
  lock: Arc<AsyncMutex<()>>,
  generation: u64,
}

#[derive(Default)]
pub(crate) struct WriteGate {
  slots: Mutex<HashMap<String, Slot>>,
  ticks: AtomicU64,
  /// Generation reported for ids without a slot.
  retired: AtomicU64,
}

impl WriteGate {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Snapshot to hand back to [`WriteGate::mirror`] later.
  pub(crate) fn generation(&self, id: &str) -> u64 {
    self
      .slots()
      .get(id)
      .map(|slot| slot.generation)
      .unwrap_or_else(|| self.retired.load(Ordering::SeqCst))
  }

  /// Exclusive write access to `id`.
  pub(crate) async fn write(&self, id: &str) -> GateGuard<'_> {
    let guard = self.slot_lock(id).lock_owned().await;
    self.bump(id);
    GateGuard {
      gate: self,
      id: id.to_string(),
      guard: Some(guard),
      writer: true,
    }
  }

  /// Exclusive access for mirroring a read, granted only if no write to
  /// `id` started or finished since `seen` was taken.
  pub(crate) async fn mirror(&self, id: &str, seen: u64) -> Option<GateGuard<'_>> {
    let guard = GateGuard {
      gate: self,
      id: id.to_string(),
      guard: Some(self.slot_lock(id).lock_owned().await),
      writer: false,
    };
    if self.generation(id) == seen {
      Some(guard)
    } else {
      None
    }
  }

  fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
    // The map stays consistent even if a holder panicked.
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn tick(&self) -> u64 {
    self.ticks.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn slot_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
    let mut slots = self.slots();
    let retired = self.retired.load(Ordering::SeqCst);
    let slot = slots.entry(id.to_string()).or_insert_with(|| Slot {
      lock: Arc::new(AsyncMutex::new(())),
      generation: retired,
    });
    Arc::clone(&slot.lock)
  }

  fn bump(&self, id: &str) {
    let next = self.tick();
    if let Some(slot) = self.slots().get_mut(id) {
      slot.generation = next;
    }
  }

  /// Drop the slot for `id` if nobody holds or waits on it.
  fn release(&self, id: &str) {
    let mut slots = self.slots();
    let idle = slots
      .get(id)
      .map_or(false, |slot| Arc::strong_count(&slot.lock) == 1);
    if idle {
      if let Some(slot) = slots.remove(id) {
        // Keeps snapshots taken before the slot's last write from matching.
        self.retired.fetch_max(slot.generation, Ordering::SeqCst);
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn slot_count(&self) -> usize {
    self.slots().len()
  }
}

pub(crate) struct GateGuard<'a> {
  gate: &'a WriteGate,
  id: String,
  guard: Option<OwnedMutexGuard<()>>,
  writer: bool,
}

impl Drop for GateGuard<'_> {
  fn drop(&mut self) {
    if self.writer {
      self.gate.bump(&self.id);
    }
    drop(self.guard.take());
    self.gate.release(&self.id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_mirror_allowed_without_writes() {
    let gate = WriteGate::new();
    let seen = gate.generation("a");
    assert!(gate.mirror("a", seen).await.is_some());
    // Mirroring does not move the generation.
    assert!(gate.mirror("a", seen).await.is_some());
    assert_eq!(gate.slot_count(), 0);
  }

  #[tokio::test]
  async fn test_mirror_refused_after_write() {
    let gate = WriteGate::new();
    let seen = gate.generation("a");
    drop(gate.write("a").await);
    assert!(gate.mirror("a", seen).await.is_none());
  }

  #[tokio::test]
  async fn test_mirror_refused_when_read_overlaps_write() {
    let gate = WriteGate::new();
    let writer = gate.write("a").await;
    let seen = gate.generation("a");
    drop(writer);
    assert!(gate.mirror("a", seen).await.is_none());
  }

  #[tokio::test]
  async fn test_other_ids_are_independent() {
    let gate = WriteGate::new();
    let seen = gate.generation("b");
    let _writer = gate.write("a").await;
    assert!(gate.mirror("b", seen).await.is_some());
  }

  #[tokio::test]
  async fn test_same_id_writes_are_serialized() {
    let gate = Arc::new(WriteGate::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = gate.write("a").await;
    let task = {
      let gate = gate.clone();
      let log = log.clone();
      tokio::spawn(async move {
        let _guard = gate.write("a").await;
        log.lock().unwrap().push("second");
      })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    log.lock().unwrap().push("first");
    drop(first);
    task.await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(gate.slot_count(), 0);
  }
}
