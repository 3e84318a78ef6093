//! Capped, thread-safe event storage
//!
//! Single writer (the acquisition engine), many snapshot readers.
//! Event ids are handed out at insertion, so an event's id always
//! equals its zero-based position in the store. Appends beyond
//! capacity are refused, never silently dropped in the middle of
//! a batch.

use std::sync::Mutex;

use crate::constants::EVENT_STORE_CAPACITY;
use crate::events::Event;

/// Result of a batch append
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BatchAppend {
  pub accepted : usize,
  pub refused  : usize,
  /// True exactly once per not-full -> full transition. The
  /// flag rearms on [`EventStore::clear`].
  pub filled   : bool,
}

struct StoreInner {
  events        : Vec<Event>,
  next_event_id : u64,
  full_notified : bool,
}

/// Append-only event buffer with a fixed capacity
///
/// `clear` is only legal while the engine is stopped; the store
/// itself cannot check that, the engine enforces it.
pub struct EventStore {
  capacity : usize,
  inner    : Mutex<StoreInner>,
}

impl EventStore {
  /// # Arguments
  ///
  /// * capacity : maximum number of events, >= 1
  pub fn new(capacity : usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      capacity,
      inner : Mutex::new(StoreInner {
        events        : Vec::new(),
        next_event_id : 0,
        full_notified : false,
      }),
    }
  }

  /// Append a single event. Returns false if the store is full.
  pub fn add(&self, event : Event) -> bool {
    self.add_batch(vec![event]).accepted == 1
  }

  /// Append a batch in order. If the batch does not fit, the
  /// prefix that fits is appended and the rest is refused.
  pub fn add_batch(&self, events : Vec<Event>) -> BatchAppend {
    let mut inner = self.inner.lock().expect("event store lock poisoned");
    let space    = self.capacity - inner.events.len();
    let accepted = events.len().min(space);
    let refused  = events.len() - accepted;
    for mut event in events.into_iter().take(accepted) {
      event.event_id = inner.next_event_id;
      inner.next_event_id += 1;
      inner.events.push(event);
    }
    let mut filled = false;
    if refused > 0 && !inner.full_notified {
      inner.full_notified = true;
      filled = true;
      warn!("Event store is full! Refusing {} events", refused);
    }
    BatchAppend {
      accepted,
      refused,
      filled,
    }
  }

  pub fn len(&self) -> usize {
    self.inner.lock().expect("event store lock poisoned").events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Instantaneous fill level in [0, 1]
  pub fn fill_fraction(&self) -> f32 {
    self.len() as f32 / self.capacity as f32
  }

  /// Point-in-time copy of all events
  pub fn snapshot(&self) -> Vec<Event> {
    self.inner.lock().expect("event store lock poisoned").events.clone()
  }

  /// Point-in-time copy of the events matching `pred`
  pub fn snapshot_filtered<F>(&self, pred : F) -> Vec<Event>
    where F : Fn(&Event) -> bool {
    let inner = self.inner.lock().expect("event store lock poisoned");
    inner.events.iter().filter(|ev| pred(ev)).copied().collect()
  }

  /// Drop all events, reset the id counter and release the
  /// allocation
  pub fn clear(&self) {
    let mut inner = self.inner.lock().expect("event store lock poisoned");
    inner.events = Vec::new();
    inner.next_event_id = 0;
    inner.full_notified = false;
    info!("Event store cleared");
  }
}

impl Default for EventStore {
  fn default() -> Self {
    Self::new(EVENT_STORE_CAPACITY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_contiguous_positions() {
    let store = EventStore::new(100);
    for _ in 0..10 {
      assert!(store.add(Event::default()));
    }
    let events = store.snapshot();
    for (pos, ev) in events.iter().enumerate() {
      assert_eq!(ev.event_id, pos as u64);
    }
  }

  #[test]
  fn batch_prefix_fits_rest_refused() {
    let store = EventStore::new(5);
    let batch = vec![Event::default(); 8];
    let append = store.add_batch(batch);
    assert_eq!(append.accepted, 5);
    assert_eq!(append.refused, 3);
    assert!(append.filled);
    // a second refused batch must not re-notify
    let append = store.add_batch(vec![Event::default(); 2]);
    assert_eq!(append.accepted, 0);
    assert!(!append.filled);
  }

  #[test]
  fn clear_resets_ids_and_notification() {
    let store = EventStore::new(3);
    store.add_batch(vec![Event::default(); 4]);
    assert_eq!(store.len(), 3);
    store.clear();
    assert_eq!(store.len(), 0);
    assert!(store.add(Event::default()));
    assert_eq!(store.snapshot()[0].event_id, 0);
    // notification is rearmed
    let append = store.add_batch(vec![Event::default(); 5]);
    assert!(append.filled);
  }

  #[test]
  fn filtered_snapshot_applies_the_predicate() {
    let store = EventStore::new(100);
    for k in 0..10 {
      let mut event = Event::default();
      event.timestamp = k as f64;
      store.add(event);
    }
    let late = store.snapshot_filtered(|ev| ev.timestamp >= 5.0);
    assert_eq!(late.len(), 5);
    assert_eq!(late[0].event_id, 5);
  }

  #[test]
  fn capacity_is_at_least_one() {
    let store = EventStore::new(0);
    assert_eq!(store.capacity(), 1);
  }

  #[test]
  fn concurrent_readers_see_consistent_snapshots() {
    use std::sync::Arc;
    use std::thread;

    let store  = Arc::new(EventStore::new(100_000));
    let writer = {
      let store = Arc::clone(&store);
      thread::spawn(move || {
        for _ in 0..100 {
          store.add_batch(vec![Event::default(); 100]);
        }
      })
    };
    let mut readers = Vec::new();
    for _ in 0..4 {
      let store = Arc::clone(&store);
      readers.push(thread::spawn(move || {
        for _ in 0..50 {
          let events = store.snapshot();
          for (pos, ev) in events.iter().enumerate() {
            assert_eq!(ev.event_id, pos as u64);
          }
        }
      }));
    }
    writer.join().expect("writer panicked");
    for reader in readers {
      reader.join().expect("reader panicked");
    }
    assert_eq!(store.len(), 10_000);
  }
}
