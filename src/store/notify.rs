//! Per-key change notification with cancellable subscriptions.
//!
//! Writers push into each listener's unbounded queue and never wait on the
//! consumer. A [`Subscription`] removes its listener when dropped or when
//! [`Subscription::unsubscribe`] is called.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

type Listeners<T> = HashMap<String, Vec<(u64, mpsc::UnboundedSender<T>)>>;

/// Fan-out of values keyed by topic (an entity id).
pub struct ChangeNotifier<T> {
  listeners: Arc<Mutex<Listeners<T>>>,
  next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> ChangeNotifier<T> {
  pub fn new() -> Self {
    Self {
      listeners: Arc::new(Mutex::new(HashMap::new())),
      next_id: AtomicU64::new(0),
    }
  }

  /// Register a listener for `topic`.
  pub fn subscribe(&self, topic: &str) -> Subscription<T> {
    self.subscribe_with(topic, None)
  }

  /// Register a listener whose first value is `initial`.
  pub fn subscribe_with(&self, topic: &str, initial: Option<T>) -> Subscription<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(value) = initial {
      // Receiver is alive in this scope
      let _ = tx.send(value);
    }

    let listener_id = self.next_id.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut listeners) = self.listeners.lock() {
      listeners
        .entry(topic.to_string())
        .or_default()
        .push((listener_id, tx));
    }

    Subscription {
      rx,
      guard: ListenerGuard {
        listeners: Arc::downgrade(&self.listeners),
        topic: topic.to_string(),
        listener_id,
      },
    }
  }

  /// Queue `value` for every listener of `topic`. Never blocks on consumers.
  pub fn notify(&self, topic: &str, value: T) {
    let Ok(mut listeners) = self.listeners.lock() else {
      return;
    };
    let Some(entries) = listeners.get_mut(topic) else {
      return;
    };

    entries.retain(|(_, tx)| tx.send(value.clone()).is_ok());
    if entries.is_empty() {
      listeners.remove(topic);
    }
  }

  pub fn listener_count(&self, topic: &str) -> usize {
    self
      .listeners
      .lock()
      .map(|l| l.get(topic).map_or(0, Vec::len))
      .unwrap_or(0)
  }
}

impl<T: Clone + Send + 'static> Default for ChangeNotifier<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Removes one listener from its notifier on drop.
struct ListenerGuard<T> {
  listeners: Weak<Mutex<Listeners<T>>>,
  topic: String,
  listener_id: u64,
}

impl<T> Drop for ListenerGuard<T> {
  fn drop(&mut self) {
    let Some(listeners) = self.listeners.upgrade() else {
      return;
    };
    let Ok(mut listeners) = listeners.lock() else {
      return;
    };
    if let Some(entries) = listeners.get_mut(&self.topic) {
      entries.retain(|(id, _)| *id != self.listener_id);
      if entries.is_empty() {
        listeners.remove(&self.topic);
      }
    }
  }
}

/// Live stream of values for one topic.
pub struct Subscription<T> {
  rx: mpsc::UnboundedReceiver<T>,
  guard: ListenerGuard<T>,
}

impl<T> Subscription<T> {
  /// Wait for the next value. `None` once the notifier is gone.
  pub async fn recv(&mut self) -> Option<T> {
    self.rx.recv().await
  }

  /// Take a queued value without waiting.
  pub fn try_recv(&mut self) -> Option<T> {
    self.rx.try_recv().ok()
  }

  pub fn topic(&self) -> &str {
    &self.guard.topic
  }

  /// Stop receiving and release the underlying listener.
  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl<T> Stream for Subscription<T> {
  type Item = T;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
    self.get_mut().rx.poll_recv(cx)
  }
}
