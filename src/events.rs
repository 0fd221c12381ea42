use tokio::sync::broadcast;

/// Cross-component refresh notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
  /// An entity was created or updated through a repository
  Upserted { entity_type: String, id: String },
  /// An entity was deleted through a repository
  Removed { entity_type: String, id: String },
  /// Every cached view of a collection should be reloaded
  CollectionInvalidated { entity_type: String },
}

impl RefreshEvent {
  pub fn entity_type(&self) -> &str {
    match self {
      RefreshEvent::Upserted { entity_type, .. }
      | RefreshEvent::Removed { entity_type, .. }
      | RefreshEvent::CollectionInvalidated { entity_type } => entity_type,
    }
  }
}

/// Owner of the refresh channel. Passed explicitly to whoever publishes or
/// listens; there is no process-wide instance.
#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
  tx: broadcast::Sender<RefreshEvent>,
}

impl RefreshCoordinator {
  /// Create a coordinator buffering up to `capacity` events per slow subscriber
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  /// Publish an event, returning how many subscribers will see it
  pub fn publish(&self, event: RefreshEvent) -> usize {
    // No subscribers is fine
    self.tx.send(event).unwrap_or(0)
  }

  pub fn subscribe(&self) -> RefreshSubscription {
    RefreshSubscription {
      rx: self.tx.subscribe(),
      filter: None,
    }
  }

  /// Subscribe to events of one entity type only
  pub fn subscribe_to(&self, entity_type: &str) -> RefreshSubscription {
    RefreshSubscription {
      rx: self.tx.subscribe(),
      filter: Some(entity_type.to_string()),
    }
  }
}

impl Default for RefreshCoordinator {
  fn default() -> Self {
    Self::new(64)
  }
}

/// Receiving end of a [`RefreshCoordinator`]
pub struct RefreshSubscription {
  rx: broadcast::Receiver<RefreshEvent>,
  filter: Option<String>,
}

impl RefreshSubscription {
  /// Receive the next matching event. `None` once the coordinator is gone.
  ///
  /// A subscriber that fell behind gets a `CollectionInvalidated` for its
  /// filter (or an empty type) in place of the events it missed.
  pub async fn next(&mut self) -> Option<RefreshEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) => {
          if self.matches(&event) {
            return Some(event);
          }
        }
        Err(broadcast::error::RecvError::Lagged(_)) => {
          return Some(RefreshEvent::CollectionInvalidated {
            entity_type: self.filter.clone().unwrap_or_default(),
          });
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  fn matches(&self, event: &RefreshEvent) -> bool {
    self
      .filter
      .as_deref()
      .map_or(true, |f| f == event.entity_type())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn upserted(entity_type: &str, id: &str) -> RefreshEvent {
    RefreshEvent::Upserted {
      entity_type: entity_type.to_string(),
      id: id.to_string(),
    }
  }

  #[tokio::test]
  async fn test_filtered_subscription() {
    let coordinator = RefreshCoordinator::default();
    let mut all = coordinator.subscribe();
    let mut notes = coordinator.subscribe_to("note");

    coordinator.publish(upserted("user", "1"));
    coordinator.publish(upserted("note", "2"));

    assert_eq!(all.next().await, Some(upserted("user", "1")));
    assert_eq!(all.next().await, Some(upserted("note", "2")));
    assert_eq!(notes.next().await, Some(upserted("note", "2")));
  }

  #[tokio::test]
  async fn test_publish_without_subscribers() {
    let coordinator = RefreshCoordinator::default();
    assert_eq!(coordinator.publish(upserted("note", "1")), 0);
  }

  #[tokio::test]
  async fn test_lagging_subscriber_gets_invalidation() {
    let coordinator = RefreshCoordinator::new(1);
    let mut sub = coordinator.subscribe_to("note");
    coordinator.publish(upserted("note", "1"));
    coordinator.publish(upserted("note", "2"));

    assert_eq!(
      sub.next().await,
      Some(RefreshEvent::CollectionInvalidated {
        entity_type: "note".to_string()
      })
    );
    assert_eq!(sub.next().await, Some(upserted("note", "2")));
  }

  #[tokio::test]
  async fn test_closed_coordinator_ends_subscription() {
    let coordinator = RefreshCoordinator::default();
    let mut sub = coordinator.subscribe();
    drop(coordinator);
    assert_eq!(sub.next().await, None);
  }
}
