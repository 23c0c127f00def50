use std::sync::Arc;

use super::{ConnectionError, ConnectionHandle, ConnectionManager};

/// A live registration that is undone exactly once.
///
/// Dropping the guard unregisters the connection, so cleanup also runs when
/// the owning task returns early, errors out, or panics.
pub struct Registration {
    registry: Arc<ConnectionManager>,
    handle: Arc<ConnectionHandle>,
    released: bool,
}

impl Registration {
    pub fn acquire(
        registry: Arc<ConnectionManager>,
        handle: Arc<ConnectionHandle>,
    ) -> Result<Self, ConnectionError> {
        registry.register(&handle)?;
        Ok(Self {
            registry,
            handle,
            released: false,
        })
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Unregister now instead of at drop
    pub fn release(mut self) {
        self.unregister_once();
    }

    fn unregister_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.unregister(&self.handle);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn handle(group: &str) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(ConnectionHandle::new(group, Some(3), tx, Duration::from_millis(10)))
    }

    #[test]
    fn test_release_unregisters() {
        let registry = Arc::new(ConnectionManager::new());
        let registration = Registration::acquire(registry.clone(), handle("g")).unwrap();
        assert_eq!(registry.connection_count(), 1);

        registration.release();
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.user_connection(3).is_none());
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = Arc::new(ConnectionManager::new());
        {
            let _registration = Registration::acquire(registry.clone(), handle("g")).unwrap();
            assert_eq!(registry.connection_count(), 1);
        }
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_still_unregisters() {
        let registry = Arc::new(ConnectionManager::new());
        let registry_clone = registry.clone();

        let result = tokio::spawn(async move {
            let _registration = Registration::acquire(registry_clone, handle("g")).unwrap();
            panic!("dispatch blew up");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.stats().groups.is_empty());
    }
}
