//! Change notification.
//!
//! Listeners receive every [`ChangeEvent`] the tracker records. Dispatch is
//! sequential in registration order. Each call runs on its own task, bounded
//! by the configured timeout; a listener that fails, panics or overruns is
//! logged and skipped without affecting the tracking result or the other
//! listeners. Closures wrapped in [`FnListener`] run on the blocking pool so
//! synchronous work cannot stall the runtime past the timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use ragversion_core::models::ChangeEvent;

#[async_trait]
pub trait ChangeListener: Send + Sync {
    fn name(&self) -> &str {
        "listener"
    }

    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()>;
}

/// Adapts a synchronous closure into a [`ChangeListener`].
///
/// The closure runs via `spawn_blocking`. When it overruns the dispatch
/// timeout the dispatcher moves on, but the closure itself runs to
/// completion on its blocking thread.
pub struct FnListener<F> {
    name: String,
    f: Arc<F>,
}

impl<F> FnListener<F>
where
    F: Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> ChangeListener for FnListener<F>
where
    F: Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        let f = self.f.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || f(&event))
            .await
            .map_err(|e| anyhow::anyhow!("listener {} did not complete: {}", self.name, e))?
    }
}

/// Emits each event as a structured `tracing` record, with the full JSON
/// payload at debug level.
pub struct LogListener;

#[async_trait]
impl ChangeListener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        tracing::info!(
            path = %event.file_path,
            document_id = %event.document_id,
            version = event.version_number,
            change = %event.change_kind,
            "document changed"
        );
        tracing::debug!(payload = %serde_json::to_string(event)?, "change event");
        Ok(())
    }
}

/// Handle returned by registration, used to remove a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct ListenerSet {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ListenerSet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn add(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener in order.
    pub async fn dispatch(&self, event: &ChangeEvent) {
        let snapshot: Vec<Arc<dyn ChangeListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        if snapshot.is_empty() {
            return;
        }

        let shared = Arc::new(event.clone());
        for listener in snapshot {
            let task_listener = listener.clone();
            let task_event = shared.clone();
            let mut handle =
                tokio::spawn(async move { task_listener.on_change(&task_event).await });

            match tokio::time::timeout(self.timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::error!(
                    listener = listener.name(),
                    document_id = %event.document_id,
                    error = %e,
                    "listener failed"
                ),
                Ok(Err(e)) => tracing::error!(
                    listener = listener.name(),
                    document_id = %event.document_id,
                    error = %e,
                    "listener panicked"
                ),
                Err(_) => {
                    handle.abort();
                    tracing::error!(
                        listener = listener.name(),
                        document_id = %event.document_id,
                        timeout_secs = self.timeout.as_secs_f64(),
                        "listener timed out"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragversion_core::models::{ChangeKind, Metadata};
    use std::sync::Mutex;

    fn event() -> ChangeEvent {
        ChangeEvent {
            document_id: "doc".into(),
            version_id: "ver".into(),
            file_path: "/tmp/a.txt".into(),
            file_name: "a.txt".into(),
            change_kind: ChangeKind::Created,
            version_number: 1,
            content_hash: "h".into(),
            previous_hash: None,
            file_size: 3,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    struct Slow;

    #[async_trait]
    impl ChangeListener for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn on_change(&self, _event: &ChangeEvent) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_isolates_failures_and_timeouts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new(Duration::from_millis(50));

        set.add(Arc::new(FnListener::new("boom", |_e: &ChangeEvent| {
            anyhow::bail!("listener exploded")
        })));
        set.add(Arc::new(Slow));
        let sink = seen.clone();
        set.add(Arc::new(FnListener::new("record", move |e: &ChangeEvent| {
            sink.lock().unwrap().push(e.version_number);
            Ok(())
        })));

        set.dispatch(&event()).await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    struct Panicking;

    #[async_trait]
    impl ChangeListener for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn on_change(&self, _event: &ChangeEvent) -> anyhow::Result<()> {
            panic!("listener bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new(Duration::from_secs(5));
        set.add(Arc::new(Panicking));
        set.add(Arc::new(FnListener::new("closure panic", |_e: &ChangeEvent| {
            panic!("closure bug")
        })));
        let sink = seen.clone();
        set.add(Arc::new(FnListener::new("record", move |e: &ChangeEvent| {
            sink.lock().unwrap().push(e.document_id.clone());
            Ok(())
        })));

        set.dispatch(&event()).await;
        assert_eq!(*seen.lock().unwrap(), vec!["doc".to_string()]);
    }

    #[tokio::test]
    async fn test_blocking_closure_is_bounded_by_timeout() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new(Duration::from_millis(50));
        set.add(Arc::new(FnListener::new("blocking", |_e: &ChangeEvent| {
            std::thread::sleep(Duration::from_millis(600));
            Ok(())
        })));
        let sink = seen.clone();
        set.add(Arc::new(FnListener::new("record", move |e: &ChangeEvent| {
            sink.lock().unwrap().push(e.version_number);
            Ok(())
        })));

        let started = std::time::Instant::now();
        set.dispatch(&event()).await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_closure_does_not_stall_single_threaded_runtime() {
        let set = ListenerSet::new(Duration::from_millis(50));
        set.add(Arc::new(FnListener::new("blocking", |_e: &ChangeEvent| {
            std::thread::sleep(Duration::from_millis(600));
            Ok(())
        })));

        let started = std::time::Instant::now();
        set.dispatch(&event()).await;
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let count = Arc::new(Mutex::new(0));
        let set = ListenerSet::new(Duration::from_secs(1));
        let sink = count.clone();
        let id = set.add(Arc::new(FnListener::new("count", move |_e: &ChangeEvent| {
            *sink.lock().unwrap() += 1;
            Ok(())
        })));
        assert_eq!(set.len(), 1);

        set.dispatch(&event()).await;
        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert!(set.is_empty());
        set.dispatch(&event()).await;
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_event_serializes_with_change_type() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["change_type"], "created");
        assert!(LogListener.on_change(&event()).await.is_ok());
    }
}
