//! Completion Notifier
//!
//! Delivers one event per finalized session to registered observers, then
//! runs the server-side completion hook, whose answer may replace the
//! response of the request that completed the upload.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use uuid::Uuid;

use super::types::{StorageObject, UploadMetadata};

/// Default number of completions kept by [`CompletedUploads`]
pub const DEFAULT_COMPLETED_HISTORY: usize = 100;

/// Emitted once when a session is finalized
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub session_id: Uuid,
    /// `{epoch-ms}-{stem}.{ext}`, as stored
    pub display_name: String,
    pub object: StorageObject,
    pub metadata: UploadMetadata,
    pub completed_at: DateTime<Utc>,
}

/// Receives completion events
pub trait CompletionObserver: Send + Sync {
    fn on_complete(&self, event: &CompletionEvent);
}

impl<F> CompletionObserver for F
where
    F: Fn(&CompletionEvent) + Send + Sync,
{
    fn on_complete(&self, event: &CompletionEvent) {
        self(event)
    }
}

/// Response override returned by a completion hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Server-side hook run after a session is finalized
pub trait CompletionHook: Send + Sync {
    /// `None` keeps the protocol's default response
    fn on_upload_finish(&self, event: &CompletionEvent) -> Option<HookResponse>;
}

/// Logs the stored object and answers `200 {"message":"Upload finished"}`
pub struct DefaultCompletionHook;

impl CompletionHook for DefaultCompletionHook {
    fn on_upload_finish(&self, event: &CompletionEvent) -> Option<HookResponse> {
        tracing::info!(
            session_id = %event.session_id,
            name = %event.display_name,
            key = %event.object.key,
            size = event.object.size,
            sha256 = %event.object.sha256,
            "Upload finished"
        );

        Some(HookResponse {
            status: StatusCode::OK,
            body: serde_json::json!({ "message": "Upload finished" }).to_string(),
        })
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Clone)]
pub struct CompletionNotifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    observers: RwLock<Vec<Arc<dyn CompletionObserver>>>,
    hook: RwLock<Option<Arc<dyn CompletionHook>>>,
}

impl CompletionNotifier {
    /// Notifier with no observers and no hook
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                observers: RwLock::new(Vec::new()),
                hook: RwLock::new(None),
            }),
        }
    }

    /// Notifier with the default logging hook installed
    pub fn with_default_hook() -> Self {
        let notifier = Self::new();
        notifier.set_hook(Arc::new(DefaultCompletionHook));
        notifier
    }

    pub fn register(&self, observer: Arc<dyn CompletionObserver>) {
        self.inner.observers.write().push(observer);
    }

    pub fn set_hook(&self, hook: Arc<dyn CompletionHook>) {
        *self.inner.hook.write() = Some(hook);
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    /// Deliver an event. With no observer registered the event is dropped.
    pub fn notify(&self, event: &CompletionEvent) -> Option<HookResponse> {
        let observers = self.inner.observers.read().clone();
        if observers.is_empty() {
            tracing::debug!(
                session_id = %event.session_id,
                "No completion observer registered, dropping event"
            );
        }
        for observer in observers {
            observer.on_complete(event);
        }

        let hook = self.inner.hook.read().clone();
        hook.and_then(|hook| hook.on_upload_finish(event))
    }
}

impl Default for CompletionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Completed Uploads
// ============================================================================

/// A finished upload as shown in the completed list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    pub session_id: Uuid,
    pub name: String,
    pub original_name: Option<String>,
    pub size: u64,
    pub content_type: Option<String>,
    pub sha256: String,
    pub completed_at: DateTime<Utc>,
}

/// Observer keeping the most recent completions, newest first
pub struct CompletedUploads {
    entries: Mutex<VecDeque<CompletedUpload>>,
    capacity: usize,
}

impl CompletedUploads {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn list(&self) -> Vec<CompletedUpload> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompletedUploads {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_HISTORY)
    }
}

impl CompletionObserver for CompletedUploads {
    fn on_complete(&self, event: &CompletionEvent) {
        let mut entries = self.entries.lock();
        entries.push_front(CompletedUpload {
            session_id: event.session_id,
            name: event.display_name.clone(),
            original_name: event.metadata.filename().map(str::to_string),
            size: event.object.size,
            content_type: event.object.content_type.clone(),
            sha256: event.object.sha256.clone(),
            completed_at: event.completed_at,
        });
        entries.truncate(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(name: &str) -> CompletionEvent {
        CompletionEvent {
            session_id: Uuid::new_v4(),
            display_name: name.to_string(),
            object: StorageObject {
                key: format!("objects/{}", name),
                name: name.to_string(),
                size: 3,
                sha256: "00".repeat(32),
                content_type: Some("image/png".to_string()),
                created_at: Utc::now(),
            },
            metadata: UploadMetadata::new().with("filename", "cat.png"),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_observers_receive_event() {
        let notifier = CompletionNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        notifier.register(Arc::new(move |_: &CompletionEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(notifier.notify(&event("1-cat.png")), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_without_observer_is_dropped() {
        let notifier = CompletionNotifier::new();
        assert_eq!(notifier.observer_count(), 0);
        assert_eq!(notifier.notify(&event("1-cat.png")), None);

        // Observers registered later do not see earlier events
        let later = Arc::new(CompletedUploads::default());
        notifier.register(later.clone());
        assert!(later.is_empty());
    }

    #[test]
    fn test_default_hook_overrides_response() {
        let notifier = CompletionNotifier::with_default_hook();
        let response = notifier.notify(&event("1-cat.png")).unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, r#"{"message":"Upload finished"}"#);
    }

    #[test]
    fn test_completed_uploads_is_bounded() {
        let completed = CompletedUploads::new(2);
        completed.on_complete(&event("1-a.png"));
        completed.on_complete(&event("2-b.png"));
        completed.on_complete(&event("3-c.png"));

        let names: Vec<_> = completed.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["3-c.png", "2-b.png"]);
        assert_eq!(completed.list()[0].original_name.as_deref(), Some("cat.png"));
    }
}
