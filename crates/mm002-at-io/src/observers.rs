//! Listener registry for inbound protocol lines.
//!
//! Protocol modules register a [`ListenerHandle`] to watch every line the
//! engine frames: unsolicited events, solicited data lines, traces and the
//! normalized terminal markers. Notification is synchronous and follows
//! registration order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mm002_core::Command;

use crate::protocol::LineKind;

/// One line as delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent<'a> {
    /// Line text without CR/LF. Terminal replies carry the normalized
    /// marker (`OK`, `ERROR`, `ERROR NOACK`).
    pub line: &'a str,
    pub kind: LineKind,
    /// The command that was in flight when the line arrived.
    pub command: Option<Command>,
}

/// Receives [`LineEvent`]s. Implemented for any suitable closure.
pub trait LineListener: Send + Sync {
    fn on_line(&self, event: &LineEvent<'_>);
}

impl<F> LineListener for F
where
    F: Fn(&LineEvent<'_>) + Send + Sync,
{
    fn on_line(&self, event: &LineEvent<'_>) {
        self(event)
    }
}

/// Shared handle to a registered listener. Identity is the allocation.
pub type ListenerHandle = Arc<dyn LineListener>;

/// Wrap a closure as a [`ListenerHandle`].
pub fn listener<F>(f: F) -> ListenerHandle
where
    F: Fn(&LineEvent<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_listener(a: &ListenerHandle, b: &ListenerHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Ordered set of listeners.
///
/// `notify_all` iterates over a snapshot, so a listener may register or
/// unregister handles (including itself) while being notified. Changes take
/// effect from the next notification.
#[derive(Default)]
pub struct ObserverRegistry {
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ListenerHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `handle` at the end. Returns `false` if it was already present.
    pub fn register(&self, handle: &ListenerHandle) -> bool {
        let mut listeners = self.lock();
        if listeners.iter().any(|h| same_listener(h, handle)) {
            return false;
        }
        listeners.push(Arc::clone(handle));
        true
    }

    /// Remove `handle`. Returns `false` if it was not registered.
    pub fn unregister(&self, handle: &ListenerHandle) -> bool {
        let mut listeners = self.lock();
        match listeners.iter().position(|h| same_listener(h, handle)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: &ListenerHandle) -> bool {
        self.lock().iter().any(|h| same_listener(h, handle))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn notify_all(&self, event: &LineEvent<'_>) {
        let snapshot: Vec<ListenerHandle> = self.lock().clone();
        for handle in &snapshot {
            handle.on_line(event);
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(line: &str) -> LineEvent<'_> {
        LineEvent {
            line,
            kind: LineKind::Trace,
            command: None,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> ListenerHandle {
        let log = Arc::clone(log);
        listener(move |e: &LineEvent<'_>| log.lock().unwrap().push(format!("{tag}:{}", e.line)))
    }

    #[test]
    fn notifies_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let a = recorder(&log, "a");
        let b = recorder(&log, "b");
        registry.register(&a);
        registry.register(&b);

        registry.notify_all(&event("+MAC: RDR,SF7BW125"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:+MAC: RDR,SF7BW125", "b:+MAC: RDR,SF7BW125"]
        );
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = listener(move |_: &LineEvent<'_>| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.register(&handle));
        assert!(!registry.register(&handle));
        assert_eq!(registry.len(), 1);
        registry.notify_all(&event("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_unknown_is_a_no_op() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let a = recorder(&log, "a");
        assert!(!registry.unregister(&a));
        registry.register(&a);
        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn distinct_closures_are_distinct_handles() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let a = recorder(&log, "a");
        let a_again = recorder(&log, "a");
        registry.register(&a);
        registry.register(&a_again);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&a_again));
    }

    #[test]
    fn listener_can_remove_itself_during_notification() {
        let registry = Arc::new(ObserverRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let (r, c, s) = (Arc::clone(&registry), Arc::clone(&calls), Arc::clone(&slot));
        let once = listener(move |_: &LineEvent<'_>| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = s.lock().unwrap().take() {
                r.unregister(&me);
            }
        });
        *slot.lock().unwrap() = Some(Arc::clone(&once));

        let log = Arc::new(Mutex::new(Vec::new()));
        let after = recorder(&log, "after");
        registry.register(&once);
        registry.register(&after);

        registry.notify_all(&event("first"));
        registry.notify_all(&event("second"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec!["after:first", "after:second"]);
    }

    #[test]
    fn listener_removing_a_later_one_still_lets_snapshot_finish() {
        let registry = Arc::new(ObserverRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim = recorder(&log, "victim");

        let (r, v) = (Arc::clone(&registry), Arc::clone(&victim));
        let remover = listener(move |_: &LineEvent<'_>| {
            r.unregister(&v);
        });
        registry.register(&remover);
        registry.register(&victim);

        registry.notify_all(&event("one"));
        registry.notify_all(&event("two"));
        assert_eq!(*log.lock().unwrap(), vec!["victim:one"]);
        assert_eq!(registry.len(), 1);
    }
}
