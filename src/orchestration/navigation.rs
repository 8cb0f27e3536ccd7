//! Navigation observation
//!
//! Every programmatic navigation goes through a [`NavigationObserver`], which
//! forwards it to the underlying [`History`] and then notifies the single
//! installed listener. Back/forward traversal is reported as a `Pop`.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use log::debug;
use serde_json::Value;

use crate::{
    core::{
        error::{FrameError, FrameResult},
        traits::History,
    },
    utils::path::Location,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    Push,
    Replace,
    Pop,
}

/// One observed navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationEvent {
    pub kind: NavigationKind,
    /// Location after the navigation.
    pub location: Location,
}

pub type NavigationListener = Arc<dyn Fn(&NavigationEvent) + Send + Sync>;

pub struct NavigationObserver {
    history: Arc<dyn History>,
    listener: Mutex<Option<NavigationListener>>,
}

impl NavigationObserver {
    pub fn new(history: Arc<dyn History>) -> Self {
        Self {
            history,
            listener: Mutex::new(None),
        }
    }

    /// Installs the listener. Only one listener may be installed at a time.
    pub fn install(&self, listener: NavigationListener) -> FrameResult<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(FrameError::Configuration(
                "navigation observer already installed".into(),
            ));
        }
        *slot = Some(listener);
        debug!("Navigation observer installed at {}", self.history.location());
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.slot().is_some()
    }

    /// Detaches the listener. Navigation keeps working but is no longer observed.
    pub fn restore(&self) {
        if self.slot().take().is_some() {
            debug!("Navigation observer restored");
        }
    }

    pub fn location(&self) -> Location {
        self.history.location()
    }

    pub fn state(&self) -> Option<Value> {
        self.history.state()
    }

    pub fn push_state(&self, state: Option<Value>, url: &str) {
        self.history.push_state(state, url);
        self.notify(NavigationKind::Push);
    }

    pub fn replace_state(&self, state: Option<Value>, url: &str) {
        self.history.replace_state(state, url);
        self.notify(NavigationKind::Replace);
    }

    /// Traverses the history; returns `false` when the target entry does not exist.
    pub fn go(&self, delta: i32) -> bool {
        if delta == 0 || !self.history.go(delta) {
            return false;
        }
        self.notify(NavigationKind::Pop);
        true
    }

    pub fn back(&self) -> bool {
        self.go(-1)
    }

    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Reports a traversal performed outside the observer, e.g. by the user agent.
    pub fn pop(&self) {
        self.notify(NavigationKind::Pop);
    }

    fn notify(&self, kind: NavigationKind) {
        // the listener runs without the slot lock so it may navigate itself
        let listener = self.slot().clone();
        if let Some(listener) = listener {
            listener(&NavigationEvent {
                kind,
                location: self.history.location(),
            });
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<NavigationListener>> {
        self.listener.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl fmt::Debug for NavigationObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationObserver")
            .field("location", &self.history.location())
            .field("installed", &self.is_installed())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    location: Location,
    state: Option<Value>,
}

#[derive(Debug)]
struct Entries {
    stack: Vec<Entry>,
    index: usize,
}

/// In-process session history.
#[derive(Debug)]
pub struct MemoryHistory {
    entries: Mutex<Entries>,
}

impl MemoryHistory {
    pub fn new(initial_url: &str) -> Self {
        Self {
            entries: Mutex::new(Entries {
                stack: vec![Entry {
                    location: Location::parse(initial_url),
                    state: None,
                }],
                index: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().stack.is_empty()
    }

    pub fn index(&self) -> usize {
        self.lock().index
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new("/")
    }
}

/// Resolves `url` the way a document resolves a same-origin navigation target.
fn resolve(current: &Location, url: &str) -> Location {
    if let Some(hash) = url.strip_prefix('#') {
        return Location {
            hash: format!("#{hash}"),
            ..current.clone()
        };
    }
    if url.starts_with('?') {
        return Location::parse(&format!("{}{}", current.pathname, url));
    }
    Location::parse(url)
}

impl History for MemoryHistory {
    fn location(&self) -> Location {
        let entries = self.lock();
        entries.stack[entries.index].location.clone()
    }

    fn state(&self) -> Option<Value> {
        let entries = self.lock();
        entries.stack[entries.index].state.clone()
    }

    fn push_state(&self, state: Option<Value>, url: &str) {
        let mut entries = self.lock();
        let location = resolve(&entries.stack[entries.index].location, url);
        let next = entries.index + 1;
        entries.stack.truncate(next);
        entries.stack.push(Entry { location, state });
        entries.index = next;
    }

    fn replace_state(&self, state: Option<Value>, url: &str) {
        let mut entries = self.lock();
        let index = entries.index;
        let location = resolve(&entries.stack[index].location, url);
        entries.stack[index] = Entry { location, state };
    }

    fn go(&self, delta: i32) -> bool {
        let mut entries = self.lock();
        let target = entries.index as i64 + delta as i64;
        if target < 0 || target >= entries.stack.len() as i64 {
            return false;
        }
        entries.index = target as usize;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<NavigationEvent>>>, NavigationListener) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (
            events,
            Arc::new(move |event: &NavigationEvent| sink.lock().unwrap().push(event.clone())),
        )
    }

    #[test]
    fn test_memory_history_stack() {
        let history = MemoryHistory::new("http://host.local/a");
        history.push_state(Some(json!({"n": 1})), "/b?x=1");
        history.push_state(None, "/c");
        assert_eq!(history.location().pathname, "/c");

        assert!(history.go(-2));
        assert_eq!(history.location().pathname, "/a");
        assert!(!history.go(-1));

        // pushing drops the forward entries
        history.push_state(None, "/d");
        assert_eq!(history.len(), 2);
        assert!(!history.go(1));
        assert!(history.go(-1));
        assert_eq!(history.location().pathname, "/a");
    }

    #[test]
    fn test_replace_keeps_state_slot_per_entry() {
        let history = MemoryHistory::new("/a");
        history.push_state(Some(json!("keep")), "/b");
        history.replace_state(history.state(), "#/inner");

        let location = history.location();
        assert_eq!(location.pathname, "/b");
        assert_eq!(location.hash, "#/inner");
        assert_eq!(history.state(), Some(json!("keep")));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_observer_notifies_every_navigation() {
        let observer = NavigationObserver::new(Arc::new(MemoryHistory::new("/")));
        let (events, listener) = recorder();
        observer.install(listener).unwrap();

        observer.push_state(None, "/a");
        observer.replace_state(None, "/b");
        observer.push_state(None, "/c");
        assert!(observer.back());

        let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![NavigationKind::Push, NavigationKind::Replace, NavigationKind::Push, NavigationKind::Pop]
        );
        assert_eq!(events.lock().unwrap()[3].location.pathname, "/b");
    }

    #[test]
    fn test_install_once_and_restore() {
        let observer = NavigationObserver::new(Arc::new(MemoryHistory::default()));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        observer
            .install(Arc::new(move |_: &NavigationEvent| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(observer.install(Arc::new(|_: &NavigationEvent| {})).is_err());

        observer.push_state(None, "/x");
        observer.restore();
        observer.push_state(None, "/y");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(observer.location().pathname, "/y");
        // can be installed again after a restore
        assert!(observer.install(Arc::new(|_: &NavigationEvent| {})).is_ok());
    }
}
