use std::{fmt, sync::Mutex};

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle returned by every `on`-style registration.
///
/// Dropping the handle keeps the registration alive; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    inner: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::new(f))),
        }
    }

    /// Removes the registration. Calling it more than once has no effect.
    pub fn unsubscribe(&self) {
        let f = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(f) = f {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}
