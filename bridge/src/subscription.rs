//! Opaque disposal handles
//!
//! Every register/subscribe/watch/provide call hands back a [`Subscription`].
//! Disposing it undoes the registration. Dropping it does not: a forgotten
//! subscription keeps firing until someone disposes it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Disposer = Box<dyn FnOnce()>;

/// Handle that undoes one registration
///
/// Clones share state, so disposing any clone disposes all of them.
#[derive(Clone)]
pub struct Subscription {
    disposer: Rc<RefCell<Option<Disposer>>>,
}

impl Subscription {
    pub(crate) fn new(disposer: impl FnOnce() + 'static) -> Self {
        Self {
            disposer: Rc::new(RefCell::new(Some(Box::new(disposer)))),
        }
    }

    /// Undo the registration. Calling this more than once is a no-op.
    pub fn dispose(&self) {
        // Take before calling so a disposer that re-enters sees us as inactive
        let disposer = self.disposer.borrow_mut().take();
        if let Some(disposer) = disposer {
            disposer();
        }
    }

    /// Whether `dispose` has not run yet
    pub fn is_active(&self) -> bool {
        self.disposer.borrow().is_some()
    }
}

/// Disposes the wrapped subscription when dropped
///
/// Used by futures that own a registration, so abandoning the future
/// cleans up after itself.
pub(crate) struct DisposeOnDrop(pub(crate) Subscription);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
