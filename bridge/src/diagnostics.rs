//! Callback isolation
//!
//! Subscriber, watcher and listener callbacks run behind `catch_unwind` so a
//! failing callback never halts the remaining fan-out or reaches the caller
//! that triggered delivery.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{CallbackKind, SubscriberError};

/// Receiver for callback failures
pub(crate) type DiagnosticSink = Rc<dyn Fn(SubscriberError)>;

/// Run a callback, converting a panic into a [`SubscriberError`]
pub(crate) fn invoke_isolated<F: FnOnce()>(target: &str, kind: CallbackKind, f: F) -> Result<(), SubscriberError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| SubscriberError {
        target: target.to_string(),
        kind,
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_isolated_ok() {
        let mut ran = false;
        let result = invoke_isolated("chat", CallbackKind::Subscriber, || ran = true);
        assert!(result.is_ok());
        assert!(ran);
    }

    #[test]
    fn test_invoke_isolated_catches_str_panic() {
        let err = invoke_isolated("chat", CallbackKind::Subscriber, || panic!("boom")).unwrap_err();
        assert_eq!(err.target, "chat");
        assert_eq!(err.kind, CallbackKind::Subscriber);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_invoke_isolated_catches_formatted_panic() {
        let err = invoke_isolated("a.b", CallbackKind::Watcher, || panic!("bad value {}", 7)).unwrap_err();
        assert_eq!(err.message, "bad value 7");
    }

    #[test]
    fn test_invoke_isolated_opaque_payload() {
        let err = invoke_isolated("a.b", CallbackKind::Listener, || std::panic::panic_any(42u32)).unwrap_err();
        assert_eq!(err.message, "callback panicked");
    }
}
