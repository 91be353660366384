//! Panic containment for plugin-supplied callbacks
//!
//! Listeners, subscribers and reducers are written by plugins. A panic in
//! one of them is turned into an error so the caller can log it and move
//! on to the next callback.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Text of a panic payload, when it carries one.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked without a message".to_string()
    }
}

/// Run `f`, reporting a panic as `Err`.
pub fn call_guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_becomes_error() {
        let err = call_guarded::<()>(|| panic!("listener bug")).unwrap_err();
        assert_eq!(err.to_string(), "panicked: listener bug");

        let owned = call_guarded::<()>(|| panic!("{} bug", "formatted")).unwrap_err();
        assert_eq!(owned.to_string(), "panicked: formatted bug");
    }

    #[test]
    fn test_results_pass_through() {
        assert_eq!(call_guarded(|| Ok(3)).unwrap(), 3);
        let err = call_guarded::<()>(|| Err(anyhow::anyhow!("plain failure"))).unwrap_err();
        assert_eq!(err.to_string(), "plain failure");
    }
}
