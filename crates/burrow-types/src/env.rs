//! Per-call context (`Env`).
//!
//! An `Env` is an explicit context value threaded through every engine call.
//! It carries the error/warning counters and an optional condition hook that
//! is invoked synchronously on each increment. One `Env` per calling thread;
//! the type is deliberately not `Sync` (interior `Cell`/`RefCell` state), so
//! sharing one across threads is a compile-time error.
//!
//! Counters accumulate: callers clear them with [`Env::clear_counters`]
//! before re-entering the API when they want per-operation counts.

use std::cell::{Cell, RefCell};
use std::fmt;

/// Condition severity reported to the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Recoverable oddity; the operation still completed.
    Warning,
    /// The operation failed and returned an error to its caller.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

type Hook = Box<dyn FnMut(Severity, &str)>;

/// Per-thread call context: error/warning counters plus an optional hook.
#[derive(Default)]
pub struct Env {
    errors: Cell<u64>,
    warnings: Cell<u64>,
    hook: RefCell<Option<Hook>>,
}

impl Env {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.get()
    }

    #[must_use]
    pub fn warning_count(&self) -> u64 {
        self.warnings.get()
    }

    /// Reset both counters to zero. Does not touch the hook.
    pub fn clear_counters(&self) {
        self.errors.set(0);
        self.warnings.set(0);
    }

    /// Install a hook invoked synchronously on every condition increment.
    ///
    /// The hook may inspect the condition but cannot suppress it; the counter
    /// has already moved and the error value is still returned to the caller.
    pub fn set_hook(&self, hook: impl FnMut(Severity, &str) + 'static) {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Remove any installed hook.
    pub fn clear_hook(&self) {
        *self.hook.borrow_mut() = None;
    }

    /// Record an error condition. Called by the engine when an operation is
    /// about to return `Err`.
    pub fn note_error(&self, condition: &dyn fmt::Display) {
        self.errors.set(self.errors.get().wrapping_add(1));
        self.fire(Severity::Error, condition);
    }

    /// Record a warning condition for an operation that still completed.
    pub fn note_warning(&self, condition: &dyn fmt::Display) {
        self.warnings.set(self.warnings.get().wrapping_add(1));
        self.fire(Severity::Warning, condition);
    }

    fn fire(&self, severity: Severity, condition: &dyn fmt::Display) {
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(severity, &condition.to_string());
        }
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("errors", &self.errors.get())
            .field("warnings", &self.warnings.get())
            .field("hook", &self.hook.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn counters_start_at_zero() {
        let env = Env::new();
        assert_eq!(env.error_count(), 0);
        assert_eq!(env.warning_count(), 0);
    }

    #[test]
    fn note_increments_and_clear_resets() {
        let env = Env::new();
        env.note_error(&"boom");
        env.note_error(&"boom again");
        env.note_warning(&"odd");
        assert_eq!(env.error_count(), 2);
        assert_eq!(env.warning_count(), 1);
        env.clear_counters();
        assert_eq!(env.error_count(), 0);
        assert_eq!(env.warning_count(), 0);
    }

    #[test]
    fn hook_sees_each_condition() {
        let env = Env::new();
        let seen: Rc<RefCell<Vec<(Severity, String)>>> = Rc::default();
        let sink = Rc::clone(&seen);
        env.set_hook(move |sev, msg| sink.borrow_mut().push((sev, msg.to_owned())));

        env.note_warning(&"w1");
        env.note_error(&"e1");

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (Severity::Warning, "w1".to_owned()));
        assert_eq!(seen[1], (Severity::Error, "e1".to_owned()));
    }

    #[test]
    fn clear_hook_stops_delivery() {
        let env = Env::new();
        let seen = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&seen);
        env.set_hook(move |_, _| sink.set(sink.get() + 1));
        env.note_error(&"one");
        env.clear_hook();
        env.note_error(&"two");
        assert_eq!(seen.get(), 1);
        assert_eq!(env.error_count(), 2);
    }
}
