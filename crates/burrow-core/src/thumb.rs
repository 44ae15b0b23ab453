//! Resumable operations.
//!
//! A [`Thumb`] wraps a job that performs one bounded increment of work per
//! [`Thumb::do_more`] call and returns immediately. The caller's thread is
//! the only execution context; cancellation is synchronous and releases the
//! job's resources on the spot (jobs that parked store state, like an
//! in-flight commit, restore it from their `Drop` impl).
//!
//! Progress numbers are advisory: `current/total` give a rough shape of the
//! work, not a precise accounting.

use burrow_error::{BurrowError, Result};
use burrow_types::Env;

/// Snapshot of a thumb's progress, returned by every `do_more` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Work increments completed so far (advisory).
    pub current: u64,
    /// Estimated total increments (advisory; may change between calls).
    pub total: u64,
    /// The operation has finished; its result is available.
    pub done: bool,
    /// The operation was cancelled or failed and can never complete.
    pub broken: bool,
}

/// One step's outcome, reported by a job to its thumb.
pub(crate) enum Step<T> {
    /// More work remains.
    Progress { current: u64, total: u64 },
    /// The job finished and produced its output.
    Done(T),
}

/// A resumable unit of work driven by [`Thumb::do_more`].
pub(crate) trait Job {
    type Output;

    /// Perform one bounded increment of work.
    fn step(&mut self, env: &Env) -> Result<Step<Self::Output>>;
}

/// Handle for a long-running operation, polled by the caller.
pub struct Thumb<T> {
    job: Option<Box<dyn Job<Output = T>>>,
    progress: Progress,
    result: Option<T>,
}

impl<T> Thumb<T> {
    pub(crate) fn new(job: impl Job<Output = T> + 'static) -> Self {
        Self {
            job: Some(Box::new(job)),
            progress: Progress::default(),
            result: None,
        }
    }

    /// A thumb that was already complete when it was created.
    pub(crate) fn ready(value: T) -> Self {
        Self {
            job: None,
            progress: Progress {
                current: 1,
                total: 1,
                done: true,
                broken: false,
            },
            result: Some(value),
        }
    }

    /// Perform one bounded increment of work.
    ///
    /// Calling this on a finished or broken thumb is protocol misuse and
    /// returns an error. A job failure marks the thumb broken; the job is
    /// dropped (releasing its resources) and the failure is recorded on the
    /// env and returned. Jobs report errors raw; this is the one place they
    /// reach the env's counters.
    pub fn do_more(&mut self, env: &Env) -> Result<Progress> {
        if self.progress.broken {
            return Err(crate::raise(env, BurrowError::ThumbBroken));
        }
        if self.progress.done {
            return Err(crate::raise(env, BurrowError::ThumbFinished));
        }
        let Some(job) = self.job.as_mut() else {
            return Err(crate::raise(env, BurrowError::internal("thumb has no job")));
        };
        match job.step(env) {
            Ok(Step::Progress { current, total }) => {
                self.progress = Progress {
                    current,
                    total,
                    done: false,
                    broken: false,
                };
                Ok(self.progress)
            }
            Ok(Step::Done(value)) => {
                self.result = Some(value);
                self.progress.current = self.progress.total.max(self.progress.current + 1);
                self.progress.total = self.progress.current;
                self.progress.done = true;
                self.job = None;
                Ok(self.progress)
            }
            Err(err) => {
                self.progress.broken = true;
                self.job = None;
                Err(crate::raise(env, err))
            }
        }
    }

    /// Cancel the operation: marks the thumb broken and releases its
    /// resources immediately. A broken thumb can never complete. Cancelling
    /// an already-finished thumb is a no-op.
    pub fn cancel(&mut self) {
        if self.progress.done {
            return;
        }
        self.progress.broken = true;
        self.job = None;
    }

    /// Latest progress snapshot without doing any work.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.progress.done
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.progress.broken
    }

    /// Take the finished result, if the thumb is done and it was not taken
    /// already.
    pub fn take_result(&mut self) -> Option<T> {
        self.result.take()
    }

    /// Drive the thumb to completion and return its result.
    ///
    /// Convenience for callers that do not need incremental polling.
    pub fn finish(mut self, env: &Env) -> Result<T> {
        while !self.progress.done {
            self.do_more(env)?;
        }
        self.result
            .take()
            .ok_or_else(|| crate::raise(env, BurrowError::internal("thumb finished without result")))
    }
}

impl<T> std::fmt::Debug for Thumb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thumb")
            .field("progress", &self.progress)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}
