use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::ServiceError;

/// How a scripted call fails.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    /// Fail without applying the call.
    Fail(ServiceError),
    /// Apply the call, then lose the response.
    ApplyThenFail(ServiceError),
}

/// Failures an in-memory service returns before behaving normally.
#[derive(Debug, Default)]
pub(crate) struct Script {
    queued: VecDeque<Scripted>,
    always: Option<ServiceError>,
}

impl Script {
    pub(crate) fn push(&mut self, scripted: Scripted) {
        self.queued.push_back(scripted);
    }

    pub(crate) fn set_always(&mut self, error: Option<ServiceError>) {
        self.always = error;
    }

    pub(crate) fn next(&mut self) -> Option<Scripted> {
        self.queued
            .pop_front()
            .or_else(|| self.always.clone().map(Scripted::Fail))
    }
}

/// Locks a mutex, recovering the data if a test thread panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
