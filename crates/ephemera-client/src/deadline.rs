//! Caller-supplied deadlines.
//!
//! Every awaited collaborator call in publish and fetch runs under the
//! caller's deadline. Dropping a timed-out future is the cancellation
//! mechanism, so no store write may straddle an await.

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::error::EkError;

/// Point in time after which an operation is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; operations run until their collaborators return.
    pub const fn none() -> Self {
        Self(None)
    }

    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Deadline at a fixed instant.
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Whether the deadline has already passed.
    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|instant| Instant::now() >= instant)
    }

    /// Run `future` to completion or until the deadline passes.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` if the deadline passes first. The future is dropped.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, EkError> {
        match self.0 {
            Some(instant) => tokio::time::timeout_at(instant, future)
                .await
                .map_err(|_| EkError::DeadlineExceeded),
            None => Ok(future.await),
        }
    }

    /// Fail fast if the deadline has already passed.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` if expired.
    pub fn check(&self) -> Result<(), EkError> {
        if self.is_expired() { Err(EkError::DeadlineExceeded) } else { Ok(()) }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
