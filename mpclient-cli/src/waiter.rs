//! Polling a collection until an expected membership change shows up.

use std::time::Duration;

use mpclient_core::{
    CollectionRef, ExpectedChange, MembershipSnapshot, ObjectQuery, QueryError, QuerySpec,
};
use serde::Serialize;
use tokio::time::Instant;

use crate::shutdown::ShutdownSignal;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound for both the timeout and the poll interval.
pub const MAX_WAIT: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WaitError {
    /// Every poll failed, so there is no snapshot to report.
    #[error("no membership snapshot obtained after {polls} polls")]
    NoSnapshot {
        polls: u32,
        #[source]
        source: QueryError,
    },

    #[error("cancelled before the first membership snapshot")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    Converged,
    /// The change was not seen in time. Not an error: the refresh may be slow.
    TimedOut,
    Cancelled,
}

/// Outcome of a wait, with the last snapshot observed.
#[derive(Debug, Clone, Serialize)]
pub struct WaitReport {
    pub status: WaitStatus,
    pub snapshot: MembershipSnapshot,
    pub polls: u32,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Fixed-interval poller with a hard deadline.
#[derive(Debug, Clone, Copy)]
pub struct MembershipWaiter {
    interval: Duration,
    timeout: Duration,
}

impl Default for MembershipWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT)
    }
}

impl MembershipWaiter {
    /// A zero interval is raised to one millisecond. Both values are capped
    /// at [`MAX_WAIT`].
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.clamp(Duration::from_millis(1), MAX_WAIT),
            timeout: timeout.min(MAX_WAIT),
        }
    }

    /// Poll `collection` until `expected` holds, the timeout passes, or
    /// `shutdown` fires.
    ///
    /// The first poll is immediate. A failed poll is logged and retried at
    /// the next tick. No poll outlives the deadline by more than one interval.
    ///
    /// # Errors
    ///
    /// Only when no snapshot was ever obtained: `WaitError::NoSnapshot` with
    /// the last query error, or `WaitError::Cancelled`.
    pub async fn wait(
        &self,
        query: &dyn ObjectQuery,
        collection: &CollectionRef,
        expected: &ExpectedChange,
        shutdown: &ShutdownSignal,
    ) -> Result<WaitReport, WaitError> {
        let spec = collection.members_query();
        let start = Instant::now();
        let deadline = later(start, self.timeout);

        let mut last: Option<MembershipSnapshot> = None;
        let mut last_error: Option<QueryError> = None;
        let mut polls = 0u32;

        let status = loop {
            polls += 1;
            let poll_deadline = deadline.max(later(Instant::now(), self.interval));
            let polled = tokio::select! {
                biased;
                () = shutdown.cancelled() => break WaitStatus::Cancelled,
                polled = tokio::time::timeout_at(poll_deadline, poll(query, &spec)) => polled,
            };

            match polled {
                Ok(Ok(snapshot)) => {
                    log_change(collection, last.as_ref(), &snapshot, polls);
                    let converged = snapshot.satisfies(expected);
                    last = Some(snapshot);
                    if converged {
                        break WaitStatus::Converged;
                    }
                }
                Ok(Err(error)) => {
                    tracing::warn!(collection = %collection, poll = polls, error = %error, "membership poll failed");
                    last_error = Some(error);
                }
                Err(elapsed) => {
                    tracing::warn!(collection = %collection, poll = polls, "membership poll timed out");
                    last_error = Some(QueryError::Backend(Box::new(elapsed)));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break WaitStatus::TimedOut;
            }
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break WaitStatus::Cancelled,
                () = tokio::time::sleep(self.interval.min(deadline - now)) => {}
            }
        };

        let elapsed = start.elapsed();
        let Some(snapshot) = last else {
            return Err(match last_error {
                Some(source) if status != WaitStatus::Cancelled => {
                    WaitError::NoSnapshot { polls, source }
                }
                _ => WaitError::Cancelled,
            });
        };

        tracing::info!(
            collection = %collection,
            status = ?status,
            polls,
            members = snapshot.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "membership wait finished"
        );
        Ok(WaitReport {
            status,
            snapshot,
            polls,
            elapsed,
        })
    }
}

fn later(from: Instant, by: Duration) -> Instant {
    from.checked_add(by)
        .or_else(|| from.checked_add(MAX_WAIT))
        .unwrap_or(from)
}

async fn poll(query: &dyn ObjectQuery, spec: &QuerySpec) -> Result<MembershipSnapshot, QueryError> {
    let rows = query.query(spec).await?;
    MembershipSnapshot::from_rows(&rows)
}

fn log_change(
    collection: &CollectionRef,
    previous: Option<&MembershipSnapshot>,
    current: &MembershipSnapshot,
    poll: u32,
) {
    let Some(previous) = previous else {
        tracing::debug!(collection = %collection, members = current.len(), "initial membership");
        return;
    };
    let diff = previous.diff(current);
    if diff.is_empty() {
        tracing::debug!(collection = %collection, poll, "membership unchanged");
        return;
    }
    for record in &diff.added {
        tracing::info!(collection = %collection, resource_id = record.resource_id, name = %record.name, "member added");
    }
    for record in &diff.removed {
        tracing::info!(collection = %collection, resource_id = record.resource_id, name = %record.name, "member removed");
    }
}
