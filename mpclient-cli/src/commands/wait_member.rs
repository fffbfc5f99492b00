//! `wait-member`: wait for a collection refresh to add or remove a resource.

use std::time::Duration;

use mpclient_core::{CollectionRef, ExpectedChange, ObjectQuery};

use super::Session;
use crate::error::ClientError;
use crate::remote_query::HttpObjectQuery;
use crate::shutdown::ShutdownSignal;
use crate::waiter::{MembershipWaiter, WaitReport};

/// The query `wait-member` polls with, as sent to the server.
#[must_use]
pub fn describe_query(collection: &CollectionRef) -> String {
    collection.members_query().to_query_string()
}

/// Poll over the management point's query endpoint.
///
/// `timeout` overrides the configured wait timeout.
///
/// # Errors
///
/// See [`MembershipWaiter::wait`].
pub async fn wait_member(
    session: &Session,
    collection: &CollectionRef,
    expected: &ExpectedChange,
    timeout: Option<Duration>,
    shutdown: &ShutdownSignal,
) -> Result<WaitReport, ClientError> {
    let query = HttpObjectQuery::new(&session.transport);
    wait_with(session, &query, collection, expected, timeout, shutdown).await
}

/// Same as [`wait_member`] against any query backend.
///
/// # Errors
///
/// See [`MembershipWaiter::wait`].
pub async fn wait_with(
    session: &Session,
    query: &dyn ObjectQuery,
    collection: &CollectionRef,
    expected: &ExpectedChange,
    timeout: Option<Duration>,
    shutdown: &ShutdownSignal,
) -> Result<WaitReport, ClientError> {
    let waiter = MembershipWaiter::new(
        session.settings.poll_interval,
        timeout.unwrap_or(session.settings.wait_timeout),
    );
    tracing::info!(
        collection = %collection,
        expected = ?expected,
        query = %describe_query(collection),
        "waiting for membership change"
    );
    Ok(waiter.wait(query, collection, expected, shutdown).await?)
}
