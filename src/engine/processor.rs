//! The task processor boundary: what a worker calls for each item.

use std::future::Future;

use crate::error::ProcessError;
use crate::model::WorkItem;

/// A failed attempt, as reported to [`TaskProcessor::on_failure`].
#[derive(Debug, Clone)]
pub struct Failure {
    pub error: ProcessError,
    /// 1-based number of the attempt that failed.
    pub attempt: u32,
    /// Whether the worker will try this item again.
    pub will_retry: bool,
}

/// Performs the slow, fallible work for one item.
///
/// `process` must not return `Ok` until every side effect (every delivery)
/// has completed. Implementations are shared by all workers and called
/// concurrently for different keys, never for the same key.
pub trait TaskProcessor: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    fn process(
        &self,
        item: &WorkItem<Self::Payload>,
    ) -> impl Future<Output = Result<(), ProcessError>> + Send;

    /// Called exactly once per failed attempt, after the attempt and before
    /// any retry. The default does nothing.
    fn on_failure(
        &self,
        item: &WorkItem<Self::Payload>,
        failure: &Failure,
    ) -> impl Future<Output = ()> + Send {
        let _ = (item, failure);
        async {}
    }
}
