use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinSet;

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::OrchestrationResult;

pub type WorkItem<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Runs work items with at most `max_in_flight` of them started and not yet
/// finished. Items are admitted in order; a new one starts whenever a running
/// one completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConcurrencyLimiter {
    max_in_flight: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Calls `on_complete` with each item's index as it finishes, in
    /// completion order. Returns once every item has completed. A panicking
    /// item is reported as an [`CoreErrorKind::Internal`] error.
    pub async fn run<T, F>(&self, items: Vec<WorkItem<T>>, mut on_complete: F)
    where
        T: Send + 'static,
        F: FnMut(usize, OrchestrationResult<T>),
    {
        let mut pending = items.into_iter().enumerate();
        let mut in_flight = JoinSet::new();
        let mut indices = HashMap::new();

        loop {
            while in_flight.len() < self.max_in_flight {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                let handle = in_flight.spawn(item);
                indices.insert(handle.id(), index);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, value)) => {
                    if let Some(index) = indices.remove(&id) {
                        on_complete(index, Ok(value));
                    }
                }
                Err(error) => {
                    if let Some(index) = indices.remove(&error.id()) {
                        on_complete(
                            index,
                            Err(CoreError::new(
                                CoreErrorKind::Internal,
                                format!("work item {index} did not complete: {error}"),
                            )),
                        );
                    }
                }
            }
        }
    }
}
