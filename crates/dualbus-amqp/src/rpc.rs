//! Outstanding request bookkeeping.
//!
//! Every synchronous AMQP method (open, declare, bind, qos, consume,
//! cancel, close) gets a correlation id and a one-shot completion. AMQP
//! answers requests on a channel in order, so each channel keeps a FIFO
//! of its outstanding ids and a reply completes the oldest request on that
//! channel expecting the reply's method.

use crate::error::ProtocolError;
use crate::method::{Method, MethodId};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

/// Completion signal for one request.
pub type Completion = oneshot::Sender<Result<Method, ProtocolError>>;

/// Identifies an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

#[derive(Debug)]
struct Pending {
    channel: u16,
    expects: MethodId,
    completion: Completion,
}

/// Pending requests keyed by correlation id, ordered per channel.
#[derive(Debug, Default)]
pub struct RequestTable {
    next_id: u64,
    pending: HashMap<CorrelationId, Pending>,
    order: HashMap<u16, VecDeque<CorrelationId>>,
}

impl RequestTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request on `channel` that completes with `expects`.
    pub fn register(
        &mut self,
        channel: u16,
        expects: MethodId,
        completion: Completion,
    ) -> CorrelationId {
        self.next_id += 1;
        let id = CorrelationId(self.next_id);
        self.pending.insert(
            id,
            Pending {
                channel,
                expects,
                completion,
            },
        );
        self.order.entry(channel).or_default().push_back(id);
        id
    }

    /// Complete a request by id. Unknown or already completed ids are
    /// logged and ignored.
    ///
    /// Returns `true` if a pending request was completed.
    pub fn complete(&mut self, id: CorrelationId, result: Result<Method, ProtocolError>) -> bool {
        let Some(pending) = self.pending.remove(&id) else {
            tracing::warn!(correlation_id = id.0, "Completion for unknown request ignored");
            return false;
        };
        if let Some(queue) = self.order.get_mut(&pending.channel) {
            queue.retain(|queued| *queued != id);
            if queue.is_empty() {
                self.order.remove(&pending.channel);
            }
        }
        if pending.completion.send(result).is_err() {
            tracing::debug!(correlation_id = id.0, "Requester went away before completion");
        }
        true
    }

    /// Complete the oldest request on `channel` expecting `reply`'s method.
    /// A reply nobody is waiting for is logged and ignored.
    ///
    /// Returns `true` if a pending request was completed.
    pub fn resolve(&mut self, channel: u16, reply: Method) -> bool {
        let Some(id) = self.oldest(channel, reply.id()) else {
            tracing::warn!(
                channel,
                method = %reply.id(),
                "Unsolicited reply ignored"
            );
            return false;
        };
        self.complete(id, Ok(reply))
    }

    /// Whether a request on `channel` is waiting for `expects`.
    #[must_use]
    pub fn awaiting(&self, channel: u16, expects: MethodId) -> bool {
        self.oldest(channel, expects).is_some()
    }

    fn oldest(&self, channel: u16, expects: MethodId) -> Option<CorrelationId> {
        self.order.get(&channel)?.iter().copied().find(|id| {
            self.pending
                .get(id)
                .is_some_and(|pending| pending.expects == expects)
        })
    }

    /// Fail every request on `channel`.
    ///
    /// Returns the number of requests failed.
    pub fn fail_channel(&mut self, channel: u16, error: &ProtocolError) -> usize {
        let Some(queue) = self.order.remove(&channel) else {
            return 0;
        };
        let mut failed = 0;
        for id in queue {
            if let Some(pending) = self.pending.remove(&id) {
                let _ = pending.completion.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    /// Fail every outstanding request.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&mut self, error: &ProtocolError) -> usize {
        self.order.clear();
        let failed = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.completion.send(Err(error.clone()));
        }
        failed
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
