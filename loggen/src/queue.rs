//! Pending on-demand generation requests.
//!
//! Requests are served round robin: every pass over the queue produces at
//! most one record per request, in arrival order.

use std::collections::VecDeque;

use loggen_payload::{Options, Record, Registry};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// A request for `count` events of one type and format.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// Event type
    #[serde(rename = "type")]
    pub kind: String,
    /// Event format
    pub format: String,
    /// Events still to produce
    pub count: u64,
    /// Prefix each event with its length
    #[serde(default)]
    pub framed: bool,
}

/// FIFO of pending [`Request`]s.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<Request>,
}

impl RequestQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request to the back of the queue.
    pub fn enqueue(&mut self, request: Request) {
        self.pending.push_back(request);
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The pending requests, front first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Request> {
        self.pending.iter().cloned().collect()
    }

    /// Walk the queue once, producing one record per pending request.
    ///
    /// A request whose type or format is no longer known is removed without
    /// producing anything. Only a successful render counts against a request;
    /// one whose event fails to synthesize or render keeps its count and is
    /// retried next round, so a runtime weight fix lets it resume. Requests
    /// that reach zero are removed.
    pub fn drain_round(&mut self, registry: &Registry, options: &Options) -> Vec<Record> {
        let mut records = Vec::with_capacity(self.pending.len());
        self.pending.retain_mut(|request| {
            if request.count == 0 {
                return false;
            }
            let options = Options {
                framed: request.framed,
                ..*options
            };
            let event = match registry.create_with(&request.kind, &request.format, &options) {
                Ok(event) => event.render(),
                Err(err) if err.is_unsupported() => {
                    warn!(
                        kind = %request.kind,
                        format = %request.format,
                        "dropping request: {err}"
                    );
                    return false;
                }
                Err(err) => Err(err),
            };
            match event {
                Ok(record) => {
                    records.push(record);
                    request.count -= 1;
                }
                Err(err) => error!(
                    kind = %request.kind,
                    format = %request.format,
                    "failed to generate requested event: {err}"
                ),
            }
            request.count > 0
        });
        records
    }
}
