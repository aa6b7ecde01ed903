//! Fan-out result aggregation.
//!
//! After the initiating reply declares how many components will report, the
//! aggregator consumes the asynchronous detail stream until every expected
//! record has arrived, the peer closes the channel, or an optional deadline
//! expires. One implementation serves every validation kind; the per-kind
//! differences (detail type, error-counting policy, verbosity) are
//! parameters.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::messages::ComponentType;

/// One per-component validation result, as the aggregator sees it.
pub trait DetailRecord: Send + 'static {
    fn component_id(&self) -> &str;
    fn component_name(&self) -> &str;
    fn component_type(&self) -> ComponentType;
    fn is_valid(&self) -> bool;
    /// Number of constituent findings carried by this record. At least 1
    /// for an invalid record, 0 for a valid one.
    fn sub_error_count(&self) -> usize;
}

/// How an invalid record contributes to the error tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCounting {
    /// One error per invalid record.
    PerRecord,
    /// One error per finding inside the record.
    PerSubError,
}

/// How the aggregation loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every expected record arrived.
    Completed,
    /// The channel closed first; coverage is incomplete.
    ClosedEarly,
    /// The configured deadline expired first; coverage is incomplete.
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub expected: u64,
    pub received: u64,
    pub error_count: u64,
    pub completion: Completion,
}

impl AggregateOutcome {
    pub fn clean(&self) -> bool {
        self.error_count == 0
    }
}

/// Consumes the detail stream for one validation run.
pub struct FanoutAggregator {
    expected: u64,
    counting: ErrorCounting,
    include_valid: bool,
    deadline: Option<Duration>,
}

impl FanoutAggregator {
    pub fn new(expected: u64, counting: ErrorCounting) -> Self {
        Self {
            expected,
            counting,
            include_valid: false,
            deadline: None,
        }
    }

    /// Emit valid records too, not just failures.
    pub fn include_valid(mut self, include_valid: bool) -> Self {
        self.include_valid = include_valid;
        self
    }

    /// Overall deadline for the aggregation phase. Without one, only channel
    /// closure can end an incomplete run.
    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run the aggregation loop. `details` is fed by the receive handler
    /// bound for the detail content type; `close` is the session's close
    /// signal. Emitted records are those that are invalid, plus valid ones
    /// when `include_valid` is set, in arrival order.
    pub async fn run<D, F>(
        self,
        mut details: mpsc::Receiver<D>,
        mut close: watch::Receiver<bool>,
        mut emit: F,
    ) -> AggregateOutcome
    where
        D: DetailRecord,
        F: FnMut(D),
    {
        let mut remaining = self.expected;
        let mut received = 0u64;
        let mut error_count = 0u64;

        let far_off = Duration::from_secs(24 * 60 * 60);
        let sleep = tokio::time::sleep(self.deadline.unwrap_or(far_off));
        tokio::pin!(sleep);

        let completion = loop {
            if remaining == 0 {
                break Completion::Completed;
            }
            // Biased toward the detail queue so records already delivered are
            // drained before closure is observed.
            tokio::select! {
                biased;
                maybe = details.recv() => match maybe {
                    Some(detail) => {
                        received += 1;
                        remaining -= 1;
                        let valid = detail.is_valid();
                        if !valid {
                            error_count += match self.counting {
                                ErrorCounting::PerRecord => 1,
                                ErrorCounting::PerSubError => detail.sub_error_count().max(1) as u64,
                            };
                        }
                        if !valid || self.include_valid {
                            emit(detail);
                        }
                    }
                    None => {
                        warn!("detail stream ended with {} of {} results outstanding", remaining, self.expected);
                        break Completion::ClosedEarly;
                    }
                },
                result = close.wait_for(|closed| *closed) => {
                    let _ = result;
                    info!("channel closed, exiting");
                    break Completion::ClosedEarly;
                }
                _ = &mut sleep, if self.deadline.is_some() => {
                    warn!("deadline reached with {} of {} results outstanding", remaining, self.expected);
                    break Completion::DeadlineExceeded;
                }
            }
        };

        AggregateOutcome {
            expected: self.expected,
            received,
            error_count,
            completion,
        }
    }
}
