//! Store Message Protocol
//!
//! Every mutation of the pattern store is a message to the store actor,
//! which applies them one at a time in arrival order. Requests carry an
//! `RpcReplyPort` for their answer; business failures (unknown pattern
//! IDs) come back through the port instead of failing the actor.

use crate::error::Result;
use crate::feedback::FeedbackOutcome;
use crate::maintenance::SweepReport;
use crate::types::{FeedbackEvent, Observation, PatternId};
use chrono::{DateTime, Utc};
use ractor::RpcReplyPort;

/// Messages for the store actor
pub enum StoreMessage {
    /// Insert a new pattern or refresh an existing one (validated observation)
    Upsert(Observation, RpcReplyPort<PatternId>),

    /// Apply accept/reject/ignore feedback
    ApplyFeedback(FeedbackEvent, RpcReplyPort<Result<FeedbackOutcome>>),

    /// Count rendered suggestions (surface counting mode)
    MarkSurfaced(Vec<PatternId>, DateTime<Utc>, RpcReplyPort<usize>),

    /// Decay and cleanup sweep as of the given instant
    Sweep(DateTime<Utc>, RpcReplyPort<SweepReport>),

    /// Drop every pattern and behavior aggregate
    Reset(RpcReplyPort<usize>),

    /// Barrier: answered once every earlier message has been applied
    Drain(RpcReplyPort<u64>),
}
