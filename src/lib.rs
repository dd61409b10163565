//! MIDIRouter - rule-based MIDI relay
//!
//! Receives raw MIDI packets from a source port, runs them through an ordered
//! list of filter/transform/generate rules and writes the result to a
//! destination port.

/// Per-message log line: `debug!` when the router is verbose, `trace!` otherwise.
macro_rules! vlog {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

pub mod config;
pub mod error;
pub mod midi;
pub mod router;
pub mod rule;
pub mod transport;

pub use error::{FilterError, GenerateError, GeneratorError, RouterError, TransformError};
pub use midi::{Channel, MsgType, Packet};
pub use router::{Dispatch, RateLimiter, Router, RouterSettings};
pub use rule::{MatchResult, Rule};
