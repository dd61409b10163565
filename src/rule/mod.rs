//! Routing rules
//!
//! A rule binds a filter, a transform and a generator, plus an optional
//! duplicate-suppression window. Rules are evaluated in order by the router;
//! the first one that matches decides what happens to a message.

pub mod filter;
pub mod generator;
pub mod transform;


use rand::Rng;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::midi::{MsgType, Packet};
use filter::{Filter, FilterMatch};
use generator::Generator;
use transform::{Transform, TransformMode, Transformed};

/// `last_value` before the first emitted value; outside every 14-bit range
const NO_LAST_VALUE: u16 = 0xFFFF;

/// Delayed side message requested by a Noise transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoisePacket {
    pub packet: Packet,
    pub delay: Duration,
}

/// Result of evaluating one message against one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// Matched, but nothing is emitted (duplicate value)
    MatchNoInject,
    MatchInject {
        packet: Packet,
        noise: Option<NoisePacket>,
    },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchResult::NoMatch)
    }
}

/// Per-rule counters, logged when the router shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleStats {
    pub evaluated: u64,
    /// Rejected on message type/channel without decoding
    pub quick_rejected: u64,
    /// Messages handed to the full filter match
    pub decoded: u64,
    pub injected: u64,
    pub duplicates_dropped: u64,
    pub out_of_range: u64,
    pub generate_failures: u64,
    /// Consecutive outputs sharing a status byte (PreventRunningStatus rules)
    pub repeated_status: u64,
}

impl fmt::Display for RuleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "evaluated={} quick_rejected={} decoded={} injected={} duplicates={} out_of_range={} generate_failures={} repeated_status={}",
            self.evaluated,
            self.quick_rejected,
            self.decoded,
            self.injected,
            self.duplicates_dropped,
            self.out_of_range,
            self.generate_failures,
            self.repeated_status
        )
    }
}

pub struct Rule {
    name: String,
    filter: Filter,
    transform: Transform,
    generator: Generator,
    drop_duplicates: bool,
    drop_duplicates_timeout: Duration,
    last_value: u16,
    last_value_at: Option<Instant>,
    last_status: Option<u8>,
    stats: RuleStats,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        filter: Filter,
        transform: Transform,
        generator: Generator,
    ) -> Self {
        Self {
            name: name.into(),
            filter,
            transform,
            generator,
            drop_duplicates: false,
            drop_duplicates_timeout: Duration::ZERO,
            last_value: NO_LAST_VALUE,
            last_value_at: None,
            last_status: None,
            stats: RuleStats::default(),
        }
    }

    /// Suppress a repeated value seen again within `timeout`
    pub fn with_drop_duplicates(mut self, timeout: Duration) -> Self {
        self.drop_duplicates = true;
        self.drop_duplicates_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> RuleStats {
        self.stats
    }

    /// Evaluate a message now, with the thread-local RNG
    pub fn evaluate(&mut self, packet: &Packet, verbose: bool) -> MatchResult {
        self.evaluate_at(packet, verbose, Instant::now(), &mut rand::thread_rng())
    }

    pub fn evaluate_at<R: Rng + ?Sized>(
        &mut self,
        packet: &Packet,
        verbose: bool,
        now: Instant,
        rng: &mut R,
    ) -> MatchResult {
        self.stats.evaluated += 1;

        let msg_type = packet.msg_type();
        if msg_type == MsgType::Unknown || !self.filter.quick_match(msg_type, packet.channel()) {
            self.stats.quick_rejected += 1;
            return MatchResult::NoMatch;
        }

        self.stats.decoded += 1;
        let (value, noise) = match self.filter.match_packet(packet) {
            FilterMatch::NoMatch => return MatchResult::NoMatch,
            FilterMatch::MatchNoValue => {
                vlog!(verbose, rule = %self.name, "Matched {} without a value", packet);
                (0, None)
            }
            FilterMatch::Match(input) => match self.transform.apply(input, rng) {
                Transformed::OutOfRange => {
                    self.stats.out_of_range += 1;
                    vlog!(verbose, rule = %self.name, "Value {} outside transform range", input);
                    return MatchResult::NoMatch;
                }
                Transformed::Value { value, noise } => {
                    let noise = noise.and_then(|request| {
                        let settings = self.transform.noise_settings()?;
                        let packet = settings.build_packet(packet, input, request.value)?;
                        Some(NoisePacket {
                            packet,
                            delay: request.delay,
                        })
                    });

                    if self.is_duplicate(value, now) {
                        self.stats.duplicates_dropped += 1;
                        vlog!(verbose, rule = %self.name, "Duplicate value {} dropped", value);
                        return MatchResult::MatchNoInject;
                    }
                    self.last_value = value;
                    self.last_value_at = Some(now);

                    (value, noise)
                }
            },
        };

        match self.generator.generate(packet, value) {
            Ok(out) => {
                self.stats.injected += 1;
                self.track_running_status(&out);
                vlog!(verbose, rule = %self.name, "{} -> {}", packet, out);
                MatchResult::MatchInject { packet: out, noise }
            }
            Err(e) => {
                self.stats.generate_failures += 1;
                warn!(rule = %self.name, "Generator failed for {}: {}, passing it through", packet, e);
                MatchResult::MatchInject {
                    packet: packet.clone(),
                    noise: None,
                }
            }
        }
    }

    fn is_duplicate(&self, value: u16, now: Instant) -> bool {
        if !self.drop_duplicates || value != self.last_value {
            return false;
        }
        self.last_value_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.drop_duplicates_timeout)
    }

    // Generated messages always carry a status byte; this only counts repeats.
    fn track_running_status(&mut self, out: &Packet) {
        if self.transform.mode() != TransformMode::PreventRunningStatus {
            return;
        }
        let status = out.status();
        if status.is_some() && status == self.last_status {
            self.stats.repeated_status += 1;
        }
        self.last_status = status;
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [{}] -> [{}] -> [{}]",
            self.name, self.filter, self.transform, self.generator
        )?;
        if self.drop_duplicates {
            write!(
                f,
                " (drop duplicates within {} ms)",
                self.drop_duplicates_timeout.as_millis()
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("transform", &self.transform)
            .field("generator", &self.generator)
            .field("drop_duplicates", &self.drop_duplicates)
            .finish_non_exhaustive()
    }
}
