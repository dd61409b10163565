//! Router - message dispatch for one source/destination pair
//!
//! Every raw packet from the source is split into messages. Each message is
//! either forwarded verbatim (passthrough routers) or offered to the rules in
//! order until one matches. Outbound writes go through the shared
//! [`RateLimiter`]; Noise side messages are sent inline or from a detached
//! task when they carry a delay.

mod limiter;

pub use limiter::{RateLimiter, SendOutcome};

#[cfg(test)]
mod tests;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::error::RouterError;
use crate::midi::{self, Packet, CC_ALL_NOTES_OFF, CC_RESET_ALL_CONTROLLERS};
use crate::rule::{MatchResult, NoisePacket, Rule};
use crate::transport::OutputPort;

/// Router-wide options taken from the configuration file
#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    pub name: String,
    /// Forward every message verbatim; rules are not evaluated
    pub passthrough: bool,
    /// Minimum spacing between sends, zero disables limiting
    pub send_limit: Duration,
    pub verbose: bool,
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Empty message
    Ignored,
    /// Sent verbatim by a passthrough router
    Forwarded,
    /// A rule produced a message and it was sent
    Injected,
    /// A rule matched a duplicate value and emitted nothing
    Consumed,
    NoMatch,
    RateLimited,
    SendFailed,
}

pub struct Router {
    name: String,
    rules: Mutex<Vec<Rule>>,
    passthrough: bool,
    verbose: bool,
    port: Arc<dyn OutputPort>,
    limiter: Arc<RateLimiter>,
    runtime: Handle,
}

impl Router {
    /// Create a router; must be called from within a Tokio runtime
    ///
    /// The runtime handle is kept so packets may later arrive on a driver
    /// thread that does not belong to Tokio.
    pub fn new(
        settings: RouterSettings,
        rules: Vec<Rule>,
        port: Arc<dyn OutputPort>,
    ) -> Result<Self, RouterError> {
        let runtime = Handle::try_current()?;

        info!(
            "Router '{}' -> '{}': {} rules, passthrough={}, send limit {} ms",
            settings.name,
            port.name(),
            rules.len(),
            settings.passthrough,
            settings.send_limit.as_millis()
        );
        for rule in &rules {
            info!("  {}", rule);
        }

        Ok(Self {
            name: settings.name,
            rules: Mutex::new(rules),
            passthrough: settings.passthrough,
            verbose: settings.verbose,
            port,
            limiter: Arc::new(RateLimiter::new(settings.send_limit)),
            runtime,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Handle one raw packet from the source port
    pub fn on_packet(&self, packet: &Packet) -> Vec<Dispatch> {
        if packet.is_empty() {
            return vec![Dispatch::Ignored];
        }
        vlog!(self.verbose, router = %self.name, "Received {}", packet);
        midi::split(packet)
            .map(|message| self.handle_single_packet(message))
            .collect()
    }

    /// Dispatch one discrete message
    pub fn handle_single_packet(&self, packet: Packet) -> Dispatch {
        if packet.is_empty() {
            return Dispatch::Ignored;
        }

        if self.passthrough {
            let dispatch = self.send(&packet, Dispatch::Forwarded);
            if dispatch == Dispatch::Forwarded && packet.is_stop() {
                info!(router = %self.name, "Stop received, resetting destination");
                self.send_panic();
            }
            return dispatch;
        }

        let result = {
            let mut rules = self.rules.lock();
            rules
                .iter_mut()
                .map(|rule| rule.evaluate(&packet, self.verbose))
                .find(MatchResult::is_match)
        };

        match result {
            Some(MatchResult::MatchInject { packet: out, noise }) => {
                let dispatch = self.send(&out, Dispatch::Injected);
                if dispatch == Dispatch::Injected {
                    if let Some(noise) = noise {
                        self.schedule_noise(noise);
                    }
                }
                dispatch
            }
            Some(_) => Dispatch::Consumed,
            None => {
                vlog!(self.verbose, router = %self.name, "No rule matched {}", packet);
                Dispatch::NoMatch
            }
        }
    }

    fn send(&self, packet: &Packet, on_success: Dispatch) -> Dispatch {
        send_limited(
            &self.limiter,
            self.port.as_ref(),
            &self.name,
            packet,
            self.verbose,
            on_success,
        )
    }

    /// Send a noise message now, or after its delay from a detached task
    fn schedule_noise(&self, noise: NoisePacket) {
        if noise.delay.is_zero() {
            self.send(&noise.packet, Dispatch::Injected);
            return;
        }

        vlog!(
            self.verbose,
            router = %self.name,
            "Noise {} scheduled in {} ms",
            noise.packet,
            noise.delay.as_millis()
        );
        let limiter = self.limiter.clone();
        let port = self.port.clone();
        let name = self.name.clone();
        let verbose = self.verbose;
        self.runtime.spawn(async move {
            tokio::time::sleep(noise.delay).await;
            send_limited(
                &limiter,
                port.as_ref(),
                &name,
                &noise.packet,
                verbose,
                Dispatch::Injected,
            );
        });
    }

    /// All Notes Off then Reset All Controllers on every channel
    ///
    /// Written under the limiter lock without being limited itself.
    fn send_panic(&self) {
        self.limiter.bypass(|| {
            for channel in 0..16u8 {
                for controller in [CC_ALL_NOTES_OFF, CC_RESET_ALL_CONTROLLERS] {
                    let data = [0xB0 | channel, controller, 0];
                    if let Err(e) = self.port.send(&data) {
                        warn!(router = %self.name, "Reset message failed: {:#}", e);
                    }
                }
            }
        });
    }

    /// Reset the destination and log per-rule statistics
    pub fn cleanup(&self) {
        info!(router = %self.name, "Cleaning up, resetting destination");
        self.send_panic();

        for rule in self.rules.lock().iter() {
            info!(router = %self.name, "Rule '{}': {}", rule.name(), rule.stats());
        }
    }
}

fn send_limited(
    limiter: &RateLimiter,
    port: &dyn OutputPort,
    router: &str,
    packet: &Packet,
    verbose: bool,
    on_success: Dispatch,
) -> Dispatch {
    match limiter.send_with(|| port.send(packet.data())) {
        SendOutcome::Sent => {
            vlog!(verbose, router = %router, "Sent {}", packet);
            on_success
        }
        SendOutcome::RateLimited => {
            vlog!(verbose, router = %router, "Rate limited, dropped {}", packet);
            Dispatch::RateLimited
        }
        SendOutcome::Failed(e) => {
            warn!(router = %router, "Send failed for {}: {:#}", packet, e);
            Dispatch::SendFailed
        }
    }
}
