//! MIDI port access
//!
//! Output ports sit behind the [`OutputPort`] trait so the router can be
//! driven without hardware. The midir-backed implementations open ports by
//! case-insensitive substring match on the device name.

use anyhow::{Context, Result};
use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::midi::{format_hex, Packet};

/// Destination for routed messages
pub trait OutputPort: Send + Sync {
    fn name(&self) -> &str;

    /// Write one complete message to the port
    fn send(&self, data: &[u8]) -> Result<()>;
}

/// Find a port whose name contains `pattern`, ignoring case
fn find_port<T: MidiIO>(io: &T, pattern: &str) -> Option<(T::Port, String)> {
    let pattern = pattern.to_lowercase();
    io.ports().into_iter().find_map(|port| {
        let name = io.port_name(&port).ok()?;
        if name.to_lowercase().contains(&pattern) {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            Some((port, name))
        } else {
            None
        }
    })
}

/// Destination port backed by midir
pub struct MidirOutput {
    name: String,
    conn: Mutex<MidiOutputConnection>,
}

impl MidirOutput {
    pub fn open(client: &str, device: &str) -> Result<Self> {
        let midi_out = MidiOutput::new(client).context("Failed to create MIDI output")?;
        debug!("Found {} MIDI output ports", midi_out.port_count());

        let (port, name) = find_port(&midi_out, device)
            .ok_or_else(|| anyhow::anyhow!("Output port '{}' not found", device))?;

        info!("Connecting to output port: {}", name);
        let conn = midi_out
            .connect(&port, client)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to connect to output port")?;

        Ok(Self {
            name,
            conn: Mutex::new(conn),
        })
    }
}

impl OutputPort for MidirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        self.conn
            .lock()
            .send(data)
            .with_context(|| format!("Failed to send {} to '{}'", format_hex(data), self.name))
    }
}

/// Source port backed by midir; the connection closes on drop
pub struct MidirInput {
    name: String,
    _conn: MidiInputConnection<()>,
}

impl MidirInput {
    /// Open the source port and call `on_packet` for every raw driver packet
    ///
    /// The callback runs on the driver's thread.
    pub fn open<F>(client: &str, device: &str, mut on_packet: F) -> Result<Self>
    where
        F: FnMut(Packet) + Send + 'static,
    {
        let mut midi_in = MidiInput::new(client).context("Failed to create MIDI input")?;
        // SysEx, timing and active sensing all go through the rules
        midi_in.ignore(Ignore::None);
        debug!("Found {} MIDI input ports", midi_in.port_count());

        let (port, name) = find_port(&midi_in, device)
            .ok_or_else(|| anyhow::anyhow!("Input port '{}' not found", device))?;

        info!("Connecting to input port: {}", name);
        let conn = midi_in
            .connect(
                &port,
                client,
                move |timestamp, data, _| on_packet(Packet::new(data, timestamp)),
                (),
            )
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to connect to input port")?;

        Ok(Self { name, _conn: conn })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Port discovery for `--list-ports`
pub mod discovery {
    use super::*;
    use colored::*;

    /// Information about a MIDI port
    #[derive(Debug, Clone)]
    pub struct PortInfo {
        pub index: usize,
        pub name: String,
        pub is_virtual: bool,
    }

    fn port_infos<T: MidiIO>(io: &T) -> Vec<PortInfo> {
        io.ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = io.port_name(port).ok()?;
                let is_virtual =
                    name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC");
                Some(PortInfo {
                    index,
                    name,
                    is_virtual,
                })
            })
            .collect()
    }

    pub fn discover_input_ports() -> Result<Vec<PortInfo>> {
        let midi_in = MidiInput::new("MIDIRouter-Discovery")?;
        Ok(port_infos(&midi_in))
    }

    pub fn discover_output_ports() -> Result<Vec<PortInfo>> {
        let midi_out = MidiOutput::new("MIDIRouter-Discovery")?;
        Ok(port_infos(&midi_out))
    }

    fn print_section(title: &str, ports: Result<Vec<PortInfo>>) {
        println!("\n{}", title.bold());
        match ports {
            Ok(ports) if ports.is_empty() => println!("  {}", "No ports found".dimmed()),
            Ok(ports) => {
                for port in ports {
                    let marker = if port.is_virtual {
                        "[VIRTUAL]".yellow()
                    } else {
                        "[PHYSICAL]".green()
                    };
                    println!("  {}: {} {}", port.index, marker, port.name);
                }
            }
            Err(e) => println!("  {}", format!("Port scan failed: {}", e).red()),
        }
    }

    /// Print input and output ports
    pub fn print_ports() {
        println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
        print_section("Input Ports:", discover_input_ports());
        print_section("Output Ports:", discover_output_ports());
        println!();
    }
}
