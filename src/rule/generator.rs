//! Output generators
//!
//! Re-encode a transformed value into an outbound MIDI message. Every
//! generated channel message carries an explicit status byte.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GenerateError, GeneratorError};
use crate::midi::{format_hex, Channel, MsgType, Packet, SYSEX_END, SYSEX_START};

const MAX_7BIT: u8 = 0x7F;
const MAX_14BIT: u16 = 0x3FFF;

/// Data byte that receives the transformed value in two-byte messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum Target {
    /// Second data byte (velocity, pressure, controller value)
    #[default]
    Value,
    /// First data byte (note or controller number)
    Number,
}

/// Settings for Note On/Off, Aftertouch and Control Change generators
///
/// A fixed `Number`/`Value` always wins. Otherwise the target slot takes the
/// transformed value and the other slot is copied from the incoming message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyedGeneratorSettings {
    #[serde(default, alias = "Note", alias = "Controller")]
    pub number: Option<u8>,
    #[serde(default)]
    pub value: Option<u8>,
    #[serde(default)]
    pub target: Target,
}

/// Settings for Program Change and Channel Pressure generators
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SingleByteGeneratorSettings {
    #[serde(default)]
    pub value: Option<u8>,
}

/// Settings for Pitch Wheel generators
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PitchWheelGeneratorSettings {
    #[serde(default)]
    pub value: Option<u16>,
}

/// Settings for SysEx generators
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SysExGeneratorSettings {
    /// Complete message, F0 ... F7
    pub data: Vec<u8>,
    /// Payload byte overwritten with the transformed value
    #[serde(default)]
    pub value_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorKind {
    NoteOn(KeyedGeneratorSettings),
    NoteOff(KeyedGeneratorSettings),
    Aftertouch(KeyedGeneratorSettings),
    ControlChange(KeyedGeneratorSettings),
    ProgramChange(SingleByteGeneratorSettings),
    ChannelPressure(SingleByteGeneratorSettings),
    PitchWheel(PitchWheelGeneratorSettings),
    SysEx(SysExGeneratorSettings),
}

impl GeneratorKind {
    pub fn msg_type(&self) -> MsgType {
        match self {
            GeneratorKind::NoteOn(_) => MsgType::NoteOn,
            GeneratorKind::NoteOff(_) => MsgType::NoteOff,
            GeneratorKind::Aftertouch(_) => MsgType::Aftertouch,
            GeneratorKind::ControlChange(_) => MsgType::ControlChange,
            GeneratorKind::ProgramChange(_) => MsgType::ProgramChange,
            GeneratorKind::ChannelPressure(_) => MsgType::ChannelPressure,
            GeneratorKind::PitchWheel(_) => MsgType::PitchWheel,
            GeneratorKind::SysEx(_) => MsgType::SysEx,
        }
    }
}

/// Validated output generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generator {
    /// `Any` mirrors the incoming message's channel
    channel: Channel,
    kind: GeneratorKind,
}

impl Generator {
    pub fn new(channel: Channel, kind: GeneratorKind) -> Result<Self, GeneratorError> {
        match &kind {
            GeneratorKind::NoteOn(s)
            | GeneratorKind::NoteOff(s)
            | GeneratorKind::Aftertouch(s)
            | GeneratorKind::ControlChange(s) => {
                check_7bit("Number", s.number)?;
                check_7bit("Value", s.value)?;
            }
            GeneratorKind::ProgramChange(s) | GeneratorKind::ChannelPressure(s) => {
                check_7bit("Value", s.value)?;
            }
            GeneratorKind::PitchWheel(s) => {
                if let Some(value) = s.value.filter(|v| *v > MAX_14BIT) {
                    return Err(GeneratorError::ValueOutOfRange {
                        field: "Value",
                        value,
                        max: MAX_14BIT,
                    });
                }
            }
            GeneratorKind::SysEx(s) => check_sysex(s)?,
        }

        let channel = match kind {
            GeneratorKind::SysEx(_) => Channel::Any,
            _ => channel,
        };

        Ok(Self { channel, kind })
    }

    /// SysEx generators have no channel
    pub fn sysex(settings: SysExGeneratorSettings) -> Result<Self, GeneratorError> {
        Self::new(Channel::Any, GeneratorKind::SysEx(settings))
    }

    pub fn msg_type(&self) -> MsgType {
        self.kind.msg_type()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Encode `value` into a new message stamped with the input's timestamp
    pub fn generate(&self, input: &Packet, value: u16) -> Result<Packet, GenerateError> {
        let data = match &self.kind {
            GeneratorKind::NoteOn(s)
            | GeneratorKind::NoteOff(s)
            | GeneratorKind::Aftertouch(s)
            | GeneratorKind::ControlChange(s) => {
                let value = (value & u16::from(MAX_7BIT)) as u8;
                let number = match (s.number, s.target) {
                    (Some(n), _) => n,
                    (None, Target::Number) => value,
                    (None, Target::Value) => copy_byte(input, 1)?,
                };
                let velocity = match (s.value, s.target) {
                    (Some(v), _) => v,
                    (None, Target::Value) => value,
                    (None, Target::Number) => copy_byte(input, 2)?,
                };
                vec![self.status(input)?, number, velocity]
            }
            GeneratorKind::ProgramChange(s) | GeneratorKind::ChannelPressure(s) => {
                let value = s.value.unwrap_or((value & u16::from(MAX_7BIT)) as u8);
                vec![self.status(input)?, value]
            }
            GeneratorKind::PitchWheel(s) => {
                let value = s.value.unwrap_or(value) & MAX_14BIT;
                vec![
                    self.status(input)?,
                    (value & 0x7F) as u8,
                    ((value >> 7) & 0x7F) as u8,
                ]
            }
            GeneratorKind::SysEx(s) => {
                let mut data = s.data.clone();
                if let Some(index) = s.value_index {
                    data[index] = (value & u16::from(MAX_7BIT)) as u8;
                }
                data
            }
        };

        Ok(input.derive(data))
    }

    fn status(&self, input: &Packet) -> Result<u8, GenerateError> {
        let channel = match self.channel {
            Channel::Any => input.channel().ok_or(GenerateError::MissingInputChannel)?,
            ch => ch,
        };
        let nibble = self.msg_type().nibble().unwrap_or_default();
        Ok((nibble << 4) | channel.nibble().unwrap_or_default())
    }
}

fn copy_byte(input: &Packet, index: usize) -> Result<u8, GenerateError> {
    input
        .byte(index)
        .map(|b| b & MAX_7BIT)
        .ok_or(GenerateError::MissingInputByte {
            index,
            len: input.len(),
        })
}

fn check_7bit(field: &'static str, value: Option<u8>) -> Result<(), GeneratorError> {
    match value {
        Some(v) if v > MAX_7BIT => Err(GeneratorError::ValueOutOfRange {
            field,
            value: v.into(),
            max: MAX_7BIT.into(),
        }),
        _ => Ok(()),
    }
}

fn check_sysex(s: &SysExGeneratorSettings) -> Result<(), GeneratorError> {
    let len = s.data.len();
    if len < 2 || s.data[0] != SYSEX_START || s.data[len - 1] != SYSEX_END {
        return Err(GeneratorError::InvalidSysExFraming);
    }
    if let Some((offset, &value)) = s.data[1..len - 1]
        .iter()
        .enumerate()
        .find(|(_, b)| **b > MAX_7BIT)
    {
        return Err(GeneratorError::InvalidSysExByte {
            index: offset + 1,
            value,
        });
    }
    if let Some(index) = s.value_index {
        if index == 0 || index >= len - 1 {
            return Err(GeneratorError::ValueIndexOutOfRange { index, len });
        }
    }
    Ok(())
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            GeneratorKind::NoteOn(s)
            | GeneratorKind::NoteOff(s)
            | GeneratorKind::Aftertouch(s)
            | GeneratorKind::ControlChange(s) => {
                write!(f, "{} channel {}", self.msg_type(), self.channel)?;
                match s.number {
                    Some(n) => write!(f, " number {}", n)?,
                    None if s.target == Target::Number => write!(f, " number <value>")?,
                    None => write!(f, " number <input>")?,
                }
                match s.value {
                    Some(v) => write!(f, " value {}", v),
                    None if s.target == Target::Value => write!(f, " value <value>"),
                    None => write!(f, " value <input>"),
                }
            }
            GeneratorKind::ProgramChange(SingleByteGeneratorSettings { value })
            | GeneratorKind::ChannelPressure(SingleByteGeneratorSettings { value }) => {
                write!(f, "{} channel {}", self.msg_type(), self.channel)?;
                match value {
                    Some(v) => write!(f, " value {}", v),
                    None => write!(f, " value <value>"),
                }
            }
            GeneratorKind::PitchWheel(s) => {
                write!(f, "Pitch Wheel channel {}", self.channel)?;
                match s.value {
                    Some(v) => write!(f, " value {}", v),
                    None => write!(f, " value <value>"),
                }
            }
            GeneratorKind::SysEx(s) => {
                write!(f, "SysEx [{}]", format_hex(&s.data))?;
                if let Some(index) = s.value_index {
                    write!(f, " value at {}", index)?;
                }
                Ok(())
            }
        }
    }
}
