//! Input filters
//!
//! A filter decides whether an incoming message is relevant to a rule and
//! extracts the value that the transform works on. The variant set mirrors the
//! MIDI channel message types plus SysEx.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FilterError;
use crate::midi::{Channel, MsgType, Packet, SYSEX_START};

const MAX_7BIT: u8 = 0x7F;
const MAX_14BIT: u16 = 0x3FFF;

/// Result of decoding a message against a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMatch {
    /// Relevant message with an extracted value (0-127 or 0-16383)
    Match(u16),
    /// Relevant message without a continuous value
    MatchNoValue,
    NoMatch,
}

/// Which part of the message becomes the rule value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum Extract {
    /// Last data byte (velocity, pressure, controller value, program...)
    #[default]
    Value,
    /// First data byte of two-byte messages (note or controller number)
    Number,
    /// Structural match only
    None,
}

/// Settings for Note On/Off, Aftertouch and Control Change filters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyedFilterSettings {
    /// Note or controller number; absent matches any
    #[serde(default, alias = "Note", alias = "Controller")]
    pub number: Option<u8>,
    #[serde(default)]
    pub min_value: u8,
    #[serde(default = "default_max_7bit")]
    pub max_value: u8,
    #[serde(default)]
    pub extract: Extract,
}

impl Default for KeyedFilterSettings {
    fn default() -> Self {
        Self {
            number: None,
            min_value: 0,
            max_value: MAX_7BIT,
            extract: Extract::Value,
        }
    }
}

/// Settings for Program Change and Channel Pressure filters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SingleByteFilterSettings {
    #[serde(default)]
    pub min_value: u8,
    #[serde(default = "default_max_7bit")]
    pub max_value: u8,
    #[serde(default)]
    pub extract: Extract,
}

impl Default for SingleByteFilterSettings {
    fn default() -> Self {
        Self {
            min_value: 0,
            max_value: MAX_7BIT,
            extract: Extract::Value,
        }
    }
}

/// Settings for Pitch Wheel filters (14-bit range)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PitchWheelFilterSettings {
    #[serde(default)]
    pub min_value: u16,
    #[serde(default = "default_max_14bit")]
    pub max_value: u16,
    #[serde(default)]
    pub extract: Extract,
}

impl Default for PitchWheelFilterSettings {
    fn default() -> Self {
        Self {
            min_value: 0,
            max_value: MAX_14BIT,
            extract: Extract::Value,
        }
    }
}

/// Settings for SysEx filters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SysExFilterSettings {
    /// Leading bytes the message must start with (F0 included)
    #[serde(default = "default_sysex_prefix")]
    pub prefix: Vec<u8>,
    /// Byte carrying the value; absent means structural match only
    #[serde(default)]
    pub value_index: Option<usize>,
}

impl Default for SysExFilterSettings {
    fn default() -> Self {
        Self {
            prefix: default_sysex_prefix(),
            value_index: None,
        }
    }
}

fn default_max_7bit() -> u8 {
    MAX_7BIT
}
fn default_max_14bit() -> u16 {
    MAX_14BIT
}
fn default_sysex_prefix() -> Vec<u8> {
    vec![SYSEX_START]
}

/// Variant-specific filter settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    NoteOn(KeyedFilterSettings),
    NoteOff(KeyedFilterSettings),
    Aftertouch(KeyedFilterSettings),
    ControlChange(KeyedFilterSettings),
    ProgramChange(SingleByteFilterSettings),
    ChannelPressure(SingleByteFilterSettings),
    PitchWheel(PitchWheelFilterSettings),
    SysEx(SysExFilterSettings),
}

impl FilterKind {
    pub fn msg_type(&self) -> MsgType {
        match self {
            FilterKind::NoteOn(_) => MsgType::NoteOn,
            FilterKind::NoteOff(_) => MsgType::NoteOff,
            FilterKind::Aftertouch(_) => MsgType::Aftertouch,
            FilterKind::ControlChange(_) => MsgType::ControlChange,
            FilterKind::ProgramChange(_) => MsgType::ProgramChange,
            FilterKind::ChannelPressure(_) => MsgType::ChannelPressure,
            FilterKind::PitchWheel(_) => MsgType::PitchWheel,
            FilterKind::SysEx(_) => MsgType::SysEx,
        }
    }
}

/// Validated input filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    channel: Channel,
    kind: FilterKind,
}

impl Filter {
    /// Build a filter, validating the settings' numeric ranges
    ///
    /// SysEx filters ignore `channel`.
    pub fn new(channel: Channel, kind: FilterKind) -> Result<Self, FilterError> {
        match &kind {
            FilterKind::NoteOn(s)
            | FilterKind::NoteOff(s)
            | FilterKind::Aftertouch(s)
            | FilterKind::ControlChange(s) => {
                if let Some(number) = s.number {
                    check_7bit("Number", number)?;
                }
                check_range(s.min_value.into(), s.max_value.into(), MAX_7BIT.into())?;
            }
            FilterKind::ProgramChange(s) | FilterKind::ChannelPressure(s) => {
                if s.extract == Extract::Number {
                    return Err(FilterError::NoNumber(kind.msg_type()));
                }
                check_range(s.min_value.into(), s.max_value.into(), MAX_7BIT.into())?;
            }
            FilterKind::PitchWheel(s) => {
                if s.extract == Extract::Number {
                    return Err(FilterError::NoNumber(MsgType::PitchWheel));
                }
                check_range(s.min_value, s.max_value, MAX_14BIT)?;
            }
            FilterKind::SysEx(s) => {
                if s.prefix.first() != Some(&SYSEX_START) {
                    return Err(FilterError::InvalidSysExPrefix);
                }
            }
        }

        let channel = match kind {
            FilterKind::SysEx(_) => Channel::Any,
            _ => channel,
        };

        Ok(Self { channel, kind })
    }

    pub fn msg_type(&self) -> MsgType {
        self.kind.msg_type()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    /// Cheap rejection on the status byte's type and channel only
    pub fn quick_match(&self, msg_type: MsgType, channel: Option<Channel>) -> bool {
        self.msg_type().matches(msg_type) && self.channel.matches(channel)
    }

    /// Decode the data bytes and extract the rule value
    pub fn match_packet(&self, packet: &Packet) -> FilterMatch {
        let data = packet.data();
        match &self.kind {
            FilterKind::NoteOn(s)
            | FilterKind::NoteOff(s)
            | FilterKind::Aftertouch(s)
            | FilterKind::ControlChange(s) => {
                let (Some(&number), Some(&value)) = (data.get(1), data.get(2)) else {
                    return FilterMatch::NoMatch;
                };
                let (number, value) = (number & MAX_7BIT, value & MAX_7BIT);

                if s.number.is_some_and(|n| n != number) {
                    return FilterMatch::NoMatch;
                }
                if !(s.min_value..=s.max_value).contains(&value) {
                    return FilterMatch::NoMatch;
                }

                match s.extract {
                    Extract::Value => FilterMatch::Match(value.into()),
                    Extract::Number => FilterMatch::Match(number.into()),
                    Extract::None => FilterMatch::MatchNoValue,
                }
            }
            FilterKind::ProgramChange(s) | FilterKind::ChannelPressure(s) => {
                let Some(&value) = data.get(1) else {
                    return FilterMatch::NoMatch;
                };
                let value = value & MAX_7BIT;

                if !(s.min_value..=s.max_value).contains(&value) {
                    return FilterMatch::NoMatch;
                }
                extract_value(s.extract, value.into())
            }
            FilterKind::PitchWheel(s) => {
                let (Some(&lsb), Some(&msb)) = (data.get(1), data.get(2)) else {
                    return FilterMatch::NoMatch;
                };
                let value = (u16::from(msb & MAX_7BIT) << 7) | u16::from(lsb & MAX_7BIT);

                if !(s.min_value..=s.max_value).contains(&value) {
                    return FilterMatch::NoMatch;
                }
                extract_value(s.extract, value)
            }
            FilterKind::SysEx(s) => {
                if !data.starts_with(&s.prefix) {
                    return FilterMatch::NoMatch;
                }
                match s.value_index {
                    Some(index) => match data.get(index) {
                        Some(&byte) => FilterMatch::Match((byte & MAX_7BIT).into()),
                        None => FilterMatch::NoMatch,
                    },
                    None => FilterMatch::MatchNoValue,
                }
            }
        }
    }
}

fn extract_value(extract: Extract, value: u16) -> FilterMatch {
    match extract {
        Extract::None => FilterMatch::MatchNoValue,
        _ => FilterMatch::Match(value),
    }
}

fn check_7bit(field: &'static str, value: u8) -> Result<(), FilterError> {
    if value > MAX_7BIT {
        return Err(FilterError::ValueOutOfRange {
            field,
            value: value.into(),
            max: MAX_7BIT.into(),
        });
    }
    Ok(())
}

fn check_range(min: u16, max: u16, limit: u16) -> Result<(), FilterError> {
    if max > limit {
        return Err(FilterError::ValueOutOfRange {
            field: "MaxValue",
            value: max,
            max: limit,
        });
    }
    if max < min {
        return Err(FilterError::InvalidRange { min, max });
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FilterKind::NoteOn(s)
            | FilterKind::NoteOff(s)
            | FilterKind::Aftertouch(s)
            | FilterKind::ControlChange(s) => {
                write!(f, "{} channel {}", self.msg_type(), self.channel)?;
                match s.number {
                    Some(n) => write!(f, " number {}", n)?,
                    None => write!(f, " any number")?,
                }
                write!(f, " value [{}, {}] extract {:?}", s.min_value, s.max_value, s.extract)
            }
            FilterKind::ProgramChange(s) | FilterKind::ChannelPressure(s) => write!(
                f,
                "{} channel {} value [{}, {}] extract {:?}",
                self.msg_type(),
                self.channel,
                s.min_value,
                s.max_value,
                s.extract
            ),
            FilterKind::PitchWheel(s) => write!(
                f,
                "Pitch Wheel channel {} value [{}, {}] extract {:?}",
                self.channel, s.min_value, s.max_value, s.extract
            ),
            FilterKind::SysEx(s) => {
                write!(f, "SysEx prefix [{}]", crate::midi::format_hex(&s.prefix))?;
                if let Some(index) = s.value_index {
                    write!(f, " value at {}", index)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(number: Option<u8>) -> Filter {
        Filter::new(
            Channel::Number(1),
            FilterKind::ControlChange(KeyedFilterSettings {
                number,
                ..Default::default()
            }),
        )
        .unwrap()
    }

    fn packet(data: &[u8]) -> Packet {
        Packet::new(data, 0)
    }

    #[test]
    fn test_quick_match_type_and_channel() {
        let filter = cc(Some(7));

        assert!(filter.quick_match(MsgType::ControlChange, Some(Channel::Number(1))));
        assert!(!filter.quick_match(MsgType::ControlChange, Some(Channel::Number(2))));
        assert!(!filter.quick_match(MsgType::NoteOn, Some(Channel::Number(1))));
        assert!(!filter.quick_match(MsgType::Unknown, None));
    }

    #[test]
    fn test_quick_match_any_channel() {
        let filter = Filter::new(
            Channel::Any,
            FilterKind::NoteOn(KeyedFilterSettings::default()),
        )
        .unwrap();

        for ch in 1..=16 {
            assert!(filter.quick_match(MsgType::NoteOn, Channel::new(ch)));
        }
    }

    #[test]
    fn test_control_change_extracts_value() {
        let filter = cc(Some(7));

        assert_eq!(filter.match_packet(&packet(&[0xB0, 7, 100])), FilterMatch::Match(100));
        assert_eq!(filter.match_packet(&packet(&[0xB0, 8, 100])), FilterMatch::NoMatch);
        assert_eq!(filter.match_packet(&packet(&[0xB0, 7])), FilterMatch::NoMatch);
    }

    #[test]
    fn test_value_range_and_extract_number() {
        let filter = Filter::new(
            Channel::Number(1),
            FilterKind::NoteOn(KeyedFilterSettings {
                number: None,
                min_value: 1,
                max_value: 127,
                extract: Extract::Number,
            }),
        )
        .unwrap();

        assert_eq!(filter.match_packet(&packet(&[0x90, 60, 90])), FilterMatch::Match(60));
        // Velocity 0 falls outside the configured range
        assert_eq!(filter.match_packet(&packet(&[0x90, 60, 0])), FilterMatch::NoMatch);
    }

    #[test]
    fn test_structural_match_without_value() {
        let filter = Filter::new(
            Channel::Number(1),
            FilterKind::ProgramChange(SingleByteFilterSettings {
                min_value: 52,
                max_value: 52,
                extract: Extract::None,
            }),
        )
        .unwrap();

        assert_eq!(filter.match_packet(&packet(&[0xC0, 52])), FilterMatch::MatchNoValue);
        assert_eq!(filter.match_packet(&packet(&[0xC0, 53])), FilterMatch::NoMatch);
    }

    #[test]
    fn test_pitch_wheel_reassembles_14bit() {
        let filter = Filter::new(
            Channel::Number(1),
            FilterKind::PitchWheel(PitchWheelFilterSettings::default()),
        )
        .unwrap();

        assert_eq!(filter.match_packet(&packet(&[0xE0, 0x00, 0x40])), FilterMatch::Match(8192));
        assert_eq!(filter.match_packet(&packet(&[0xE0, 0x7F, 0x7F])), FilterMatch::Match(16383));
    }

    #[test]
    fn test_sysex_prefix_and_value_index() {
        let filter = Filter::new(
            Channel::Number(5),
            FilterKind::SysEx(SysExFilterSettings {
                prefix: vec![0xF0, 0x43, 0x10],
                value_index: Some(4),
            }),
        )
        .unwrap();

        // Channel is meaningless for SysEx
        assert!(filter.quick_match(MsgType::SysEx, None));
        assert_eq!(
            filter.match_packet(&packet(&[0xF0, 0x43, 0x10, 0x01, 0x55, 0xF7])),
            FilterMatch::Match(0x55)
        );
        assert_eq!(
            filter.match_packet(&packet(&[0xF0, 0x41, 0x10, 0x01, 0x55, 0xF7])),
            FilterMatch::NoMatch
        );
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let too_high = Filter::new(
            Channel::Any,
            FilterKind::ControlChange(KeyedFilterSettings {
                number: Some(128),
                ..Default::default()
            }),
        );
        assert!(matches!(too_high, Err(FilterError::ValueOutOfRange { .. })));

        let inverted = Filter::new(
            Channel::Any,
            FilterKind::ChannelPressure(SingleByteFilterSettings {
                min_value: 100,
                max_value: 10,
                extract: Extract::Value,
            }),
        );
        assert_eq!(inverted, Err(FilterError::InvalidRange { min: 100, max: 10 }));

        let no_number = Filter::new(
            Channel::Any,
            FilterKind::PitchWheel(PitchWheelFilterSettings {
                extract: Extract::Number,
                ..Default::default()
            }),
        );
        assert_eq!(no_number, Err(FilterError::NoNumber(MsgType::PitchWheel)));

        let bad_prefix = Filter::new(
            Channel::Any,
            FilterKind::SysEx(SysExFilterSettings {
                prefix: vec![0x43],
                value_index: None,
            }),
        );
        assert_eq!(bad_prefix, Err(FilterError::InvalidSysExPrefix));
    }
}
