//! Error types for rule construction and message generation.
//!
//! Construction errors surface while rules are built from configuration.
//! `GenerateError` is the only error raised while messages flow; the rule
//! recovers from it by passing the original message through.

use thiserror::Error;

use crate::midi::MsgType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("{mode} transform needs FromMax > FromMin (got {min}..{max})")]
    InvalidFromRange { mode: String, min: u16, max: u16 },

    #[error("{mode} transform needs ToMax > ToMin (got {min}..{max})")]
    InvalidToRange { mode: String, min: u16, max: u16 },

    #[error("{field} = {value} exceeds the MIDI limit of {max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u16,
        max: u16,
    },

    #[error("Noise transform requires noise settings")]
    MissingNoiseSettings,

    #[error("Noise MaxValue {max} is below MinValue {min}")]
    InvalidNoiseValueRange { min: u8, max: u8 },

    #[error("Noise DelayMsMax {max} is below DelayMsMin {min}")]
    InvalidNoiseDelayRange { min: u16, max: u16 },

    #[error("Noise message type must be a channel message, got {0}")]
    InvalidNoiseType(MsgType),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter type: {0}")]
    UnsupportedType(MsgType),

    #[error("{field} = {value} exceeds the MIDI limit of {max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u16,
        max: u16,
    },

    #[error("Filter MaxValue {max} is below MinValue {min}")]
    InvalidRange { min: u16, max: u16 },

    #[error("{0} filters cannot extract a number")]
    NoNumber(MsgType),

    #[error("SysEx filter prefix must start with F0")]
    InvalidSysExPrefix,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("Invalid generator type: {0}")]
    UnsupportedType(MsgType),

    #[error("{field} = {value} exceeds the MIDI limit of {max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u16,
        max: u16,
    },

    #[error("SysEx data must start with F0 and end with F7")]
    InvalidSysExFraming,

    #[error("SysEx data byte {value:#04X} at index {index} is not a 7-bit value")]
    InvalidSysExByte { index: usize, value: u8 },

    #[error("SysEx ValueIndex {index} is outside the payload (length {len})")]
    ValueIndexOutOfRange { index: usize, len: usize },
}

/// Failure while encoding an outbound message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("input message has no byte {index} to copy (length {len})")]
    MissingInputByte { index: usize, len: usize },

    #[error("input message has no channel to mirror")]
    MissingInputChannel,
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Router must be created inside a Tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
