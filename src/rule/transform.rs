//! Value transforms
//!
//! Maps the value extracted by a filter onto the range expected by the
//! generator. The Noise mode additionally asks for a randomized side message.

use rand::Rng;
use std::fmt;
use std::time::Duration;

use crate::error::TransformError;
use crate::midi::{Channel, MsgType, Packet};

const MAX_7BIT: u8 = 0x7F;
const MAX_14BIT: u16 = 0x3FFF;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransformMode {
    #[default]
    None,
    Linear,
    LinearDrop,
    Noise,
    /// Bookkeeping only: generated messages always carry a full status byte
    PreventRunningStatus,
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformMode::None => "None",
            TransformMode::Linear => "Linear",
            TransformMode::LinearDrop => "LinearDrop",
            TransformMode::Noise => "Noise",
            TransformMode::PreventRunningStatus => "PreventRunningStatus",
        };
        f.write_str(name)
    }
}

/// Random side message emitted by the Noise transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseSettings {
    msg_type: MsgType,
    channel: Channel,
    min_value: u8,
    max_value: u8,
    delay_ms_min: u16,
    delay_ms_max: u16,
}

impl NoiseSettings {
    pub fn new(
        msg_type: MsgType,
        channel: Channel,
        min_value: u8,
        max_value: u8,
        delay_ms_min: u16,
        delay_ms_max: u16,
    ) -> Result<Self, TransformError> {
        if msg_type.nibble().is_none() {
            return Err(TransformError::InvalidNoiseType(msg_type));
        }
        if max_value > MAX_7BIT {
            return Err(TransformError::ValueOutOfRange {
                field: "Noise MaxValue",
                value: max_value.into(),
                max: MAX_7BIT.into(),
            });
        }
        if max_value < min_value {
            return Err(TransformError::InvalidNoiseValueRange {
                min: min_value,
                max: max_value,
            });
        }
        if delay_ms_max < delay_ms_min {
            return Err(TransformError::InvalidNoiseDelayRange {
                min: delay_ms_min,
                max: delay_ms_max,
            });
        }

        Ok(Self {
            msg_type,
            channel,
            min_value,
            max_value,
            delay_ms_min,
            delay_ms_max,
        })
    }

    /// Draw a noise value and delay, both uniform over their inclusive ranges
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> NoiseRequest {
        let value = rng.gen_range(self.min_value..=self.max_value);
        let delay_ms = rng.gen_range(self.delay_ms_min..=self.delay_ms_max);
        NoiseRequest {
            value,
            delay: Duration::from_millis(delay_ms.into()),
        }
    }

    /// Encode the noise message
    ///
    /// Two-data-byte types carry the rule's input value as the first data
    /// byte and the noise value as the second. Returns None when the channel
    /// mirrors the input and the input has no channel.
    pub fn build_packet(&self, input: &Packet, input_value: u16, noise_value: u8) -> Option<Packet> {
        let channel = match self.channel {
            Channel::Any => input.channel()?,
            ch => ch,
        };
        let status = (self.msg_type.nibble()? << 4) | channel.nibble()?;

        let data = match self.msg_type.data_len()? {
            2 => vec![status, (input_value & 0x7F) as u8, noise_value],
            _ => vec![status, noise_value],
        };
        Some(input.derive(data))
    }
}

/// Noise value and delay drawn for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseRequest {
    pub value: u8,
    pub delay: Duration,
}

/// Outcome of applying a transform to a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformed {
    Value {
        value: u16,
        noise: Option<NoiseRequest>,
    },
    /// LinearDrop rejected the input or the output
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transform {
    mode: TransformMode,
    from_min: u16,
    from_max: u16,
    to_min: u16,
    to_max: u16,
    noise: Option<NoiseSettings>,
}

impl Transform {
    /// Identity transform
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a transform, rejecting degenerate bounds for every mode but None
    pub fn new(
        mode: TransformMode,
        from_min: u16,
        from_max: u16,
        to_min: u16,
        to_max: u16,
        noise: Option<NoiseSettings>,
    ) -> Result<Self, TransformError> {
        if mode == TransformMode::None {
            return Ok(Self::none());
        }

        for (field, value) in [
            ("FromMin", from_min),
            ("FromMax", from_max),
            ("ToMin", to_min),
            ("ToMax", to_max),
        ] {
            if value > MAX_14BIT {
                return Err(TransformError::ValueOutOfRange {
                    field,
                    value,
                    max: MAX_14BIT,
                });
            }
        }
        if from_max <= from_min {
            return Err(TransformError::InvalidFromRange {
                mode: mode.to_string(),
                min: from_min,
                max: from_max,
            });
        }
        if to_max <= to_min {
            return Err(TransformError::InvalidToRange {
                mode: mode.to_string(),
                min: to_min,
                max: to_max,
            });
        }

        let noise = match mode {
            TransformMode::Noise => Some(noise.ok_or(TransformError::MissingNoiseSettings)?),
            _ => None,
        };

        Ok(Self {
            mode,
            from_min,
            from_max,
            to_min,
            to_max,
            noise,
        })
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    pub fn noise_settings(&self) -> Option<&NoiseSettings> {
        self.noise.as_ref()
    }

    /// Apply the transform to an extracted value
    pub fn apply<R: Rng + ?Sized>(&self, value: u16, rng: &mut R) -> Transformed {
        match self.mode {
            TransformMode::None | TransformMode::PreventRunningStatus => Transformed::Value {
                value,
                noise: None,
            },
            TransformMode::Linear => Transformed::Value {
                value: self.linear(value),
                noise: None,
            },
            TransformMode::LinearDrop => {
                if !(self.from_min..=self.from_max).contains(&value) {
                    return Transformed::OutOfRange;
                }
                let mapped = self.linear(value);
                if !(self.to_min..=self.to_max).contains(&mapped) {
                    return Transformed::OutOfRange;
                }
                Transformed::Value {
                    value: mapped,
                    noise: None,
                }
            }
            TransformMode::Noise => Transformed::Value {
                value: self.linear(value),
                noise: self.noise.as_ref().map(|noise| noise.roll(rng)),
            },
        }
    }

    /// `round(a * value + b)`, saturated into `u16`
    fn linear(&self, value: u16) -> u16 {
        let a = f64::from(self.to_max - self.to_min) / f64::from(self.from_max - self.from_min);
        let b = f64::from(self.to_min) - a * f64::from(self.from_min);
        (a * f64::from(value) + b).round() as u16
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            TransformMode::None => f.write_str("None"),
            TransformMode::PreventRunningStatus => f.write_str("Prevent MIDI Running Status"),
            TransformMode::Linear => write!(
                f,
                "Linear from [{}, {}] to [{}, {}]",
                self.from_min, self.from_max, self.to_min, self.to_max
            ),
            TransformMode::LinearDrop => write!(
                f,
                "Linear from [{}, {}] to [{}, {}] (drop out of range values)",
                self.from_min, self.from_max, self.to_min, self.to_max
            ),
            TransformMode::Noise => {
                write!(
                    f,
                    "Noise from [{}, {}] to [{}, {}]",
                    self.from_min, self.from_max, self.to_min, self.to_max
                )?;
                if let Some(n) = &self.noise {
                    write!(
                        f,
                        " with noise ({} channel {}, value [{}, {}], delay [{}, {}]ms)",
                        n.msg_type,
                        n.channel,
                        n.min_value,
                        n.max_value,
                        n.delay_ms_min,
                        n.delay_ms_max
                    )?;
                }
                Ok(())
            }
        }
    }
}
