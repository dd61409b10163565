//! Configuration management for MIDIRouter
//!
//! One file describes one router: its source and destination devices and an
//! ordered rule list. Files are YAML; JSON files load unchanged since JSON is
//! valid YAML.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::error::{FilterError, GeneratorError};
use crate::midi::{Channel, MsgType};
use crate::router::RouterSettings;
use crate::rule::filter::{Filter, FilterKind};
use crate::rule::generator::{Generator, GeneratorKind};
use crate::rule::transform::{NoiseSettings, Transform, TransformMode};
use crate::rule::Rule;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouterConfig {
    pub source_device: String,
    pub destination_device: String,
    #[serde(default)]
    pub default_passthrough: bool,
    #[serde(default)]
    pub send_limit_ms: u64,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleConfig {
    pub name: String,
    pub filter: FilterConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    pub generator: GeneratorConfig,
}

/// Channel written either as a string ("1".."16", "*") or a bare number
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChannelField {
    Number(u8),
    Text(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterConfig {
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelField>,
    /// Type-specific settings, parsed once the type is known
    #[serde(default)]
    pub settings: serde_yaml::Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransformConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub from_min: u16,
    #[serde(default)]
    pub from_max: u16,
    #[serde(default)]
    pub to_min: u16,
    #[serde(default)]
    pub to_max: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_settings: Option<NoiseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NoiseConfig {
    pub msg_type: String,
    pub channel: ChannelField,
    #[serde(default)]
    pub min_value: u8,
    pub max_value: u8,
    #[serde(default)]
    pub delay_ms_min: u16,
    #[serde(default)]
    pub delay_ms_max: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeneratorConfig {
    pub msg_type: String,
    /// Not needed for SysEx
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelField>,
    #[serde(default)]
    pub drop_duplicates: bool,
    #[serde(default)]
    pub drop_duplicates_timeout_ms: u64,
    #[serde(default)]
    pub settings: serde_yaml::Value,
}

impl RouterConfig {
    /// Load configuration from file with validation
    ///
    /// Returns the configuration together with its rules, built once.
    pub async fn load(path: impl AsRef<Path>) -> Result<(Self, Vec<Rule>)> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate configuration text
    ///
    /// Rules are checked by building them.
    pub fn parse(contents: &str) -> Result<(Self, Vec<Rule>)> {
        let config: RouterConfig =
            serde_yaml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        let rules = config.build_rules()?;
        Ok((config, rules))
    }

    /// Validate the device pair
    pub fn validate(&self) -> Result<()> {
        if self.source_device.is_empty() {
            anyhow::bail!("MIDI source cannot be empty");
        }
        if self.destination_device.is_empty() {
            anyhow::bail!("MIDI destination cannot be empty");
        }
        if self.source_device == self.destination_device {
            anyhow::bail!("MIDI source and destination cannot be identical");
        }
        Ok(())
    }

    /// Build the rule list in file order
    fn build_rules(&self) -> Result<Vec<Rule>> {
        self.rules
            .iter()
            .map(|rule| {
                rule.build()
                    .with_context(|| format!("Invalid rule '{}'", rule.name))
            })
            .collect()
    }

    pub fn router_settings(&self, name: impl Into<String>) -> RouterSettings {
        RouterSettings {
            name: name.into(),
            passthrough: self.default_passthrough,
            send_limit: Duration::from_millis(self.send_limit_ms),
            verbose: self.verbose,
        }
    }
}

impl RuleConfig {
    pub fn build(&self) -> Result<Rule> {
        let filter = self.filter.build().context("Invalid filter")?;
        let transform = self.transform.build().context("Invalid transform")?;
        let generator = self.generator.build().context("Invalid generator")?;

        let rule = Rule::new(&self.name, filter, transform, generator);
        Ok(if self.generator.drop_duplicates {
            rule.with_drop_duplicates(Duration::from_millis(
                self.generator.drop_duplicates_timeout_ms,
            ))
        } else {
            rule
        })
    }
}

impl FilterConfig {
    pub fn build(&self) -> Result<Filter> {
        let msg_type = parse_msg_type(&self.msg_type)?;
        if msg_type == MsgType::SysEx {
            let kind = FilterKind::SysEx(settings(&self.settings)?);
            return Ok(Filter::new(Channel::Any, kind)?);
        }

        let channel = required_channel(self.channel.as_ref())?;
        let s = &self.settings;
        let kind = match msg_type {
            MsgType::NoteOn => FilterKind::NoteOn(settings(s)?),
            MsgType::NoteOff => FilterKind::NoteOff(settings(s)?),
            MsgType::Aftertouch => FilterKind::Aftertouch(settings(s)?),
            MsgType::ControlChange => FilterKind::ControlChange(settings(s)?),
            MsgType::ProgramChange => FilterKind::ProgramChange(settings(s)?),
            MsgType::ChannelPressure => FilterKind::ChannelPressure(settings(s)?),
            MsgType::PitchWheel => FilterKind::PitchWheel(settings(s)?),
            other => return Err(FilterError::UnsupportedType(other).into()),
        };
        Ok(Filter::new(channel, kind)?)
    }
}

impl TransformConfig {
    pub fn build(&self) -> Result<Transform> {
        let mode = parse_mode(&self.mode)?;
        let noise = match (mode, &self.noise_settings) {
            (TransformMode::Noise, Some(noise)) => Some(noise.build().context("Invalid noise settings")?),
            _ => None,
        };

        Ok(Transform::new(
            mode,
            self.from_min,
            self.from_max,
            self.to_min,
            self.to_max,
            noise,
        )?)
    }
}

impl NoiseConfig {
    pub fn build(&self) -> Result<NoiseSettings> {
        Ok(NoiseSettings::new(
            parse_msg_type(&self.msg_type)?,
            parse_channel(&self.channel)?,
            self.min_value,
            self.max_value,
            self.delay_ms_min,
            self.delay_ms_max,
        )?)
    }
}

impl GeneratorConfig {
    pub fn build(&self) -> Result<Generator> {
        let msg_type = parse_msg_type(&self.msg_type)?;
        if msg_type == MsgType::SysEx {
            return Ok(Generator::sysex(settings(&self.settings)?)?);
        }

        let channel = required_channel(self.channel.as_ref())?;
        let s = &self.settings;
        let kind = match msg_type {
            MsgType::NoteOn => GeneratorKind::NoteOn(settings(s)?),
            MsgType::NoteOff => GeneratorKind::NoteOff(settings(s)?),
            MsgType::Aftertouch => GeneratorKind::Aftertouch(settings(s)?),
            MsgType::ControlChange => GeneratorKind::ControlChange(settings(s)?),
            MsgType::ProgramChange => GeneratorKind::ProgramChange(settings(s)?),
            MsgType::ChannelPressure => GeneratorKind::ChannelPressure(settings(s)?),
            MsgType::PitchWheel => GeneratorKind::PitchWheel(settings(s)?),
            other => return Err(GeneratorError::UnsupportedType(other).into()),
        };
        Ok(Generator::new(channel, kind)?)
    }
}

/// Parse type-specific settings; a missing block means defaults
fn settings<T: DeserializeOwned + Default>(value: &serde_yaml::Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(value.clone()).context("Invalid settings")
}

fn required_channel(channel: Option<&ChannelField>) -> Result<Channel> {
    match channel {
        Some(channel) => parse_channel(channel),
        None => anyhow::bail!("Channel is required"),
    }
}

pub fn parse_msg_type(name: &str) -> Result<MsgType> {
    let msg_type = match name {
        "Note On" => MsgType::NoteOn,
        "Note Off" => MsgType::NoteOff,
        "Aftertouch" => MsgType::Aftertouch,
        "Control Change" => MsgType::ControlChange,
        "Program Change" => MsgType::ProgramChange,
        "Channel Pressure" => MsgType::ChannelPressure,
        "Pitch Wheel" => MsgType::PitchWheel,
        "SysEx" => MsgType::SysEx,
        "*" => MsgType::Any,
        _ => anyhow::bail!("Invalid message type: '{}'", name),
    };
    Ok(msg_type)
}

pub fn parse_channel(channel: &ChannelField) -> Result<Channel> {
    let parsed = match channel {
        ChannelField::Text(text) if text == "*" => Some(Channel::Any),
        ChannelField::Text(text) => text.parse().ok().and_then(Channel::new),
        ChannelField::Number(number) => Channel::new(*number),
    };
    parsed.with_context(|| format!("Invalid MIDI channel value: {:?}", channel))
}

pub fn parse_mode(name: &str) -> Result<TransformMode> {
    let mode = match name {
        "" | "None" => TransformMode::None,
        "Linear" => TransformMode::Linear,
        "LinearDrop" => TransformMode::LinearDrop,
        "Noise" => TransformMode::Noise,
        "PreventRunningStatus" => TransformMode::PreventRunningStatus,
        _ => anyhow::bail!("Invalid transform mode: '{}'", name),
    };
    Ok(mode)
}
