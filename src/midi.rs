//! MIDI wire types and framing
//!
//! Provides the raw packet type, status byte decoding (message type and
//! channel) and the splitter that cuts a driver buffer into discrete messages.

use std::fmt;

/// Longest fixed-size MIDI message (status + two data bytes)
pub const MAX_MESSAGE_LEN: usize = 3;

/// System Exclusive start byte
pub const SYSEX_START: u8 = 0xF0;

/// System Exclusive end byte
pub const SYSEX_END: u8 = 0xF7;

/// System real-time Stop
pub const STOP: u8 = 0xFC;

/// Controller numbers used by the panic sequence
pub const CC_RESET_ALL_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Raw MIDI bytes as delivered by (or handed to) the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    /// Driver timestamp in microseconds
    timestamp: u64,
}

impl Packet {
    pub fn new(data: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            data: data.into(),
            timestamp,
        }
    }

    /// Build a new packet carrying this packet's timestamp
    pub fn derive(&self, data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, self.timestamp)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn status(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Message type derived from the status byte
    pub fn msg_type(&self) -> MsgType {
        self.status().map(MsgType::from_status).unwrap_or(MsgType::Unknown)
    }

    /// Channel derived from the status byte (None for system messages)
    pub fn channel(&self) -> Option<Channel> {
        self.status().and_then(Channel::from_status)
    }

    /// Data byte at `index` (1 = first data byte)
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    pub fn is_stop(&self) -> bool {
        self.status() == Some(STOP)
    }

    pub fn is_sysex(&self) -> bool {
        self.status() == Some(SYSEX_START)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex(&self.data))
    }
}

/// MIDI message types
///
/// `Any` only appears in filter configuration; `Unknown` covers system
/// messages other than SysEx and stray data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    NoteOff,
    NoteOn,
    Aftertouch,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchWheel,
    SysEx,
    Any,
    Unknown,
}

impl MsgType {
    /// Decode the message type from a status byte
    pub fn from_status(status: u8) -> Self {
        match status >> 4 {
            0x8 => MsgType::NoteOff,
            0x9 => MsgType::NoteOn,
            0xA => MsgType::Aftertouch,
            0xB => MsgType::ControlChange,
            0xC => MsgType::ProgramChange,
            0xD => MsgType::ChannelPressure,
            0xE => MsgType::PitchWheel,
            _ if status == SYSEX_START => MsgType::SysEx,
            _ => MsgType::Unknown,
        }
    }

    /// High nibble of the status byte for channel messages
    pub fn nibble(self) -> Option<u8> {
        match self {
            MsgType::NoteOff => Some(0x8),
            MsgType::NoteOn => Some(0x9),
            MsgType::Aftertouch => Some(0xA),
            MsgType::ControlChange => Some(0xB),
            MsgType::ProgramChange => Some(0xC),
            MsgType::ChannelPressure => Some(0xD),
            MsgType::PitchWheel => Some(0xE),
            MsgType::SysEx | MsgType::Any | MsgType::Unknown => None,
        }
    }

    /// Number of data bytes following the status byte for channel messages
    pub fn data_len(self) -> Option<usize> {
        match self {
            MsgType::ProgramChange | MsgType::ChannelPressure => Some(1),
            MsgType::NoteOff
            | MsgType::NoteOn
            | MsgType::Aftertouch
            | MsgType::ControlChange
            | MsgType::PitchWheel => Some(2),
            MsgType::SysEx | MsgType::Any | MsgType::Unknown => None,
        }
    }

    /// Wildcard-aware comparison against a decoded message type
    pub fn matches(self, other: MsgType) -> bool {
        self == MsgType::Any || other == MsgType::Any || self == other
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgType::NoteOff => "Note Off",
            MsgType::NoteOn => "Note On",
            MsgType::Aftertouch => "Aftertouch",
            MsgType::ControlChange => "Control Change",
            MsgType::ProgramChange => "Program Change",
            MsgType::ChannelPressure => "Channel Pressure",
            MsgType::PitchWheel => "Pitch Wheel",
            MsgType::SysEx => "SysEx",
            MsgType::Any => "*",
            MsgType::Unknown => "?",
        };
        f.write_str(name)
    }
}

/// MIDI channel, 1-16, or the `Any` wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Any,
    Number(u8),
}

impl Channel {
    /// Channel from its 1-based number
    pub fn new(number: u8) -> Option<Self> {
        (1..=16).contains(&number).then_some(Channel::Number(number))
    }

    /// Channel encoded in a status byte (channel messages only)
    pub fn from_status(status: u8) -> Option<Self> {
        (0x80..0xF0)
            .contains(&status)
            .then(|| Channel::Number((status & 0x0F) + 1))
    }

    /// Low nibble of the status byte (0-15)
    pub fn nibble(self) -> Option<u8> {
        match self {
            Channel::Number(n) => Some(n - 1),
            Channel::Any => None,
        }
    }

    /// Wildcard-aware comparison against the channel of a message
    pub fn matches(self, other: Option<Channel>) -> bool {
        match (self, other) {
            (Channel::Any, _) | (_, Some(Channel::Any)) => true,
            (Channel::Number(a), Some(Channel::Number(b))) => a == b,
            (Channel::Number(_), None) => false,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Any => f.write_str("*"),
            Channel::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Total length in bytes of the message introduced by `status`
///
/// Unknown status bytes and stray data bytes count as one byte so the
/// splitter always makes progress.
pub fn message_length(status: u8) -> usize {
    match status & 0xF0 {
        0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => 3,
        0xC0 | 0xD0 => 2,
        0xF0 => match status {
            0xF1 | 0xF3 => 2,
            0xF2 => 3,
            _ => 1,
        },
        _ => 1,
    }
}

/// Split a raw driver packet into discrete messages
///
/// SysEx packets and packets of at most three bytes are yielded whole.
/// A trailing message shorter than its table length is dropped.
pub fn split(packet: &Packet) -> Split<'_> {
    let whole = packet.is_sysex() || packet.len() <= MAX_MESSAGE_LEN;
    Split {
        data: packet.data(),
        timestamp: packet.timestamp(),
        pos: 0,
        whole,
    }
}

/// Single-pass iterator over the messages of one packet
pub struct Split<'a> {
    data: &'a [u8],
    timestamp: u64,
    pos: usize,
    whole: bool,
}

impl Iterator for Split<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let rest = self.data.get(self.pos..).filter(|rest| !rest.is_empty())?;

        let len = if self.whole {
            rest.len()
        } else {
            message_length(rest[0])
        };

        if len > rest.len() {
            self.pos = self.data.len();
            return None;
        }

        self.pos += len;
        Some(Packet::new(&rest[..len], self.timestamp))
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split_bytes(data: &[u8]) -> Vec<Vec<u8>> {
        split(&Packet::new(data, 0))
            .map(|p| p.data().to_vec())
            .collect()
    }

    #[test]
    fn test_status_decoding() {
        assert_eq!(MsgType::from_status(0x90), MsgType::NoteOn);
        assert_eq!(MsgType::from_status(0xB5), MsgType::ControlChange);
        assert_eq!(MsgType::from_status(0xEF), MsgType::PitchWheel);
        assert_eq!(MsgType::from_status(0xF0), MsgType::SysEx);
        assert_eq!(MsgType::from_status(0xFC), MsgType::Unknown);
        assert_eq!(MsgType::from_status(0x40), MsgType::Unknown);

        assert_eq!(Channel::from_status(0x90), Some(Channel::Number(1)));
        assert_eq!(Channel::from_status(0xBF), Some(Channel::Number(16)));
        assert_eq!(Channel::from_status(0xF0), None);
    }

    #[test]
    fn test_channel_wildcards() {
        assert!(Channel::Any.matches(Some(Channel::Number(3))));
        assert!(Channel::Any.matches(None));
        assert!(Channel::Number(3).matches(Some(Channel::Number(3))));
        assert!(!Channel::Number(3).matches(Some(Channel::Number(4))));
        assert!(!Channel::Number(3).matches(None));
        assert_eq!(Channel::new(0), None);
        assert_eq!(Channel::new(17), None);
        assert_eq!(Channel::Number(16).nibble(), Some(15));
    }

    #[test]
    fn test_message_length_table() {
        assert_eq!(message_length(0x80), 3);
        assert_eq!(message_length(0xC3), 2);
        assert_eq!(message_length(0xD0), 2);
        assert_eq!(message_length(0xF1), 2);
        assert_eq!(message_length(0xF2), 3);
        assert_eq!(message_length(0xF3), 2);
        assert_eq!(message_length(0xF8), 1);
        assert_eq!(message_length(0x45), 1);
    }

    #[test]
    fn test_short_packet_is_not_split() {
        assert_eq!(split_bytes(&[0xB0, 7, 100]), vec![vec![0xB0, 7, 100]]);
        assert_eq!(split_bytes(&[0xC0, 5]), vec![vec![0xC0, 5]]);
        assert!(split_bytes(&[]).is_empty());
    }

    #[test]
    fn test_split_concatenated_messages() {
        let data = [0x90, 60, 100, 0xC1, 5, 0xF8, 0xE0, 0x00, 0x40];
        assert_eq!(
            split_bytes(&data),
            vec![
                vec![0x90, 60, 100],
                vec![0xC1, 5],
                vec![0xF8],
                vec![0xE0, 0x00, 0x40],
            ]
        );
    }

    #[test]
    fn test_split_drops_truncated_tail() {
        let data = [0xB0, 7, 100, 0xB0, 7];
        assert_eq!(split_bytes(&data), vec![vec![0xB0, 7, 100]]);
    }

    #[test]
    fn test_sysex_is_never_split() {
        let data = [0xF0, 0x00, 0x20, 0x29, 0x02, 0x0D, 0xF7];
        assert_eq!(split_bytes(&data), vec![data.to_vec()]);
    }

    #[test]
    fn test_split_keeps_timestamp() {
        let packet = Packet::new(vec![0x90, 60, 100, 0x80, 60, 0], 1234);
        assert!(split(&packet).all(|p| p.timestamp() == 1234));
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xB0, 0x07, 0x7F]), "B0 07 7F");
        assert_eq!(format_hex(&[]), "");
    }

    proptest! {
        #[test]
        fn prop_split_follows_length_table(data in proptest::collection::vec(any::<u8>(), 4..64)) {
            prop_assume!(data[0] != SYSEX_START);

            let messages = split_bytes(&data);
            let mut offset = 0;
            for message in &messages {
                prop_assert_eq!(message.len(), message_length(message[0]));
                prop_assert_eq!(&data[offset..offset + message.len()], message.as_slice());
                offset += message.len();
            }

            // Whatever is left over is a single undersized message
            if offset < data.len() {
                prop_assert!(message_length(data[offset]) > data.len() - offset);
            }
        }
    }
}
