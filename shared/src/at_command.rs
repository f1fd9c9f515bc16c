//! AT-command text protocol
//!
//! Older drones take text commands over UDP:
//! ```text
//! <TYPE>=<seq>,<arg1>,<arg2>,...\r
//! ```
//! The sequence number increases by one per command within a session. The
//! drone drops any command whose number is lower than the last one it saw.

use std::fmt;

/// Bit 9 of `AT*REF`: take off when set, land when clear
const REF_TAKE_OFF_BIT: u32 = 1 << 9;
/// Bit 8 of `AT*REF`: toggle emergency mode
const REF_EMERGENCY_BIT: u32 = 1 << 8;
/// Bits 18, 20, 22, 24 and 28 are always set in `AT*REF`
const REF_BASE: u32 = (1 << 18) | (1 << 20) | (1 << 22) | (1 << 24) | (1 << 28);

#[derive(Debug, Clone, PartialEq)]
pub enum AtCommand {
    /// Take-off, landing and emergency bit field
    Ref { input: u32 },
    /// Progressive move. Arguments are fractions in [-1, 1].
    Pcmd {
        progressive: bool,
        roll: f32,
        pitch: f32,
        gaz: f32,
        yaw: f32,
    },
    /// Calibrate the horizontal plane; only valid while landed
    FlatTrim,
    /// Push a configuration key
    Config { key: String, value: String },
    /// Reset the communication watchdog
    ComWdg,
    /// Calibrate a sensor (0 = magnetometer)
    Calib { device: u32 },
}

impl AtCommand {
    pub fn take_off() -> Self {
        Self::Ref {
            input: REF_BASE | REF_TAKE_OFF_BIT,
        }
    }

    pub fn land() -> Self {
        Self::Ref { input: REF_BASE }
    }

    pub fn emergency() -> Self {
        Self::Ref {
            input: REF_BASE | REF_EMERGENCY_BIT,
        }
    }

    pub fn config(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Command name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ref { .. } => "AT*REF",
            Self::Pcmd { .. } => "AT*PCMD",
            Self::FlatTrim => "AT*FTRIM",
            Self::Config { .. } => "AT*CONFIG",
            Self::ComWdg => "AT*COMWDG",
            Self::Calib { .. } => "AT*CALIB",
        }
    }

    /// Render the command with a sequence number
    pub fn encode(&self, seq: u32) -> String {
        SequencedCommand { seq, command: self }.to_string()
    }
}

/// Floats travel as the signed integer sharing their IEEE-754 bit pattern
fn float_arg(value: f32) -> i32 {
    value.clamp(-1.0, 1.0).to_bits() as i32
}

struct SequencedCommand<'a> {
    seq: u32,
    command: &'a AtCommand,
}

impl fmt::Display for SequencedCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.command.kind(), self.seq)?;
        match self.command {
            AtCommand::Ref { input } => write!(f, ",{input}")?,
            AtCommand::Pcmd {
                progressive,
                roll,
                pitch,
                gaz,
                yaw,
            } => write!(
                f,
                ",{},{},{},{},{}",
                *progressive as u8,
                float_arg(*roll),
                float_arg(*pitch),
                float_arg(*gaz),
                float_arg(*yaw)
            )?,
            AtCommand::FlatTrim | AtCommand::ComWdg => {}
            AtCommand::Config { key, value } => write!(f, ",\"{key}\",\"{value}\"")?,
            AtCommand::Calib { device } => write!(f, ",{device}")?,
        }
        f.write_str("\r")
    }
}

/// Per-session sequence numbering, starting at 1
#[derive(Debug)]
pub struct AtSequencer {
    next: u32,
}

impl Default for AtSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl AtSequencer {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Encode a command with the next sequence number
    pub fn encode(&mut self, command: &AtCommand) -> String {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        command.encode(seq)
    }

    /// Encode several commands into one datagram
    pub fn encode_all<'a>(&mut self, commands: impl IntoIterator<Item = &'a AtCommand>) -> String {
        commands.into_iter().map(|c| self.encode(c)).collect()
    }

    /// Restart numbering, as the drone expects after a reconnect
    pub fn reset(&mut self) {
        self.next = 1;
    }
}
