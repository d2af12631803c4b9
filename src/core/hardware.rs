//! Purpose: Define the narrow Hardware Capability the limb handlers call into.
//! Exports: `Hardware`, `ResourceId`, `ResourceClass`, `Level`, `Direction`, `SerialSettings`.
//! Role: Seam between limb semantics and physical drivers; implementations are injected.
//! Invariants: Every call is synchronous and bounded; callers never hold it across an await.
//! Invariants: Implementations own pin levels and serial buffers; handlers hold no state.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{Error, ErrorKind};

/// Identifier of a physical resource, e.g. `gpio17` or `uart0`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResourceClass {
    Gpio,
    Uart,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Level {
    High,
    #[default]
    Low,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::High => "High",
            Level::Low => "Low",
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = Error;

    // Surrounding whitespace is tolerated so `echo High | curl -d @-` works.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "High" => Ok(Level::High),
            "Low" => Ok(Level::Low),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid pin level {other:?}"))
                .with_hint("Send the literal text High or Low.")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// Line settings applied to a UART when its limb is published.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub char_size: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            char_size: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

/// Raw pin-level and byte-stream access to physical resources.
///
/// Calls for one resource are never issued concurrently for the same
/// direction of travel; the limb handlers serialize them. Implementations
/// report driver failures as [`ErrorKind::Hardware`].
pub trait Hardware: Send + Sync {
    /// Whether `resource` exists on this board and is of class `class`.
    fn resolves(&self, resource: &ResourceId, class: ResourceClass) -> bool;

    /// Prepares a GPIO line for use in `direction`.
    fn claim_pin(&self, resource: &ResourceId, direction: Direction) -> Result<(), Error>;

    fn read_pin(&self, resource: &ResourceId) -> Result<Level, Error>;

    fn write_pin(&self, resource: &ResourceId, level: Level) -> Result<(), Error>;

    fn configure_serial(
        &self,
        resource: &ResourceId,
        settings: &SerialSettings,
    ) -> Result<(), Error>;

    /// Appends `bytes` to the outbound path of `resource` as one unit.
    fn write_serial(&self, resource: &ResourceId, bytes: &[u8]) -> Result<(), Error>;

    /// Takes everything received on `resource` since the previous drain.
    fn drain_serial(&self, resource: &ResourceId) -> Result<Vec<u8>, Error>;
}
