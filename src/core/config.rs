//! Purpose: Parse and validate declarative limb lists into a typed, immutable `Config`.
//! Exports: `Config`, `LimbDeclaration`, `PinDecl`, `SerialDecl`, `parse_and_validate`.
//! Role: Boundary where loosely-typed JSON becomes closed variants; pure, no Registry access.
//! Invariants: Names are non-empty and unique; each physical resource is bound at most once.
//! Invariants: Pins carry a direction; serial limbs never do.
//! Invariants: Each failure reports its own kind (malformed, duplicate, direction, resource).
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Error, ErrorKind};
use super::hardware::{
    Direction, FlowControl, Hardware, Level, Parity, ResourceClass, ResourceId, SerialSettings,
};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PinDecl {
    pub name: String,
    pub resource: ResourceId,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<Level>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SerialDecl {
    pub name: String,
    pub resource: ResourceId,
    #[serde(flatten)]
    pub settings: SerialSettings,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LimbDeclaration {
    Pin(PinDecl),
    Serial(SerialDecl),
}

impl LimbDeclaration {
    pub fn name(&self) -> &str {
        match self {
            LimbDeclaration::Pin(pin) => &pin.name,
            LimbDeclaration::Serial(serial) => &serial.name,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        match self {
            LimbDeclaration::Pin(pin) => &pin.resource,
            LimbDeclaration::Serial(serial) => &serial.resource,
        }
    }

    fn class(&self) -> ResourceClass {
        match self {
            LimbDeclaration::Pin(_) => ResourceClass::Gpio,
            LimbDeclaration::Serial(_) => ResourceClass::Uart,
        }
    }
}

/// An ordered, validated list of limb declarations.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Config {
    declarations: Vec<LimbDeclaration>,
}

impl Config {
    pub fn declarations(&self) -> &[LimbDeclaration] {
        &self.declarations
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.declarations.iter().map(LimbDeclaration::name)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

// Loose shape of one entry; everything optional so each omission gets its own error kind.
// Unknown keys are rejected so a misspelled setting never falls back to its default.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawDeclaration {
    name: Option<String>,
    kind: Option<String>,
    direction: Option<Value>,
    resource: Option<String>,
    init: Option<String>,
    baud_rate: Option<u32>,
    char_size: Option<u8>,
    parity: Option<Parity>,
    stop_bits: Option<u8>,
    flow_control: Option<FlowControl>,
}

impl RawDeclaration {
    fn has_serial_settings(&self) -> bool {
        self.baud_rate.is_some()
            || self.char_size.is_some()
            || self.parity.is_some()
            || self.stop_bits.is_some()
            || self.flow_control.is_some()
    }
}

/// Parses `payload` and checks it against the resources `hardware` can resolve.
pub fn parse_and_validate(payload: &[u8], hardware: &dyn Hardware) -> Result<Config, Error> {
    let entries: Vec<Value> = serde_json::from_slice(payload).map_err(|err| {
        Error::new(ErrorKind::Malformed)
            .with_message("configuration must be a JSON list of limb declarations")
            .with_source(err)
    })?;

    let mut names = HashSet::new();
    let mut resources = HashSet::new();
    let mut declarations = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let raw: RawDeclaration = serde_json::from_value(entry).map_err(|err| {
            Error::new(ErrorKind::Malformed)
                .with_message(format!("entry {index} is not a valid limb declaration"))
                .with_source(err)
        })?;
        let declaration = typed_declaration(index, raw)?;

        if !names.insert(declaration.name().to_string()) {
            return Err(Error::new(ErrorKind::DuplicateName)
                .with_message("limb names must be unique within a configuration")
                .with_limb(declaration.name()));
        }
        if !hardware.resolves(declaration.resource(), declaration.class()) {
            let expected = match declaration.class() {
                ResourceClass::Gpio => "a GPIO line",
                ResourceClass::Uart => "a UART",
            };
            return Err(Error::new(ErrorKind::UnknownResource)
                .with_message(format!("resource is not {expected} on this board"))
                .with_limb(declaration.name())
                .with_resource(declaration.resource().as_str()));
        }
        if !resources.insert(declaration.resource().clone()) {
            return Err(Error::new(ErrorKind::ResourceConflict)
                .with_message("a physical resource may be bound to only one limb")
                .with_limb(declaration.name())
                .with_resource(declaration.resource().as_str()));
        }
        declarations.push(declaration);
    }

    Ok(Config { declarations })
}

fn typed_declaration(index: usize, raw: RawDeclaration) -> Result<LimbDeclaration, Error> {
    let name = match raw.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(Error::new(ErrorKind::Malformed)
                .with_message(format!("entry {index} needs a non-empty name")));
        }
    };
    if name.contains('/') {
        return Err(Error::new(ErrorKind::Malformed)
            .with_message("limb names must not contain '/'")
            .with_limb(name));
    }
    // `/limb/.` and `/limb/..` are normalized away by HTTP clients.
    if name == "." || name == ".." {
        return Err(Error::new(ErrorKind::Malformed)
            .with_message("limb names must not be '.' or '..'")
            .with_limb(name));
    }
    let resource = match raw.resource.as_deref().map(str::trim) {
        Some(resource) if !resource.is_empty() => ResourceId::new(resource),
        _ => {
            return Err(Error::new(ErrorKind::Malformed)
                .with_message("declaration needs a resource")
                .with_limb(name));
        }
    };

    match raw.kind.as_deref() {
        Some("pin") => {
            let direction = pin_direction(&name, raw.direction.as_ref())?;
            if raw.has_serial_settings() {
                return Err(Error::new(ErrorKind::Malformed)
                    .with_message("serial settings are not valid on a pin")
                    .with_limb(name));
            }
            let init = match raw.init.as_deref() {
                None => None,
                Some(_) if direction == Direction::Input => {
                    return Err(Error::new(ErrorKind::InvalidDirection)
                        .with_message("init is only valid on output pins")
                        .with_limb(name));
                }
                Some(text) => Some(
                    text.parse::<Level>()
                        .map_err(|_| {
                            Error::new(ErrorKind::Malformed)
                                .with_message(format!("init must be High or Low, got {text:?}"))
                                .with_limb(name.clone())
                        })?,
                ),
            };
            Ok(LimbDeclaration::Pin(PinDecl {
                name,
                resource,
                direction,
                init,
            }))
        }
        Some("serial") => {
            if raw.direction.is_some() {
                return Err(Error::new(ErrorKind::InvalidDirection)
                    .with_message("serial limbs are bidirectional and take no direction")
                    .with_limb(name));
            }
            if raw.init.is_some() {
                return Err(Error::new(ErrorKind::Malformed)
                    .with_message("init is not valid on a serial limb")
                    .with_limb(name));
            }
            let settings = serial_settings(&name, &raw)?;
            Ok(LimbDeclaration::Serial(SerialDecl {
                name,
                resource,
                settings,
            }))
        }
        Some(other) => Err(Error::new(ErrorKind::Malformed)
            .with_message(format!("unknown limb kind {other:?}"))
            .with_hint("Use \"pin\" or \"serial\".")
            .with_limb(name)),
        None => Err(Error::new(ErrorKind::Malformed)
            .with_message("declaration needs a kind")
            .with_hint("Use \"pin\" or \"serial\".")
            .with_limb(name)),
    }
}

fn pin_direction(name: &str, direction: Option<&Value>) -> Result<Direction, Error> {
    match direction.and_then(Value::as_str) {
        Some("input") => Ok(Direction::Input),
        Some("output") => Ok(Direction::Output),
        Some(other) => Err(Error::new(ErrorKind::InvalidDirection)
            .with_message(format!("unknown pin direction {other:?}"))
            .with_hint("Use \"input\" or \"output\".")
            .with_limb(name)),
        None => Err(Error::new(ErrorKind::InvalidDirection)
            .with_message("pin declarations need a direction")
            .with_hint("Use \"input\" or \"output\".")
            .with_limb(name)),
    }
}

fn serial_settings(name: &str, raw: &RawDeclaration) -> Result<SerialSettings, Error> {
    let defaults = SerialSettings::default();
    let settings = SerialSettings {
        baud_rate: raw.baud_rate.unwrap_or(defaults.baud_rate),
        char_size: raw.char_size.unwrap_or(defaults.char_size),
        parity: raw.parity.unwrap_or(defaults.parity),
        stop_bits: raw.stop_bits.unwrap_or(defaults.stop_bits),
        flow_control: raw.flow_control.unwrap_or(defaults.flow_control),
    };
    let invalid = |message: &str| {
        Err(Error::new(ErrorKind::Malformed)
            .with_message(message.to_string())
            .with_limb(name))
    };
    if settings.baud_rate == 0 {
        return invalid("baud-rate must be greater than zero");
    }
    if !(5..=8).contains(&settings.char_size) {
        return invalid("char-size must be 5, 6, 7 or 8");
    }
    if !matches!(settings.stop_bits, 1 | 2) {
        return invalid("stop-bits must be 1 or 2");
    }
    Ok(settings)
}
