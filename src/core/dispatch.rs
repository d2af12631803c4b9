//! Purpose: Route limb requests to the pin or serial handler bound under the current Registry.
//! Exports: `Dispatcher`, `Request`, `Response`, `LimbValue`.
//! Role: Single entry point shared by the HTTP server, the CLI, and in-process callers.
//! Invariants: Each request resolves against exactly one Registry snapshot taken at entry.
//! Invariants: Config payloads are fully validated before anything touches hardware.
//! Notes: All methods block on hardware; async callers run them on a blocking thread.
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use super::config::parse_and_validate;
use super::error::Error;
use super::hardware::{Direction, Hardware, Level};
use super::registry::{LimbHandle, LimbRegistry, RegistryCell};
use super::{pin, serial};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    GetLimb { name: String },
    SetLimb { name: String, payload: Vec<u8> },
    ApplyConfig { payload: Vec<u8> },
}

/// What a `GetLimb` yields: a level for pins, drained bytes for serial limbs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LimbValue {
    Level(Level),
    Bytes(Vec<u8>),
}

impl LimbValue {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            LimbValue::Level(level) => level.as_str().as_bytes().to_vec(),
            LimbValue::Bytes(bytes) => bytes,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Value { generation: u64, value: LimbValue },
    Written { generation: u64 },
    Applied { generation: u64 },
}

impl Response {
    pub fn generation(&self) -> u64 {
        match self {
            Response::Value { generation, .. }
            | Response::Written { generation }
            | Response::Applied { generation } => *generation,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RegistryCell>,
    hardware: Arc<dyn Hardware>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("generation", &self.registry.current().generation())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Starts with an empty Registry; every name is `NotFound` until a config is applied.
    pub fn new(hardware: Arc<dyn Hardware>) -> Self {
        Self {
            registry: Arc::new(RegistryCell::new()),
            hardware,
        }
    }

    pub fn current(&self) -> Arc<LimbRegistry> {
        self.registry.current()
    }

    pub fn apply_config(&self, payload: &[u8]) -> Result<Arc<LimbRegistry>, Error> {
        let config = parse_and_validate(payload, self.hardware.as_ref())?;
        self.registry.publish(config, self.hardware.as_ref())
    }

    pub fn get_limb(&self, name: &str) -> Result<(u64, LimbValue), Error> {
        let registry = self.registry.current();
        let value = self.get_limb_in(&registry, name)?;
        Ok((registry.generation(), value))
    }

    /// Like [`Dispatcher::get_limb`], against a snapshot the caller already took.
    pub fn get_limb_in(&self, registry: &LimbRegistry, name: &str) -> Result<LimbValue, Error> {
        let value = match registry.resolve(name)? {
            LimbHandle::Pin(handle) => pin::get(handle, self.hardware.as_ref())
                .map(LimbValue::Level)
                .map_err(|err| err.with_limb(name))?,
            LimbHandle::Serial(handle) => serial::receive(handle, self.hardware.as_ref())
                .map(LimbValue::Bytes)
                .map_err(|err| err.with_limb(name))?,
        };
        debug!(limb = name, generation = registry.generation(), "limb get");
        Ok(value)
    }

    pub fn set_limb(&self, name: &str, payload: &[u8]) -> Result<u64, Error> {
        let registry = self.registry.current();
        self.set_limb_in(&registry, name, payload)?;
        Ok(registry.generation())
    }

    /// Like [`Dispatcher::set_limb`], against a snapshot the caller already took.
    pub fn set_limb_in(
        &self,
        registry: &LimbRegistry,
        name: &str,
        payload: &[u8],
    ) -> Result<(), Error> {
        let written = match registry.resolve(name)? {
            // Direction is checked before the body is parsed.
            LimbHandle::Pin(handle) => pin::check_direction(handle, Direction::Output)
                .and_then(|()| Level::from_str(&String::from_utf8_lossy(payload)))
                .and_then(|level| pin::set(handle, self.hardware.as_ref(), level)),
            LimbHandle::Serial(handle) => serial::send(handle, self.hardware.as_ref(), payload),
        };
        written.map_err(|err| err.with_limb(name))?;
        debug!(limb = name, generation = registry.generation(), "limb set");
        Ok(())
    }

    pub fn dispatch(&self, request: Request) -> Result<Response, Error> {
        match request {
            Request::GetLimb { name } => {
                let (generation, value) = self.get_limb(&name)?;
                Ok(Response::Value { generation, value })
            }
            Request::SetLimb { name, payload } => {
                let generation = self.set_limb(&name, &payload)?;
                Ok(Response::Written { generation })
            }
            Request::ApplyConfig { payload } => {
                let registry = self.apply_config(&payload)?;
                Ok(Response::Applied {
                    generation: registry.generation(),
                })
            }
        }
    }
}
