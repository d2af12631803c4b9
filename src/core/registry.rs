//! Purpose: Hold the immutable limb-name → bound-resource mapping and its atomic publication.
//! Exports: `LimbRegistry`, `LimbHandle`, `PinHandle`, `SerialHandle`, `RegistryCell`.
//! Role: One Registry per configuration generation; readers take a snapshot per request.
//! Invariants: A published Registry is never mutated; a new Config replaces it as a unit.
//! Invariants: Publish is all-or-nothing; on any bind failure the current Registry stays live
//! and hardware writes made by the failed build are reverted.
//! Invariants: Operation locks are keyed by physical resource and live as long as the cell,
//! so generations that bind the same resource share them even across a gap.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{info, warn};

use super::config::{Config, LimbDeclaration};
use super::error::{Error, ErrorKind};
use super::hardware::{Direction, Hardware, Level, ResourceId, SerialSettings};
use super::pin;

#[derive(Clone, Debug)]
pub struct PinHandle {
    pub(crate) resource: ResourceId,
    pub(crate) direction: Direction,
    pub(crate) guard: Arc<Mutex<()>>,
}

impl PinHandle {
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Serial binding; send and receive paths are locked independently.
#[derive(Clone, Debug)]
pub struct SerialHandle {
    pub(crate) resource: ResourceId,
    pub(crate) settings: SerialSettings,
    pub(crate) tx: Arc<Mutex<()>>,
    pub(crate) rx: Arc<Mutex<()>>,
}

impl SerialHandle {
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

#[derive(Clone, Debug)]
pub enum LimbHandle {
    Pin(PinHandle),
    Serial(SerialHandle),
}

impl LimbHandle {
    pub fn resource(&self) -> &ResourceId {
        match self {
            LimbHandle::Pin(pin) => pin.resource(),
            LimbHandle::Serial(serial) => serial.resource(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LimbRegistry {
    generation: u64,
    config: Config,
    limbs: HashMap<String, LimbHandle>,
}

impl LimbRegistry {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.limbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limbs.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.limbs.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&LimbHandle, Error> {
        self.limbs.get(name).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("that limb does not exist")
                .with_limb(name)
        })
    }

    /// Builds the next generation from `config`, binding every declaration to `hardware`.
    ///
    /// Binding only claims resources; serial settings and init levels are written
    /// afterwards and undone if any of those writes fails.
    fn build(
        previous: &LimbRegistry,
        config: Config,
        hardware: &dyn Hardware,
        locks: &mut ResourceLocks,
    ) -> Result<LimbRegistry, Error> {
        let mut limbs = HashMap::with_capacity(config.len());
        for declaration in config.declarations() {
            let handle = match declaration {
                LimbDeclaration::Pin(decl) => {
                    hardware
                        .claim_pin(&decl.resource, decl.direction)
                        .map_err(|err| bind_error(err, &decl.name))?;
                    LimbHandle::Pin(PinHandle {
                        resource: decl.resource.clone(),
                        direction: decl.direction,
                        guard: locks.pin(&decl.resource),
                    })
                }
                LimbDeclaration::Serial(decl) => {
                    let (tx, rx) = locks.serial(&decl.resource);
                    LimbHandle::Serial(SerialHandle {
                        resource: decl.resource.clone(),
                        settings: decl.settings,
                        tx,
                        rx,
                    })
                }
            };
            limbs.insert(declaration.name().to_string(), handle);
        }

        let next = LimbRegistry {
            generation: previous.generation + 1,
            config,
            limbs,
        };
        let mut undo = Vec::new();
        if let Err(err) = next.apply(hardware, &mut undo) {
            restore(previous, hardware, undo);
            return Err(err);
        }
        Ok(next)
    }

    /// Writes serial settings, then init levels, recording what each write replaced.
    fn apply(&self, hardware: &dyn Hardware, undo: &mut Vec<Undo>) -> Result<(), Error> {
        for declaration in self.config.declarations() {
            if let LimbDeclaration::Serial(decl) = declaration {
                undo.push(Undo::Serial(decl.resource.clone()));
                hardware
                    .configure_serial(&decl.resource, &decl.settings)
                    .map_err(|err| bind_error(err, &decl.name))?;
            }
        }

        for declaration in self.config.declarations() {
            let LimbDeclaration::Pin(decl) = declaration else {
                continue;
            };
            let (Some(level), Some(LimbHandle::Pin(handle))) = (decl.init, self.limbs.get(&decl.name))
            else {
                continue;
            };
            let prior = hardware
                .read_pin(&handle.resource)
                .map_err(|err| bind_error(err, &decl.name))?;
            undo.push(Undo::Pin(handle.clone(), prior));
            pin::set(handle, hardware, level).map_err(|err| bind_error(err, &decl.name))?;
        }
        Ok(())
    }

    fn serial_settings_on(&self, resource: &ResourceId) -> Option<SerialSettings> {
        self.limbs.values().find_map(|handle| match handle {
            LimbHandle::Serial(serial) if &serial.resource == resource => Some(serial.settings),
            _ => None,
        })
    }
}

/// Hardware state overwritten by a publish that has not completed yet.
enum Undo {
    Serial(ResourceId),
    Pin(PinHandle, Level),
}

// Newest write first. Serial lines the previous generation did not bind are left as written.
fn restore(previous: &LimbRegistry, hardware: &dyn Hardware, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        let (resource, restored) = match &step {
            Undo::Serial(resource) => match previous.serial_settings_on(resource) {
                Some(settings) => (resource, hardware.configure_serial(resource, &settings)),
                None => continue,
            },
            Undo::Pin(handle, level) => (&handle.resource, pin::set(handle, hardware, *level)),
        };
        if let Err(err) = restored {
            warn!(%resource, error = %err, "could not restore resource after failed publish");
        }
    }
}

/// Per-resource operation locks, shared by every generation that binds the resource.
#[derive(Debug, Default)]
struct ResourceLocks {
    pins: HashMap<ResourceId, Arc<Mutex<()>>>,
    serial: HashMap<ResourceId, (Arc<Mutex<()>>, Arc<Mutex<()>>)>,
}

impl ResourceLocks {
    fn pin(&mut self, resource: &ResourceId) -> Arc<Mutex<()>> {
        self.pins.entry(resource.clone()).or_default().clone()
    }

    fn serial(&mut self, resource: &ResourceId) -> (Arc<Mutex<()>>, Arc<Mutex<()>>) {
        self.serial.entry(resource.clone()).or_default().clone()
    }
}

fn bind_error(err: Error, limb: &str) -> Error {
    if err.limb().is_some() {
        err
    } else {
        err.with_limb(limb)
    }
}

/// The single "current" Registry, swapped atomically on publish.
pub struct RegistryCell {
    current: ArcSwap<LimbRegistry>,
    // Held for the whole publish; the lock table only changes under it.
    publish: Mutex<ResourceLocks>,
}

impl Default for RegistryCell {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryCell {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(LimbRegistry::default()),
            publish: Mutex::new(ResourceLocks::default()),
        }
    }

    /// Snapshot to serve one request against; never re-read mid-request.
    pub fn current(&self) -> Arc<LimbRegistry> {
        self.current.load_full()
    }

    pub fn publish(
        &self,
        config: Config,
        hardware: &dyn Hardware,
    ) -> Result<Arc<LimbRegistry>, Error> {
        // Publishers queue so generations stay dense and each build starts from the latest registry.
        let mut locks = self
            .publish
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = self.current();
        match LimbRegistry::build(&previous, config, hardware, &mut locks) {
            Ok(next) => {
                let next = Arc::new(next);
                self.current.store(next.clone());
                info!(
                    generation = next.generation(),
                    limbs = next.len(),
                    "registry published"
                );
                Ok(next)
            }
            Err(err) => {
                warn!(
                    generation = previous.generation(),
                    error = %err,
                    "registry bind failed; keeping current generation"
                );
                Err(err)
            }
        }
    }
}
