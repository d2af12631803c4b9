//! Purpose: Read and write digital levels on a bound pin, enforcing its direction.
//! Exports: `get`, `set`, `check_direction`.
//! Role: Pin Handler; relays to the Hardware Capability and keeps no state of its own.
//! Invariants: Reads only on Input pins, writes only on Output pins (`Direction` otherwise).
//! Invariants: Calls on one resource are serialized by its guard; other pins never wait.
use std::sync::PoisonError;

use tracing::debug;

use super::error::{Error, ErrorKind};
use super::hardware::{Direction, Hardware, Level};
use super::registry::PinHandle;

/// Fails with `Direction` unless `handle` was bound as `wanted`.
pub fn check_direction(handle: &PinHandle, wanted: Direction) -> Result<(), Error> {
    if handle.direction == wanted {
        return Ok(());
    }
    let message = match wanted {
        Direction::Input => "pin is output-only and cannot be read",
        Direction::Output => "pin is input-only and cannot be written",
    };
    Err(Error::new(ErrorKind::Direction)
        .with_message(message)
        .with_resource(handle.resource.as_str()))
}

/// Current level of an Input pin, read from hardware at call time.
pub fn get(handle: &PinHandle, hardware: &dyn Hardware) -> Result<Level, Error> {
    check_direction(handle, Direction::Input)?;
    let _guard = handle.guard.lock().unwrap_or_else(PoisonError::into_inner);
    let level = hardware.read_pin(&handle.resource)?;
    debug!(resource = %handle.resource, %level, "pin read");
    Ok(level)
}

pub fn set(handle: &PinHandle, hardware: &dyn Hardware, level: Level) -> Result<(), Error> {
    check_direction(handle, Direction::Output)?;
    let _guard = handle.guard.lock().unwrap_or_else(PoisonError::into_inner);
    hardware.write_pin(&handle.resource, level)?;
    debug!(resource = %handle.resource, %level, "pin write");
    Ok(())
}
