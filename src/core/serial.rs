//! Purpose: Send and receive raw bytes on a bound serial channel.
//! Exports: `send`, `receive`.
//! Role: Serial Handler; whole-payload sends and drain-style receives over the Hardware Capability.
//! Invariants: Two sends on one resource never interleave their byte ranges.
//! Invariants: `receive` returns and clears everything buffered; empty when nothing arrived.
//! Notes: No message framing; several sends before one receive come back concatenated.
use std::sync::PoisonError;

use tracing::debug;

use super::error::Error;
use super::hardware::Hardware;
use super::registry::SerialHandle;

pub fn send(handle: &SerialHandle, hardware: &dyn Hardware, bytes: &[u8]) -> Result<(), Error> {
    let _tx = handle.tx.lock().unwrap_or_else(PoisonError::into_inner);
    hardware.write_serial(&handle.resource, bytes)?;
    debug!(resource = %handle.resource, len = bytes.len(), "serial send");
    Ok(())
}

pub fn receive(handle: &SerialHandle, hardware: &dyn Hardware) -> Result<Vec<u8>, Error> {
    let _rx = handle.rx.lock().unwrap_or_else(PoisonError::into_inner);
    let bytes = hardware.drain_serial(&handle.resource)?;
    debug!(resource = %handle.resource, len = bytes.len(), "serial receive");
    Ok(bytes)
}
