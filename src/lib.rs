//! Purpose: Shared library crate used by the `phal` CLI, the HTTP server, and tests.
//! Exports: `core` (config, registry, handlers, hardware seam, errors), `api` (public surface).
//! Role: Hardware abstraction for named limbs; the binary is a thin shell over this crate.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
//! Invariants: Hardware access only flows through the `Hardware` trait.
pub mod api;
pub mod core;
