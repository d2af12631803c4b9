// Core modules: configuration, registry, limb handlers, hardware seam, and errors.
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hardware;
pub mod pin;
pub mod registry;
pub mod serial;
pub mod sim;
