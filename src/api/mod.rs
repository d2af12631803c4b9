//! Purpose: Define the stable public Rust API boundary for `phal`.
//! Exports: Core types and operations needed by the CLI, the server, and embedders.
//! Role: Public, additive-only surface; hides handler and registry internals.
//! Invariants: Hardware backends plug in only through `Hardware`.

mod remote;

pub use crate::core::config::{Config, LimbDeclaration, PinDecl, SerialDecl, parse_and_validate};
pub use crate::core::dispatch::{Dispatcher, LimbValue, Request, Response};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::hardware::{
    Direction, FlowControl, Hardware, Level, Parity, ResourceClass, ResourceId, SerialSettings,
};
pub use crate::core::registry::LimbRegistry;
pub use crate::core::sim::{BoardSpec, SimulatedBoard};
pub use remote::{ActiveConfig, GENERATION_HEADER, RemoteClient};
