//! Value cells and the fixed-size arena that owns them.

pub mod arena;
mod json;
mod size;
pub mod value;

pub use arena::{Arena, ArenaStats, CellInit, ErrorFlag};
pub use value::{CellKind, Value};

pub(crate) use arena::{ArenaState, Backing, CellId, Payload, ViewHeader};
