#![cfg_attr(not(feature = "ffi"), forbid(unsafe_code))]

//! SolvraSubstrate v0.1 – the runtime substrate shared by every SolvraScript builtin.
//!
//! The crate exposes four building blocks, each layered on the one before it:
//!
//! * [`memory`] – reference-counted value cells allocated from a fixed-size [`Arena`].
//! * [`view`] – typed views that alias arena-owned or externally-owned byte ranges, plus the
//!   bit-granular `map_in_place` conversion between them.
//! * [`ffi`] – signature parsing and the native call marshaller that turns value cells into a
//!   raw machine call frame (architecture invokers live in `backend`).
//! * [`numeric`] – sum, variance, convolution, FFT and interpolation over value arrays and views.
//!
//! [`SubstrateRuntime`] bundles an arena, a [`sys::hal::HardwareLayer`] and the [`builtins`]
//! table so an execution engine can dispatch scripted calls by name. Unsafe code is only compiled
//! with the `ffi` feature, where raw addresses cannot be avoided.

#[cfg(feature = "ffi")]
pub mod backend;
pub mod builtins;
pub mod config;
pub mod ffi;
pub mod integration;
pub mod memory;
pub mod numeric;
pub mod sys;
pub mod view;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::builtins::Builtins;
use crate::config::{ArenaConfig, RuntimeConfig};
use crate::integration::RuntimeHooks;
use crate::sys::hal::{HardwareLayer, SoftwareHal};

pub use memory::{Arena, ArenaStats, CellInit, CellKind, ErrorFlag, Value};

/// Result type used across SolvraSubstrate.
pub type SubstrateResult<T> = std::result::Result<T, SubstrateError>;

/// Errors surfaced to scripts as exception values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubstrateError {
    #[error("out of memory: requested {requested} {resource}, {available} available")]
    OutOfMemory {
        resource: &'static str,
        requested: usize,
        available: usize,
    },
    #[error("invalid native signature: {0}")]
    Signature(String),
    #[error("expected {expected} arguments, found {found}")]
    ArgumentCount { expected: usize, found: usize },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("{0}")]
    Range(String),
    #[error("array lengths differ ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SubstrateError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        SubstrateError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        SubstrateError::Range(message.into())
    }

    /// Returns the error category used for the scripted exception name.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubstrateError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            SubstrateError::Signature(_) => ErrorKind::Signature,
            SubstrateError::ArgumentCount { .. } => ErrorKind::ArgumentCount,
            SubstrateError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            SubstrateError::Range(_) => ErrorKind::Range,
            SubstrateError::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            SubstrateError::Config(_) => ErrorKind::Config,
            SubstrateError::Hardware(_) => ErrorKind::Hardware,
            SubstrateError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Builds the `{ name, message }` object handed back to the calling script.
    pub fn to_exception(&self, arena: &Arena) -> SubstrateResult<Value> {
        let name = arena.string(self.kind().name())?;
        let message = arena.string(self.to_string())?;
        arena.object(vec![("name".into(), name), ("message".into(), message)])
    }
}

/// Error categories exposed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfMemory,
    Signature,
    ArgumentCount,
    TypeMismatch,
    Range,
    LengthMismatch,
    Config,
    Hardware,
    Unsupported,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::OutOfMemory => "OutOfMemory",
            ErrorKind::Signature => "SignatureError",
            ErrorKind::ArgumentCount => "ArgumentCountError",
            ErrorKind::TypeMismatch => "TypeMismatchError",
            ErrorKind::Range => "RangeError",
            ErrorKind::LengthMismatch => "LengthMismatchError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Hardware => "HardwareError",
            ErrorKind::Unsupported => "UnsupportedError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
struct DebugHal(Arc<dyn HardwareLayer>);

impl fmt::Debug for DebugHal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareLayer")
            .field("name", &self.0.name())
            .finish()
    }
}

/// Builder used to size the arena and pick the hardware layer before start-up.
#[derive(Debug, Clone)]
pub struct RuntimeBootstrap {
    config: RuntimeConfig,
    hal: Option<DebugHal>,
}

impl RuntimeBootstrap {
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self { config, hal: None }
    }

    pub fn with_cells(mut self, cells: usize) -> Self {
        self.config.arena.cells = cells.max(ArenaConfig::MIN_CELLS);
        self
    }

    pub fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.config.arena.buffer_bytes = bytes;
        self
    }

    pub fn with_low_memory_percent(mut self, percent: u8) -> Self {
        self.config.arena.low_memory_percent = percent.min(100);
        self
    }

    pub fn with_hal(mut self, hal: Arc<dyn HardwareLayer>) -> Self {
        self.hal = Some(DebugHal(hal));
        self
    }

    pub fn build(self) -> SubstrateRuntime {
        let hooks = Arc::new(RuntimeHooks::default());
        let hal = match self.hal {
            Some(hal) => hal,
            None => DebugHal(Arc::new(SoftwareHal::new(
                self.config.hardware.default_clock_hz,
                hooks.clone(),
            ))),
        };
        SubstrateRuntime {
            arena: Arena::from_config(&self.config.arena),
            config: self.config,
            hal,
            hooks,
            builtins: Builtins::with_defaults(),
        }
    }
}

/// SubstrateRuntime owns the value arena and routes scripted builtin calls.
#[derive(Debug, Clone)]
pub struct SubstrateRuntime {
    config: RuntimeConfig,
    arena: Arena,
    hal: DebugHal,
    hooks: Arc<RuntimeHooks>,
    builtins: Builtins,
}

impl Default for SubstrateRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SubstrateRuntime {
    /// Creates a runtime with the default configuration and a software hardware layer.
    pub fn new() -> Self {
        Self::bootstrap().build()
    }

    /// Returns a bootstrap builder seeded with the default configuration.
    pub fn bootstrap() -> RuntimeBootstrap {
        RuntimeBootstrap::from_config(RuntimeConfig::default())
    }

    pub fn from_config(config: RuntimeConfig) -> Self {
        RuntimeBootstrap::from_config(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The arena every value produced by this runtime lives in.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn hal(&self) -> Arc<dyn HardwareLayer> {
        self.hal.0.clone()
    }

    /// Returns the runtime hooks used for logging and telemetry integrations.
    pub fn hooks(&self) -> Arc<RuntimeHooks> {
        self.hooks.clone()
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Registers the raw-memory builtins (`nativeCall`, `nativeFunction`, `memoryArea`).
    ///
    /// # Safety
    /// Scripts running on this runtime can afterwards jump to arbitrary addresses and alias
    /// arbitrary memory. The embedder must trust every script it executes as much as it trusts
    /// its own native code.
    #[cfg(feature = "ffi")]
    pub unsafe fn enable_native_access(&mut self) {
        // SAFETY: forwarded from this function's contract.
        unsafe { self.builtins.register_native_access() };
    }

    /// Invokes a builtin by its scripted name.
    #[instrument(skip(self, args), fields(args = args.len()))]
    pub fn invoke(&self, name: &str, args: &[Value]) -> SubstrateResult<Value> {
        self.builtins.invoke(self, name, args)
    }

    /// Invokes a builtin and converts any failure into a scripted exception value.
    pub fn invoke_or_exception(&self, name: &str, args: &[Value]) -> Result<Value, Value> {
        self.invoke(name, args).map_err(|err| {
            match err.to_exception(&self.arena) {
                Ok(exception) => exception,
                // The arena is exhausted; unwind with the pinned undefined cell instead.
                Err(_) => self.arena.undefined(),
            }
        })
    }
}
