//! Native call marshalling.
//!
//! [`Signature`] parsing is always available so hosts can validate descriptors. The marshaller
//! itself, which jumps to raw addresses, is only compiled with the `ffi` feature.

#[cfg(feature = "ffi")]
mod frame;
#[cfg(feature = "ffi")]
mod marshal;
pub mod signature;

use std::fmt;

#[cfg(feature = "ffi")]
pub use frame::{
    MAX_FLOAT_REGISTERS, MAX_INTEGER_REGISTERS, RawFrame, RawReturn, RegisterBudget, ReturnClass,
};
#[cfg(feature = "ffi")]
pub use marshal::{Marshaller, call, call_function, native_function};
pub use signature::{ArgClass, NativeType, Signature};

/// Callable reference stored in a NativeFunction cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFunctionRef {
    address: usize,
    signature: Signature,
}

impl NativeFunctionRef {
    pub fn new(address: usize, signature: Signature) -> Self {
        Self { address, signature }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl fmt::Display for NativeFunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[native {} @ {:#x}]", self.signature, self.address)
    }
}
