//! Architecture specific native call invokers.
//!
//! Everything above this module is portable: signature parsing and argument conversion end in a
//! [`RawFrame`]. A [`CallInvoker`] is the one place that knows how that frame maps onto the
//! target's calling convention.

use once_cell::sync::Lazy;

use crate::SubstrateResult;
use crate::ffi::{RawFrame, RawReturn, RegisterBudget};

/// Targets with a native call implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    AArch64,
    Unsupported,
}

impl TargetArch {
    /// Returns the canonical architecture name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetArch::X86_64 => "x86_64",
            TargetArch::AArch64 => "aarch64",
            TargetArch::Unsupported => "unsupported",
        }
    }
}

/// Transfers control to native code with a prepared frame.
pub trait CallInvoker: Send + Sync {
    /// Human readable invoker identifier.
    fn name(&self) -> &'static str;
    /// Returns the target architecture metadata.
    fn target(&self) -> TargetArch;
    /// Argument registers available for calls.
    fn budget(&self) -> RegisterBudget;
    /// Calls `address` with the registers in `frame` and collects the result.
    ///
    /// # Safety
    /// `address` must be the entry point of a function following the platform C ABI whose
    /// parameters and return type match `frame`. Any pointer in the frame must be valid for the
    /// accesses the callee performs. Nothing here can detect a violation; the process is simply
    /// at the mercy of the callee.
    unsafe fn invoke(&self, address: usize, frame: &RawFrame) -> SubstrateResult<RawReturn>;
}

#[cfg(all(target_arch = "aarch64", not(windows)))]
pub mod aarch64;
#[cfg(all(target_arch = "x86_64", not(windows)))]
pub mod x86_64;

/// Invoker for targets without a native call implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedInvoker;

impl CallInvoker for UnsupportedInvoker {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn target(&self) -> TargetArch {
        TargetArch::Unsupported
    }

    fn budget(&self) -> RegisterBudget {
        RegisterBudget::new(
            crate::ffi::MAX_INTEGER_REGISTERS,
            crate::ffi::MAX_FLOAT_REGISTERS,
        )
    }

    unsafe fn invoke(&self, _address: usize, _frame: &RawFrame) -> SubstrateResult<RawReturn> {
        Err(crate::SubstrateError::Unsupported(format!(
            "native calls on {}-{}",
            std::env::consts::ARCH,
            std::env::consts::OS
        )))
    }
}

pub fn active_invoker() -> &'static dyn CallInvoker {
    #[cfg(all(target_arch = "x86_64", not(windows)))]
    {
        static INVOKER: Lazy<x86_64::SysVInvoker> = Lazy::new(x86_64::SysVInvoker::default);
        &*INVOKER
    }

    #[cfg(all(target_arch = "aarch64", not(windows)))]
    {
        static INVOKER: Lazy<aarch64::Aapcs64Invoker> =
            Lazy::new(aarch64::Aapcs64Invoker::default);
        &*INVOKER
    }

    #[cfg(not(all(any(target_arch = "x86_64", target_arch = "aarch64"), not(windows))))]
    {
        static INVOKER: Lazy<UnsupportedInvoker> = Lazy::new(UnsupportedInvoker::default);
        &*INVOKER
    }
}

pub fn active_target() -> TargetArch {
    active_invoker().target()
}
