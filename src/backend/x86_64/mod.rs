//=============================================
// solvra_substrate/src/backend/x86_64/mod.rs
//=============================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: System V AMD64 native call invoker
// Objective: Map a raw frame onto rdi..r9 and xmm0..xmm7 and read the
//            result back from rax or xmm0
// Formatting: Zobie.format (.solvraformat)
//=============================================

use crate::SubstrateResult;
use crate::ffi::{RawFrame, RawReturn, RegisterBudget, ReturnClass};

use super::{CallInvoker, TargetArch};

// Six integer registers followed by eight SSE registers. The ABI assigns the two classes
// independently, so a callee declared with fewer (or interleaved) parameters reads exactly the
// registers its own prototype names and ignores the rest.
macro_rules! enter {
    ($ret:ty, $address:expr, $frame:expr) => {{
        type Entry = unsafe extern "C" fn(
            u64, u64, u64, u64, u64, u64,
            f64, f64, f64, f64, f64, f64, f64, f64,
        ) -> $ret;
        let i = $frame.integer_registers();
        let f = $frame.float_registers();
        let entry = std::mem::transmute::<usize, Entry>($address);
        entry(i[0], i[1], i[2], i[3], i[4], i[5], f[0], f[1], f[2], f[3], f[4], f[5], f[6], f[7])
    }};
}

/// Invoker for the System V AMD64 calling convention (Linux, BSD, macOS).
#[derive(Debug, Default, Clone, Copy)]
pub struct SysVInvoker;

impl SysVInvoker {
    const BUDGET: RegisterBudget = RegisterBudget::new(6, 8);
}

impl CallInvoker for SysVInvoker {
    fn name(&self) -> &'static str {
        "sysv-amd64"
    }

    fn target(&self) -> TargetArch {
        TargetArch::X86_64
    }

    fn budget(&self) -> RegisterBudget {
        Self::BUDGET
    }

    unsafe fn invoke(&self, address: usize, frame: &RawFrame) -> SubstrateResult<RawReturn> {
        if !frame.fits(Self::BUDGET) {
            return Err(crate::SubstrateError::Signature(
                "frame exceeds the System V register budget".into(),
            ));
        }
        // SAFETY: forwarded from this function's contract; a function pointer and `usize` have
        // the same size on this target.
        let raw = unsafe {
            match frame.ret() {
                ReturnClass::Void => {
                    enter!((), address, frame);
                    RawReturn::Void
                }
                ReturnClass::Integer => RawReturn::Integer(enter!(u64, address, frame)),
                ReturnClass::Float32 => RawReturn::Float32(enter!(f32, address, frame)),
                ReturnClass::Float64 => RawReturn::Float64(enter!(f64, address, frame)),
            }
        };
        Ok(raw)
    }
}
