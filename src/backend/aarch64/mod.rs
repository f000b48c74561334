//=============================================
// solvra_substrate/src/backend/aarch64/mod.rs
//=============================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: AAPCS64 native call invoker
// Objective: Map a raw frame onto x0..x7 and d0..d7 and read the result
//            back from x0 or v0
// Formatting: Zobie.format (.solvraformat)
//=============================================

use crate::SubstrateResult;
use crate::ffi::{RawFrame, RawReturn, RegisterBudget, ReturnClass};

use super::{CallInvoker, TargetArch};

// x0..x7 carry integer and pointer arguments, v0..v7 carry floating-point arguments. A single
// precision argument lives in the low 32 bits of its v register, which is where RawFrame puts it.
macro_rules! enter {
    ($ret:ty, $address:expr, $frame:expr) => {{
        type Entry = unsafe extern "C" fn(
            u64, u64, u64, u64, u64, u64, u64, u64,
            f64, f64, f64, f64, f64, f64, f64, f64,
        ) -> $ret;
        let x = $frame.integer_registers();
        let d = $frame.float_registers();
        let entry = std::mem::transmute::<usize, Entry>($address);
        entry(
            x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7],
            d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7],
        )
    }};
}

/// Invoker for the Arm 64-bit procedure call standard.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aapcs64Invoker;

impl Aapcs64Invoker {
    const BUDGET: RegisterBudget = RegisterBudget::new(8, 8);
}

impl CallInvoker for Aapcs64Invoker {
    fn name(&self) -> &'static str {
        "aapcs64"
    }

    fn target(&self) -> TargetArch {
        TargetArch::AArch64
    }

    fn budget(&self) -> RegisterBudget {
        Self::BUDGET
    }

    unsafe fn invoke(&self, address: usize, frame: &RawFrame) -> SubstrateResult<RawReturn> {
        if !frame.fits(Self::BUDGET) {
            return Err(crate::SubstrateError::Signature(
                "frame exceeds the AAPCS64 register budget".into(),
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
