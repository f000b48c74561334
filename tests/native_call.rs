//==============================================
// File: tests/native_call.rs
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Exercise the native call marshaller end to end
// Objective: Verify frames against a recording invoker and real C ABI calls
//==============================================

#![cfg(feature = "ffi")]

use std::sync::Arc;

use parking_lot::Mutex;
use solvra_substrate::backend::{CallInvoker, TargetArch};
use solvra_substrate::ffi::{Marshaller, RawFrame, RawReturn, RegisterBudget, Signature};
use solvra_substrate::integration::{RuntimeHooks, TelemetryEvent};
use solvra_substrate::{Arena, CellKind, ErrorKind, SubstrateResult};

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    address: usize,
    integers: Vec<u64>,
    floats: Vec<f64>,
}

struct RecordingInvoker {
    calls: Mutex<Vec<Recorded>>,
    reply: RawReturn,
}

impl RecordingInvoker {
    fn replying(reply: RawReturn) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply,
        }
    }
}

impl CallInvoker for RecordingInvoker {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn target(&self) -> TargetArch {
        TargetArch::Unsupported
    }

    fn budget(&self) -> RegisterBudget {
        RegisterBudget::new(6, 8)
    }

    unsafe fn invoke(&self, address: usize, frame: &RawFrame) -> SubstrateResult<RawReturn> {
        self.calls.lock().push(Recorded {
            address,
            integers: frame.integers().to_vec(),
            floats: frame.floats().to_vec(),
        });
        Ok(self.reply)
    }
}

fn arena() -> Arena {
    Arena::new(128, 1024)
}

#[test]
fn void_call_marshals_nothing() {
    let arena = arena();
    let invoker = RecordingInvoker::replying(RawReturn::Void);
    let marshaller = Marshaller::with_invoker(&invoker);
    // SAFETY: the recording invoker never jumps anywhere.
    let result = unsafe { marshaller.call(&arena, 0x1000, "void", &[]) }.expect("call");
    assert_eq!(result.kind(), CellKind::Undefined);
    assert_eq!(
        *invoker.calls.lock(),
        vec![Recorded {
            address: 0x1000,
            integers: vec![],
            floats: vec![],
        }]
    );
}

#[test]
fn argument_count_mismatch_performs_no_call() {
    let arena = arena();
    let invoker = RecordingInvoker::replying(RawReturn::Integer(0));
    let marshaller = Marshaller::with_invoker(&invoker);
    let one = arena.integer(1).expect("arg");
    // SAFETY: the recording invoker never jumps anywhere.
    let err = unsafe { marshaller.call(&arena, 0x1000, "int(int, int)", &[one]) }.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentCount);
    assert!(invoker.calls.lock().is_empty());
}

#[test]
fn bad_signatures_fail_before_calling() {
    let arena = arena();
    let invoker = RecordingInvoker::replying(RawReturn::Void);
    let marshaller = Marshaller::with_invoker(&invoker);
    for signature in ["", "int(quux)", "void(void, int)", "int(int, int, int, int, int, int, int)"] {
        // SAFETY: the recording invoker never jumps anywhere.
        let err = unsafe { marshaller.call(&arena, 0x1000, signature, &[]) }.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signature, "{signature:?}");
    }
    assert!(invoker.calls.lock().is_empty());
}

#[test]
fn arguments_are_split_into_register_banks() {
    let arena = arena();
    let invoker = RecordingInvoker::replying(RawReturn::Integer(0xFFFF_FF9C));
    let marshaller = Marshaller::with_invoker(&invoker);
    let args = [
        arena.integer(-2).expect("int8"),
        arena.number(2.5).expect("double"),
        arena.number(300.0).expect("uint8"),
        arena.number(0.5).expect("float"),
    ];
    // SAFETY: the recording invoker never jumps anywhere.
    let result = unsafe { marshaller.call(&arena, 0x2000, "int32(int8, float64, uint8, float32)", &args) }
        .expect("call");
    assert_eq!(result.as_i64(), Some(-100));
    let calls = invoker.calls.lock();
    assert_eq!(calls[0].integers, vec![(-2i64) as u64, 44]);
    assert_eq!(calls[0].floats[0], 2.5);
    assert_eq!(calls[0].floats[1].to_bits() as u32, 0.5f32.to_bits());
}

#[test]
fn non_buffers_cannot_be_pointers() {
    let arena = arena();
    let invoker = RecordingInvoker::replying(RawReturn::Void);
    let marshaller = Marshaller::with_invoker(&invoker);
    let number = arena.number(4.0).expect("number");
    // SAFETY: the recording invoker never jumps anywhere.
    let err = unsafe { marshaller.call(&arena, 0x1000, "void(pointer)", &[number]) }.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert!(invoker.calls.lock().is_empty());
}

#[test]
fn calls_are_published_to_telemetry() {
    let arena = arena();
    let invoker = RecordingInvoker::replying(RawReturn::Void);
    let hooks = Arc::new(RuntimeHooks::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    hooks.set_telemetry(move |event| sink.lock().push(event.clone()));
    let marshaller = Marshaller::with_invoker(&invoker).with_hooks(hooks);
    // SAFETY: the recording invoker never jumps anywhere.
    unsafe { marshaller.call(&arena, 0x40, "void()", &[]) }.expect("call");
    assert_eq!(
        *seen.lock(),
        vec![TelemetryEvent::NativeCall {
            address: 0x40,
            signature: Signature::parse("void").expect("sig").to_string(),
        }]
    );
}

#[cfg(all(any(target_arch = "x86_64", target_arch = "aarch64"), not(windows)))]
mod host {
    use super::*;
    use once_cell::sync::OnceCell;
    use solvra_substrate::ffi;
    use solvra_substrate::view::{ElementType, reinterpret};

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    extern "C" fn scale(value: f64, factor: f32) -> f64 {
        value * f64::from(factor)
    }

    extern "C" fn nothing() {}

    extern "C" fn fill(bytes: *mut u8, len: u32, value: u8) -> u32 {
        // SAFETY: the marshaller passes the address of a live buffer of at least `len` bytes.
        let slice = unsafe { std::slice::from_raw_parts_mut(bytes, len as usize) };
        slice.fill(value);
        len
    }

    static REENTRANT: OnceCell<Arena> = OnceCell::new();

    extern "C" fn allocate_inside() -> i32 {
        match REENTRANT.get().map(|arena| arena.number(7.0)) {
            Some(Ok(value)) => value.ref_count() as i32,
            _ => -1,
        }
    }

    #[test]
    fn integer_arguments_and_results() {
        let arena = arena();
        let args = [arena.integer(40).expect("a"), arena.integer(2).expect("b")];
        // SAFETY: `add` matches the declared prototype.
        let result = unsafe { ffi::call(&arena, add as usize, "int32(int32, int32)", &args) }
            .expect("call");
        assert_eq!(result.as_i64(), Some(42));
    }

    #[test]
    fn float_arguments_and_results() {
        let arena = arena();
        let args = [arena.number(1.5).expect("value"), arena.number(4.0).expect("factor")];
        // SAFETY: `scale` matches the declared prototype.
        let result = unsafe { ffi::call(&arena, scale as usize, "double(double, float)", &args) }
            .expect("call");
        assert_eq!(result.as_f64(), Some(6.0));
    }

    #[test]
    fn void_target_returns_undefined() {
        let arena = arena();
        // SAFETY: `nothing` takes no arguments and returns nothing.
        let result = unsafe { ffi::call(&arena, nothing as usize, "void", &[]) }.expect("call");
        assert!(result.is_undefined());
    }

    #[test]
    fn pointer_arguments_reach_the_buffer() {
        let arena = arena();
        let buffer = arena.array_buffer(8).expect("buffer");
        let tail = solvra_substrate::view::view(&buffer, ElementType::UINT8, 4, None).expect("tail");
        let args = [
            tail,
            arena.integer(4).expect("len"),
            arena.integer(0xAB).expect("value"),
        ];
        // SAFETY: `fill` matches the prototype and writes only the four bytes of `tail`.
        let written =
            unsafe { ffi::call(&arena, fill as usize, "uint32(pointer, uint32, uint8)", &args) }
                .expect("call");
        assert_eq!(written.as_i64(), Some(4));
        assert_eq!(
            buffer.bytes().expect("bytes"),
            vec![0, 0, 0, 0, 0xAB, 0xAB, 0xAB, 0xAB]
        );
        let words = reinterpret(&buffer, ElementType::UINT32).expect("words");
        assert_eq!(words.read_element(1).expect("read"), f64::from(0xABAB_ABABu32));
    }

    #[test]
    fn native_function_cells_are_callable() {
        let arena = arena();
        let function = ffi::native_function(&arena, add as usize, "int(int, int)").expect("fn");
        assert!(function.native_function().is_some());
        let args = [arena.integer(-5).expect("a"), arena.integer(3).expect("b")];
        // SAFETY: `add` matches the stored prototype.
        let result = unsafe { ffi::call_function(&function, &args) }.expect("call");
        assert_eq!(result.as_i64(), Some(-2));
        assert!(ffi::native_function(&arena, 0, "void").is_err());
    }

    #[test]
    fn callee_may_reenter_the_arena() {
        let arena = REENTRANT.get_or_init(|| Arena::new(64, 0)).clone();
        // SAFETY: `allocate_inside` takes no arguments and returns an int.
        let result = unsafe { ffi::call(&arena, allocate_inside as usize, "int", &[]) }
            .expect("call");
        assert_eq!(result.as_i64(), Some(1));
    }
}

//==============================================
// End of file
//==============================================
