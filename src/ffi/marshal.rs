//=============================================
// solvra_substrate/src/ffi/marshal.rs
//=============================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Native call marshaller
// Objective: Convert value cells into a raw frame, hand it to the target
//            invoker and lift the raw result back into a cell
// Formatting: Zobie.format (.solvraformat)
//=============================================

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::backend::{CallInvoker, active_invoker};
use crate::integration::{RuntimeHooks, TelemetryEvent};
use crate::memory::{Arena, ArenaState, CellKind, Payload, Value};
use crate::view::wrap_to_width;
use crate::{SubstrateError, SubstrateResult};

use super::NativeFunctionRef;
use super::frame::{RawFrame, RawReturn, ReturnClass};
use super::signature::{NativeType, Signature};

/// Drives one native call from cells to cells.
///
/// The arena lock is only held while arguments are converted and while the result is
/// allocated, never across the jump, so native code may re-enter the runtime freely.
pub struct Marshaller<'i> {
    invoker: &'i dyn CallInvoker,
    hooks: Option<Arc<RuntimeHooks>>,
}

impl Marshaller<'static> {
    /// Marshaller for the host architecture.
    pub fn new() -> Self {
        Self::with_invoker(active_invoker())
    }
}

impl Default for Marshaller<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'i> Marshaller<'i> {
    pub fn with_invoker(invoker: &'i dyn CallInvoker) -> Self {
        Self {
            invoker,
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<RuntimeHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Rejects signatures the invoker cannot pass entirely in registers.
    pub fn check_budget(&self, signature: &Signature) -> SubstrateResult<()> {
        let (integers, floats) = signature.register_demand();
        let budget = self.invoker.budget();
        if integers > budget.integer || floats > budget.float {
            return Err(SubstrateError::Signature(format!(
                "`{signature}` needs {integers} integer and {floats} floating-point registers, \
                 {} provides {} and {}",
                self.invoker.name(),
                budget.integer,
                budget.float
            )));
        }
        Ok(())
    }

    /// Validates the request and converts `args` into a raw frame without calling anything.
    pub fn prepare(&self, signature: &Signature, args: &[Value]) -> SubstrateResult<RawFrame> {
        self.check_budget(signature)?;
        if args.len() != signature.args().len() {
            return Err(SubstrateError::ArgumentCount {
                expected: signature.args().len(),
                found: args.len(),
            });
        }
        let mut frame = RawFrame::new(ReturnClass::of(signature.ret()));
        let Some(first) = args.first() else {
            return Ok(frame);
        };
        let arena = first.arena();
        for arg in args {
            arena.ensure_owned(arg)?;
        }
        let mut state = arena.lock();
        for (position, (ty, arg)) in signature.args().iter().zip(args).enumerate() {
            marshal_argument(&mut state, &mut frame, *ty, arg)
                .map_err(|err| annotate(err, position))?;
        }
        Ok(frame)
    }

    /// Parses `signature` and calls `address`.
    ///
    /// # Safety
    /// See [`Marshaller::call_signature`].
    pub unsafe fn call(
        &self,
        arena: &Arena,
        address: usize,
        signature: &str,
        args: &[Value],
    ) -> SubstrateResult<Value> {
        let signature = Signature::parse(signature)?;
        // SAFETY: forwarded from this function's contract.
        unsafe { self.call_signature(arena, address, &signature, args) }
    }

    /// Calls the native function at `address` and converts its result into a cell of `arena`.
    ///
    /// Every check that can be made (signature, argument count, argument kinds, register
    /// budget) happens before control leaves Rust. After that there is no way back: a bad
    /// address or a mismatched prototype takes the process down.
    ///
    /// # Safety
    /// `address` must be a function with the platform C ABI whose prototype matches
    /// `signature`, and it must be safe to call with any argument values the script supplies.
    /// Buffers passed as pointers are only guaranteed to stay alive while `args` does.
    #[instrument(skip_all, fields(address = address, signature = %signature, args = args.len()))]
    pub unsafe fn call_signature(
        &self,
        arena: &Arena,
        address: usize,
        signature: &Signature,
        args: &[Value],
    ) -> SubstrateResult<Value> {
        let frame = self.prepare(signature, args)?;
        trace!(integers = ?frame.integers(), floats = ?frame.floats(), "prepared native frame");
        if let Some(hooks) = &self.hooks {
            hooks.emit_telemetry(TelemetryEvent::NativeCall {
                address,
                signature: signature.to_string(),
            });
        }
        // SAFETY: forwarded from this function's contract.
        let raw = unsafe { self.invoker.invoke(address, &frame)? };
        debug!(?raw, invoker = self.invoker.name(), "native call returned");
        lift(arena, signature.ret(), raw)
    }

    /// Calls the function referenced by a NativeFunction cell.
    ///
    /// # Safety
    /// Same contract as [`Marshaller::call_signature`] for the stored address and signature.
    pub unsafe fn call_function(&self, function: &Value, args: &[Value]) -> SubstrateResult<Value> {
        let Some(native) = function.native_function() else {
            return Err(SubstrateError::type_mismatch(
                "native function",
                function.kind().name(),
            ));
        };
        // SAFETY: forwarded from this function's contract.
        unsafe { self.call_signature(function.arena(), native.address(), native.signature(), args) }
    }
}

fn annotate(err: SubstrateError, position: usize) -> SubstrateError {
    match err {
        SubstrateError::TypeMismatch { expected, found } => SubstrateError::TypeMismatch {
            expected: format!("{expected} for argument {}", position + 1),
            found,
        },
        other => other,
    }
}

fn marshal_argument(
    state: &mut ArenaState,
    frame: &mut RawFrame,
    ty: NativeType,
    arg: &Value,
) -> SubstrateResult<()> {
    match ty {
        NativeType::Void => Err(SubstrateError::Signature("void argument".into())),
        NativeType::Pointer => frame.push_integer(pointer_of(state, arg)? as u64),
        NativeType::Float32 => frame.push_float32(number_of(state, arg, ty)? as f32),
        NativeType::Float64 => frame.push_float64(number_of(state, arg, ty)?),
        NativeType::Int8
        | NativeType::Int16
        | NativeType::Int32
        | NativeType::Int64
        | NativeType::Uint8
        | NativeType::Uint16
        | NativeType::Uint32
        | NativeType::Uint64 => {
            let bits = ty.integer_bits().unwrap_or(64);
            let word = match state.payload(arg.id()) {
                Payload::Integer(value) => (*value as u64) & crate::view::mask(bits),
                Payload::Number(value) => wrap_to_width(*value, bits),
                other => {
                    return Err(SubstrateError::type_mismatch(
                        ty.name(),
                        CellKind::of(other).name(),
                    ));
                }
            };
            frame.push_integer(extend(word, bits, ty.is_signed()))
        }
    }
}

fn number_of(state: &ArenaState, arg: &Value, ty: NativeType) -> SubstrateResult<f64> {
    match state.payload(arg.id()) {
        Payload::Number(value) => Ok(*value),
        Payload::Integer(value) => Ok(*value as f64),
        other => Err(SubstrateError::type_mismatch(
            ty.name(),
            CellKind::of(other).name(),
        )),
    }
}

/// Sign or zero extends a `bits` wide word to the full register.
fn extend(word: u64, bits: u32, signed: bool) -> u64 {
    if bits >= 64 {
        return word;
    }
    if signed {
        let shift = 64 - bits;
        (((word << shift) as i64) >> shift) as u64
    } else {
        word
    }
}

/// Address of the first byte a buffer or view exposes.
fn pointer_of(state: &mut ArenaState, arg: &Value) -> SubstrateResult<usize> {
    let (buffer, offset) = match state.payload(arg.id()) {
        Payload::ArrayBuffer(_) => (arg.id(), 0),
        Payload::View(header) => {
            crate::view::view_region(state, header)?;
            (header.buffer, header.byte_offset)
        }
        other => {
            return Err(SubstrateError::type_mismatch(
                "ArrayBuffer or typed view",
                CellKind::of(other).name(),
            ));
        }
    };
    match state.payload_mut(buffer) {
        Some(Payload::ArrayBuffer(backing)) => backing
            .address()
            .map(|address| address + offset)
            .ok_or_else(|| SubstrateError::range("detached ArrayBuffer passed as pointer")),
        _ => Err(SubstrateError::type_mismatch("ArrayBuffer", "released buffer")),
    }
}

/// Converts a raw result into a cell according to the declared return type.
pub(crate) fn lift(arena: &Arena, ty: NativeType, raw: RawReturn) -> SubstrateResult<Value> {
    match (ty, raw) {
        (NativeType::Void, _) => Ok(arena.undefined()),
        (NativeType::Float32, RawReturn::Float32(value)) => arena.number(f64::from(value)),
        (NativeType::Float64, RawReturn::Float64(value)) => arena.number(value),
        (NativeType::Uint64, RawReturn::Integer(word)) => match i64::try_from(word) {
            Ok(value) => arena.integer(value),
            Err(_) => arena.number(word as f64),
        },
        (NativeType::Pointer, RawReturn::Integer(word)) => arena.integer(word as i64),
        (ty, RawReturn::Integer(word)) if ty.integer_bits().is_some() => {
            let bits = ty.integer_bits().unwrap_or(64);
            let word = extend(word & crate::view::mask(bits), bits, ty.is_signed());
            arena.integer(word as i64)
        }
        (ty, raw) => Err(SubstrateError::type_mismatch(
            format!("{ty} return"),
            format!("{raw:?}"),
        )),
    }
}

/// Creates a NativeFunction cell after validating the signature against the host invoker.
pub fn native_function(arena: &Arena, address: usize, signature: &str) -> SubstrateResult<Value> {
    if address == 0 {
        return Err(SubstrateError::range("native function at null address"));
    }
    let signature = Signature::parse(signature)?;
    Marshaller::new().check_budget(&signature)?;
    arena.allocate(crate::memory::CellInit::NativeFunction(NativeFunctionRef::new(
        address, signature,
    )))
}

/// Calls `address` with the host invoker.
///
/// # Safety
/// See [`Marshaller::call_signature`].
pub unsafe fn call(
    arena: &Arena,
    address: usize,
    signature: &str,
    args: &[Value],
) -> SubstrateResult<Value> {
    // SAFETY: forwarded from this function's contract.
    unsafe { Marshaller::new().call(arena, address, signature, args) }
}

/// Calls a NativeFunction cell with the host invoker.
///
/// # Safety
/// See [`Marshaller::call_signature`].
pub unsafe fn call_function(function: &Value, args: &[Value]) -> SubstrateResult<Value> {
    // SAFETY: forwarded from this function's contract.
    unsafe { Marshaller::new().call_function(function, args) }
}
