//=============================================
// solvra_substrate/src/builtins.rs
//=============================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Scripted builtin registry
// Objective: Map scripted names to substrate entry points, validate their
//            arguments and report failures through the runtime hooks
// Formatting: Zobie.format (.solvraformat)
//=============================================

use std::collections::HashMap;
use std::fmt;

use tracing::{instrument, warn};

use crate::integration::{RuntimeLog, TelemetryEvent};
use crate::memory::{CellKind, ErrorFlag, Value};
use crate::view::{self, BitOrder, ElementType, Lookup};
use crate::{SubstrateError, SubstrateResult, SubstrateRuntime, numeric};

/// Entry point for one builtin.
pub type BuiltinFn = fn(&SubstrateRuntime, &[Value]) -> SubstrateResult<Value>;

//=============================================
// Section 1.0 - Registry
//=============================================

#[derive(Clone, Default)]
pub struct Builtins {
    table: HashMap<&'static str, BuiltinFn>,
}

impl fmt::Debug for Builtins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtins")
            .field("names", &self.names())
            .finish()
    }
}

impl Builtins {
    /// Registry with every builtin that cannot touch raw memory.
    pub fn with_defaults() -> Self {
        let mut builtins = Self::default();
        builtins.register("sum", sum);
        builtins.register("variance", variance);
        builtins.register("convolve", convolve);
        builtins.register("FFT", fft);
        builtins.register("interpolate", interpolate);
        builtins.register("interpolate2d", interpolate2d);
        builtins.register("clip", clip);
        builtins.register("toString", to_string);
        builtins.register("toArrayBuffer", to_array_buffer);
        builtins.register("toUint8Array", to_uint8_array);
        builtins.register("mapInPlace", map_in_place);
        builtins.register("reinterpretView", reinterpret_view);
        builtins.register("getSizeOf", get_size_of);
        builtins.register("getErrorFlags", get_error_flags);
        builtins.register("enableWatchdog", enable_watchdog);
        builtins.register("kickWatchdog", kick_watchdog);
        builtins.register("setClock", set_clock);
        builtins.register("setBootCode", set_boot_code);
        builtins.register("reverseByte", reverse_byte);
        builtins.register("HSBtoRGB", hsb_to_rgb);
        builtins.register("setUSBHID", set_usb_hid);
        builtins.register("sendUSBHID", send_usb_hid);
        builtins
    }

    /// Adds or replaces a builtin.
    pub fn register(&mut self, name: &'static str, entry: BuiltinFn) {
        self.table.insert(name, entry);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.table.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Adds `nativeCall`, `nativeFunction` and `memoryArea`.
    ///
    /// # Safety
    /// Any script able to reach these builtins can jump to arbitrary addresses and alias
    /// arbitrary memory; see [`SubstrateRuntime::enable_native_access`].
    #[cfg(feature = "ffi")]
    pub(crate) unsafe fn register_native_access(&mut self) {
        self.register("nativeCall", native::native_call);
        self.register("nativeFunction", native::native_function);
        self.register("memoryArea", native::memory_area);
    }

    /// Runs the builtin called `name`. Failures are also published as telemetry.
    #[instrument(level = "debug", skip(self, runtime, args))]
    pub fn invoke(
        &self,
        runtime: &SubstrateRuntime,
        name: &str,
        args: &[Value],
    ) -> SubstrateResult<Value> {
        let Some(entry) = self.table.get(name) else {
            return Err(self.fail(
                runtime,
                name,
                SubstrateError::type_mismatch("builtin function", format!("unknown name '{name}'")),
            ));
        };
        let raised_before = runtime.arena().error_flags();
        let result = args
            .iter()
            .try_for_each(|arg| runtime.arena().ensure_owned(arg))
            .and_then(|()| entry(runtime, args))
            .map_err(|err| self.fail(runtime, name, err));
        report_new_flags(runtime, name, &raised_before);
        result
    }

    fn fail(&self, runtime: &SubstrateRuntime, name: &str, err: SubstrateError) -> SubstrateError {
        warn!(builtin = name, error = %err, "builtin failed");
        let hooks = runtime.hooks();
        hooks.emit_log(RuntimeLog::new("builtins", format!("{name} raised {}: {err}", err.kind())));
        hooks.emit_telemetry(TelemetryEvent::BuiltinFailed {
            name: name.to_string(),
            kind: err.kind(),
        });
        err
    }
}

/// Logs every arena flag that became set while `name` ran.
fn report_new_flags(runtime: &SubstrateRuntime, name: &str, before: &[ErrorFlag]) {
    let hooks = runtime.hooks();
    for flag in runtime.arena().error_flags() {
        if !before.contains(&flag) {
            hooks.emit_log(RuntimeLog::new(
                "arena",
                format!("{} flag raised during {name}", flag.name()),
            ));
        }
    }
}

//=============================================
// Section 2.0 - Argument helpers
//=============================================

fn required(args: &[Value], count: usize) -> SubstrateResult<()> {
    if args.len() < count {
        return Err(SubstrateError::ArgumentCount {
            expected: count,
            found: args.len(),
        });
    }
    Ok(())
}

fn number(args: &[Value], index: usize, what: &str) -> SubstrateResult<f64> {
    match args.get(index) {
        Some(value) => value.expect_number(what),
        None => Err(SubstrateError::ArgumentCount {
            expected: index + 1,
            found: args.len(),
        }),
    }
}

fn count(args: &[Value], index: usize, what: &str) -> SubstrateResult<usize> {
    let value = number(args, index, what)?;
    if !(value.is_finite() && value >= 0.0) {
        return Err(SubstrateError::range(format!(
            "{what} must be a non-negative integer, got {value}"
        )));
    }
    Ok(value as usize)
}

/// Missing, undefined and null arguments read as absent.
fn optional(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index)
        .filter(|value| !matches!(value.kind(), CellKind::Undefined | CellKind::Null))
}

fn truthy(value: Option<&Value>) -> bool {
    let Some(value) = value else {
        return false;
    };
    match value.kind() {
        CellKind::Undefined | CellKind::Null => false,
        CellKind::Number | CellKind::Integer => {
            let number = value.to_number();
            number != 0.0 && !number.is_nan()
        }
        CellKind::String => value.length().is_some_and(|len| len > 0),
        _ => true,
    }
}

fn text(args: &[Value], index: usize, what: &str) -> SubstrateResult<String> {
    let value = args.get(index).ok_or(SubstrateError::ArgumentCount {
        expected: index + 1,
        found: args.len(),
    })?;
    value
        .as_string()
        .ok_or_else(|| SubstrateError::type_mismatch(format!("string for {what}"), value.kind().name()))
}

//=============================================
// Section 3.0 - Numeric builtins
//=============================================

fn sum(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    runtime.arena().number(numeric::sum(&args[0])?)
}

fn variance(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 2)?;
    let mean = number(args, 1, "mean")?;
    runtime.arena().number(numeric::variance(&args[0], mean)?)
}

fn convolve(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 3)?;
    let offset = number(args, 2, "offset")?;
    if !offset.is_finite() {
        return Err(SubstrateError::range("convolve offset must be finite"));
    }
    let result = numeric::convolve(&args[0], &args[1], offset.trunc() as i64)?;
    runtime.arena().number(result)
}

fn fft(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    numeric::fft(&args[0], optional(args, 1), truthy(args.get(2)))?;
    Ok(runtime.arena().undefined())
}

fn interpolate(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 2)?;
    let index = number(args, 1, "index")?;
    runtime.arena().number(numeric::interpolate(&args[0], index)?)
}

fn interpolate2d(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 4)?;
    let width = count(args, 1, "width")?;
    let x = number(args, 2, "x")?;
    let y = number(args, 3, "y")?;
    runtime
        .arena()
        .number(numeric::interpolate2d(&args[0], width, x, y)?)
}

fn clip(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 3)?;
    let x = number(args, 0, "x")?;
    let min = number(args, 1, "min")?;
    let max = number(args, 2, "max")?;
    runtime.arena().number(numeric::clip(x, min, max))
}

fn reverse_byte(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    let byte = number(args, 0, "byte")?;
    let reversed = numeric::reverse_byte(view::wrap_to_width(byte, 32) as u32);
    runtime.arena().integer(i64::from(reversed))
}

fn hsb_to_rgb(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 3)?;
    let hue = number(args, 0, "hue")?;
    let saturation = number(args, 1, "saturation")?;
    let brightness = number(args, 2, "brightness")?;
    let rgb = numeric::hsb_to_rgb(hue, saturation, brightness);
    runtime.arena().integer(i64::from(rgb))
}

//=============================================
// Section 4.0 - Memory and view builtins
//=============================================

fn to_string(_runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    view::to_string(args)
}

fn to_array_buffer(_runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    view::to_array_buffer(&args[0])
}

fn to_uint8_array(_runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    view::to_uint8_array(args)
}

/// `mapInPlace(from, to, map?, bits?, order?)`; `bits` defaults to the destination element width.
fn map_in_place(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 2)?;
    let (source, dest) = (&args[0], &args[1]);
    let lookup = match optional(args, 2) {
        Some(table) => Lookup::Table(table),
        None => Lookup::Identity,
    };
    let bits = match optional(args, 3) {
        Some(_) => {
            let bits = count(args, 3, "bits")?;
            u32::try_from(bits)
                .map_err(|_| SubstrateError::range(format!("bit width {bits} is out of range")))?
        }
        None => dest.element_type().map_or(8, |element| element.bits()),
    };
    let order = match optional(args, 4) {
        Some(_) => {
            let name = text(args, 4, "bit order")?;
            BitOrder::from_name(&name)
                .ok_or_else(|| SubstrateError::range(format!("unknown bit order '{name}'")))?
        }
        None => BitOrder::default(),
    };
    view::map_in_place(source, dest, lookup, bits, order)?;
    Ok(runtime.arena().undefined())
}

/// `reinterpretView(buffer, "Uint4Array")`.
fn reinterpret_view(_runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 2)?;
    let name = text(args, 1, "element type")?;
    let element = ElementType::from_name(&name)
        .ok_or_else(|| SubstrateError::type_mismatch("typed array name", name.clone()))?;
    view::reinterpret(&args[0], element)
}

fn get_size_of(_runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    let depth = match optional(args, 1) {
        Some(_) => count(args, 1, "depth")?,
        None => 0,
    };
    args[0].size_of(depth)
}

fn get_error_flags(runtime: &SubstrateRuntime, _args: &[Value]) -> SubstrateResult<Value> {
    let arena = runtime.arena();
    let names = arena
        .take_error_flags()
        .into_iter()
        .map(|flag| arena.string(flag.name()))
        .collect::<SubstrateResult<Vec<_>>>()?;
    arena.array(names)
}

//=============================================
// Section 5.0 - Hardware builtins
//=============================================

fn enable_watchdog(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    let timeout = number(args, 0, "timeout")?;
    let automatic = optional(args, 1).is_none_or(|flag| truthy(Some(flag)));
    runtime.hal().enable_watchdog(timeout, automatic)?;
    Ok(runtime.arena().undefined())
}

fn kick_watchdog(runtime: &SubstrateRuntime, _args: &[Value]) -> SubstrateResult<Value> {
    runtime.hal().kick_watchdog()?;
    Ok(runtime.arena().undefined())
}

/// `setClock(hz)` or `setClock({ hz })`; returns the frequency selected.
fn set_clock(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    let requested = match args[0].field("hz") {
        Some(hz) => hz.expect_number("hz")?,
        None => number(args, 0, "clock")?,
    };
    if !(requested.is_finite() && requested >= 0.0 && requested <= f64::from(u32::MAX)) {
        return Err(SubstrateError::range(format!("invalid clock frequency {requested}")));
    }
    let selected = runtime.hal().set_clock(requested as u32)?;
    runtime.arena().integer(i64::from(selected))
}

fn set_boot_code(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    let code = match optional(args, 0) {
        Some(_) => text(args, 0, "boot code")?,
        None => String::new(),
    };
    runtime.hal().set_boot_code(&code, truthy(args.get(1)))?;
    Ok(runtime.arena().undefined())
}

/// `setUSBHID(descriptor)` or `setUSBHID({ reportDescriptor })`; no argument removes the device.
fn set_usb_hid(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    let descriptor = match optional(args, 0) {
        Some(options) => {
            let source = options.field("reportDescriptor").unwrap_or_else(|| options.clone());
            Some(view::collect_bytes(std::slice::from_ref(&source))?)
        }
        None => None,
    };
    runtime.hal().set_usb_hid(descriptor.as_deref())?;
    Ok(runtime.arena().undefined())
}

fn send_usb_hid(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
    required(args, 1)?;
    let report = view::collect_bytes(args)?;
    runtime.hal().send_usb_hid(&report)?;
    runtime.arena().integer(1)
}

//=============================================
// Section 6.0 - Raw memory builtins
//=============================================

#[cfg(feature = "ffi")]
mod native {
    use super::*;
    use crate::ffi::{self, Marshaller};

    fn address(args: &[Value], index: usize) -> SubstrateResult<usize> {
        let value = number(args, index, "address")?;
        if !(value.is_finite() && value >= 0.0 && value.fract() == 0.0) {
            return Err(SubstrateError::range(format!("invalid address {value}")));
        }
        usize::try_from(value as u64)
            .map_err(|_| SubstrateError::range(format!("address {value} out of range")))
    }

    /// `nativeCall(address, signature, ...args)` or `nativeCall(nativeFunction, ...args)`.
    pub(super) fn native_call(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
        required(args, 1)?;
        let marshaller = Marshaller::new().with_hooks(runtime.hooks());
        if args[0].native_function().is_some() {
            // SAFETY: registered only through `enable_native_access`, whose caller vouches for
            // every address scripts can reach.
            return unsafe { marshaller.call_function(&args[0], &args[1..]) };
        }
        required(args, 2)?;
        let target = address(args, 0)?;
        let signature = text(args, 1, "signature")?;
        // SAFETY: as above.
        unsafe { marshaller.call(runtime.arena(), target, &signature, &args[2..]) }
    }

    /// `nativeFunction(address, signature)`.
    pub(super) fn native_function(
        runtime: &SubstrateRuntime,
        args: &[Value],
    ) -> SubstrateResult<Value> {
        required(args, 2)?;
        let target = address(args, 0)?;
        let signature = text(args, 1, "signature")?;
        ffi::native_function(runtime.arena(), target, &signature)
    }

    /// `memoryArea(address, length)`.
    pub(super) fn memory_area(runtime: &SubstrateRuntime, args: &[Value]) -> SubstrateResult<Value> {
        required(args, 2)?;
        let target = address(args, 0)?;
        let len = count(args, 1, "length")?;
        // SAFETY: registered only through `enable_native_access`.
        unsafe { view::memory_area(runtime.arena(), target, len) }
    }
}
