//! Conversions between strings, buffers and byte views.
//!
//! Strings are treated as Latin-1: every character is one byte, and characters above U+00FF
//! cannot be converted to bytes.

use std::collections::HashSet;

use crate::memory::{ArenaState, CellId, CellKind, Payload, Value};
use crate::{SubstrateError, SubstrateResult};

use super::{ElementType, read_all, view};

/// Concatenates the bytes of every argument into a string.
///
/// Numbers contribute one byte, strings their characters, arrays and views each element, and
/// `{ data, count }` objects repeat `data` `count` times.
pub fn to_string(args: &[Value]) -> SubstrateResult<Value> {
    let Some(first) = args.first() else {
        return Err(SubstrateError::ArgumentCount {
            expected: 1,
            found: 0,
        });
    };
    let arena = first.arena();
    let bytes = collect_bytes(args)?;
    arena.string(bytes.into_iter().map(char::from).collect::<String>())
}

/// Same byte collection as [`to_string`], stored in a new `Uint8Array`.
pub fn to_uint8_array(args: &[Value]) -> SubstrateResult<Value> {
    let Some(first) = args.first() else {
        return Err(SubstrateError::ArgumentCount {
            expected: 1,
            found: 0,
        });
    };
    let arena = first.arena();
    let bytes = collect_bytes(args)?;
    let buffer = arena.array_buffer_from(bytes)?;
    view(&buffer, ElementType::UINT8, 0, None)
}

/// Copies a string's characters into a new ArrayBuffer.
pub fn to_array_buffer(text: &Value) -> SubstrateResult<Value> {
    let Some(text_value) = text.as_string() else {
        return Err(SubstrateError::type_mismatch("string", text.kind().name()));
    };
    let bytes = text_value
        .chars()
        .map(latin1)
        .collect::<SubstrateResult<Vec<u8>>>()?;
    text.arena().array_buffer_from(bytes)
}

fn latin1(ch: char) -> SubstrateResult<u8> {
    u8::try_from(u32::from(ch)).map_err(|_| {
        SubstrateError::range(format!(
            "character U+{:04X} does not fit in a byte",
            u32::from(ch)
        ))
    })
}

enum Step {
    Enter(CellId),
    Leave(CellId),
}

pub(crate) fn collect_bytes(args: &[Value]) -> SubstrateResult<Vec<u8>> {
    let Some(first) = args.first() else {
        return Ok(Vec::new());
    };
    let arena = first.arena();
    for arg in args {
        arena.ensure_owned(arg)?;
    }
    let state = arena.lock();
    let mut out = Vec::new();
    let mut on_path = HashSet::new();
    // Every element that can ever be visited is charged up front, so nested repeats of empty
    // data cannot expand without bound.
    let mut budget = StepBudget::new(
        state
            .buffer_capacity()
            .saturating_mul(2)
            .saturating_add(state.live_cells())
            .saturating_add(args.len()),
    );
    budget.charge(args.len())?;
    let mut steps: Vec<Step> = args.iter().rev().map(|arg| Step::Enter(arg.id())).collect();
    while let Some(step) = steps.pop() {
        let id = match step {
            Step::Enter(id) => id,
            Step::Leave(id) => {
                on_path.remove(&id);
                continue;
            }
        };
        match state.payload(id) {
            Payload::Number(value) => out.push(super::wrap_to_width(*value, 8) as u8),
            Payload::Integer(value) => out.push(*value as u8),
            Payload::String(text) => {
                for ch in text.chars() {
                    out.push(latin1(ch)?);
                }
            }
            Payload::ArrayBuffer(backing) => out.extend_from_slice(backing.bytes()),
            Payload::View(header) => {
                out.extend(
                    read_all(&state, header)?
                        .into_iter()
                        .map(|value| super::wrap_to_width(value, 8) as u8),
                );
            }
            Payload::Array(items) => {
                enter(&mut on_path, &mut steps, id)?;
                budget.charge(items.len())?;
                steps.extend(items.iter().rev().map(|child| Step::Enter(*child)));
            }
            Payload::Object(_) => {
                let (data, count) = repeat_fields(&state, id)?;
                enter(&mut on_path, &mut steps, id)?;
                budget.charge(count)?;
                steps.extend(std::iter::repeat_n(data, count).map(Step::Enter));
            }
            other @ (Payload::Undefined | Payload::Null | Payload::NativeFunction(_)) => {
                return Err(SubstrateError::type_mismatch(
                    "number, string, array or buffer",
                    CellKind::of(other).name(),
                ));
            }
        }
        if out.len() > state.buffer_capacity() {
            return Err(SubstrateError::OutOfMemory {
                resource: "buffer bytes",
                requested: out.len(),
                available: state.buffer_capacity(),
            });
        }
    }
    Ok(out)
}

struct StepBudget {
    remaining: usize,
}

impl StepBudget {
    fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    fn charge(&mut self, steps: usize) -> SubstrateResult<()> {
        self.remaining = self.remaining.checked_sub(steps).ok_or(SubstrateError::OutOfMemory {
            resource: "conversion steps",
            requested: steps,
            available: self.remaining,
        })?;
        Ok(())
    }
}

fn enter(on_path: &mut HashSet<CellId>, steps: &mut Vec<Step>, id: CellId) -> SubstrateResult<()> {
    if !on_path.insert(id) {
        return Err(SubstrateError::range("cyclic structure cannot be converted to bytes"));
    }
    steps.push(Step::Leave(id));
    Ok(())
}

/// `{ data, count }` with `count` defaulting to 1.
fn repeat_fields(state: &ArenaState, id: CellId) -> SubstrateResult<(CellId, usize)> {
    let Payload::Object(fields) = state.payload(id) else {
        return Err(SubstrateError::type_mismatch("object", "non-object"));
    };
    let lookup = |name: &str| fields.iter().find(|(key, _)| key == name).map(|(_, id)| *id);
    let data = lookup("data")
        .ok_or_else(|| SubstrateError::type_mismatch("{ data, count } object", "object without data"))?;
    let count = match lookup("count") {
        Some(count) => {
            let count = state.number_of(count);
            if !count.is_finite() || count < 0.0 {
                return Err(SubstrateError::range(format!("invalid repeat count {count}")));
            }
            count as usize
        }
        None => 1,
    };
    Ok((data, count))
}
