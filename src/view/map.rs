//=============================================
// solvra_substrate/src/view/map.rs
//=============================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Bit-granular lookup mapping between views
// Objective: Unpack source fields, map them through a table or callback and
//            repack them into the destination bitstream
// Formatting: Zobie.format (.solvraformat)
//=============================================

use tracing::{debug, instrument};

use crate::memory::{ArenaState, CellId, CellKind, Payload, Value, ViewHeader};
use crate::{SubstrateError, SubstrateResult};

use super::bits::{BitCursor, BitOrder};
use super::{ElementType, NumericRepr, view_region, view_region_mut, wrap_to_width};

/// Where `map_in_place` takes its output values from.
pub enum Lookup<'a> {
    /// The source index itself.
    Identity,
    /// A flat array or view indexed by the source value. Indices past its end map to 0.
    Table(&'a Value),
    /// Called with each source value; runs without the arena locked.
    Function(&'a mut dyn FnMut(u64) -> f64),
}

/// Reads every source element, looks it up and packs the results into `dest`.
///
/// Integer source elements are used as raw unsigned field bits, so `-1` in an `Int8Array`
/// selects entry 255. Float sources truncate, and negative or non-finite values miss the table.
/// When `dest` is a view its bytes are treated as a stream of `dest_bits` wide fields; if that
/// width matches the view's own element width the view's encoding is used (so float views receive
/// floats), otherwise values wrap into unsigned fields. A generic array destination has no field
/// width: it receives the looked-up numbers unchanged and `dest_bits` only applies to views.
/// Sub-byte fields on both sides follow `order`. Nothing is written unless every result fits.
#[instrument(skip(source, dest, lookup))]
pub fn map_in_place(
    source: &Value,
    dest: &Value,
    lookup: Lookup<'_>,
    dest_bits: u32,
    order: BitOrder,
) -> SubstrateResult<()> {
    if !(1..=64).contains(&dest_bits) {
        return Err(SubstrateError::range(format!(
            "destination width must be 1..=64 bits, got {dest_bits}"
        )));
    }
    let arena = source.arena();
    arena.ensure_owned(dest)?;

    let indices = {
        let state = arena.lock();
        read_indices(&state, source, order)?
    };

    let values: Vec<f64> = match lookup {
        Lookup::Identity => indices.iter().map(|index| index.map_or(0.0, |i| i as f64)).collect(),
        Lookup::Table(table) => {
            arena.ensure_owned(table)?;
            let state = arena.lock();
            let entries = table_entries(&state, table)?;
            indices
                .iter()
                .map(|index| {
                    index
                        .and_then(|i| usize::try_from(i).ok())
                        .and_then(|i| entries.get(i).copied())
                        .unwrap_or(0.0)
                })
                .collect()
        }
        Lookup::Function(function) => indices
            .iter()
            .map(|index| index.map_or(0.0, |i| function(i)))
            .collect(),
    };

    let mut state = arena.lock();
    write_values(&mut state, dest, &values, dest_bits, order)?;
    debug!(elements = values.len(), "mapped elements in place");
    Ok(())
}

/// Source elements as lookup indices; `None` marks a value that cannot index anything.
fn read_indices(
    state: &ArenaState,
    source: &Value,
    order: BitOrder,
) -> SubstrateResult<Vec<Option<u64>>> {
    match state.payload(source.id()) {
        Payload::View(header) => {
            let region = view_region(state, header)?;
            let width = header.element.bits();
            let mut cursor = BitCursor::new(order);
            (0..header.length)
                .map(|_| -> SubstrateResult<Option<u64>> {
                    let raw = cursor.read(region, width).ok_or_else(|| {
                        SubstrateError::range("source view exceeds its buffer")
                    })?;
                    Ok(match header.element.repr() {
                        NumericRepr::Float => float_index(header.element.decode(raw)),
                        NumericRepr::Unsigned | NumericRepr::Signed => Some(raw),
                    })
                })
                .collect()
        }
        Payload::Array(items) => Ok(items
            .iter()
            .map(|id| float_index(state.number_of(*id)))
            .collect()),
        other => Err(SubstrateError::type_mismatch(
            "array or typed view",
            CellKind::of(other).name(),
        )),
    }
}

fn float_index(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.trunc() as u64)
}

fn table_entries(state: &ArenaState, table: &Value) -> SubstrateResult<Vec<f64>> {
    match state.payload(table.id()) {
        Payload::Array(items) => Ok(items.iter().map(|id| state.number_of(*id)).collect()),
        Payload::View(header) => super::read_all(state, header),
        other => Err(SubstrateError::type_mismatch(
            "lookup array or typed view",
            CellKind::of(other).name(),
        )),
    }
}

fn write_values(
    state: &mut ArenaState,
    dest: &Value,
    values: &[f64],
    dest_bits: u32,
    order: BitOrder,
) -> SubstrateResult<()> {
    let header: ViewHeader = match state.payload(dest.id()) {
        Payload::View(header) => *header,
        Payload::Array(items) => {
            if items.len() < values.len() {
                return Err(SubstrateError::range(format!(
                    "destination holds {} elements, {} needed",
                    items.len(),
                    values.len()
                )));
            }
            return write_array(state, dest.id(), values);
        }
        other => {
            return Err(SubstrateError::type_mismatch(
                "array or typed view",
                CellKind::of(other).name(),
            ));
        }
    };
    let encoding = (dest_bits == header.element.bits()).then_some(header.element);
    let region = view_region_mut(state, &header)?;
    let capacity = BitCursor::new(order).remaining_fields(region, dest_bits);
    if capacity < values.len() {
        return Err(SubstrateError::range(format!(
            "destination holds {capacity} fields of {dest_bits} bits, {} needed",
            values.len()
        )));
    }
    let mut cursor = BitCursor::new(order);
    for value in values {
        cursor.write(region, dest_bits, encode(encoding, *value, dest_bits));
    }
    Ok(())
}

fn encode(encoding: Option<ElementType>, value: f64, bits: u32) -> u64 {
    match encoding {
        Some(element) => element.encode(value),
        None => wrap_to_width(value, bits),
    }
}

/// Replaces the leading cells of a generic array with fresh number cells.
pub(crate) fn write_array(state: &mut ArenaState, array: CellId, values: &[f64]) -> SubstrateResult<()> {
    let available = state.free_cells();
    if available < values.len() {
        return Err(SubstrateError::OutOfMemory {
            resource: "cells",
            requested: values.len(),
            available,
        });
    }
    for (index, value) in values.iter().enumerate() {
        let fresh = state.alloc(Payload::Number(*value))?;
        let previous = match state.payload_mut(array) {
            Some(Payload::Array(items)) => std::mem::replace(&mut items[index], fresh),
            _ => fresh,
        };
        state.release(previous);
    }
    Ok(())
}
