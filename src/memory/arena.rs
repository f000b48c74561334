//! Fixed-size cell arena with reference counting.
//!
//! Every slot is reserved when the arena is created; allocation pops a slot from the free list
//! and fails with [`SubstrateError::OutOfMemory`] once the pool is empty, because the devices
//! this runs on have nothing to fall back to. Slot 0 and 1 hold the pinned `undefined` and
//! `null` cells so that neither ever needs an allocation.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::config::ArenaConfig;
use crate::ffi::NativeFunctionRef;
use crate::view::ElementType;
use crate::{SubstrateError, SubstrateResult};

use super::value::Value;

/// Index of a slot inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellId(u32);

impl CellId {
    pub(crate) const UNDEFINED: CellId = CellId(0);
    pub(crate) const NULL: CellId = CellId(1);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

const PINNED_CELLS: usize = 2;

/// Storage behind an ArrayBuffer cell.
#[derive(Debug)]
pub(crate) enum Backing {
    /// Bytes owned by the arena and charged against its buffer budget.
    Owned(Box<[u8]>),
    /// Memory owned by the caller or by hardware. Never freed, zeroed or resized here.
    #[cfg(feature = "ffi")]
    External { address: usize, len: usize },
    /// A borrowed region whose borrow has ended; every access is out of range.
    Detached,
}

impl Backing {
    pub(crate) fn len(&self) -> usize {
        match self {
            Backing::Owned(bytes) => bytes.len(),
            #[cfg(feature = "ffi")]
            Backing::External { len, .. } => *len,
            Backing::Detached => 0,
        }
    }

    fn owned_len(&self) -> usize {
        match self {
            Backing::Owned(bytes) => bytes.len(),
            _ => 0,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(bytes) => bytes,
            #[cfg(feature = "ffi")]
            Backing::External { address, len } => {
                if *len == 0 {
                    return &[];
                }
                // SAFETY: `memory_area` and `BorrowedBuffer` require the region to be valid for
                // `len` bytes for as long as this backing stays attached.
                unsafe { std::slice::from_raw_parts(*address as *const u8, *len) }
            }
            Backing::Detached => &[],
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Backing::Owned(bytes) => bytes,
            #[cfg(feature = "ffi")]
            Backing::External { address, len } => {
                if *len == 0 {
                    return &mut [];
                }
                // SAFETY: as in `bytes`; the arena lock guarantees this is the only live slice.
                unsafe { std::slice::from_raw_parts_mut(*address as *mut u8, *len) }
            }
            Backing::Detached => &mut [],
        }
    }

    /// Address of the first byte, as handed to native code.
    #[cfg(feature = "ffi")]
    pub(crate) fn address(&mut self) -> Option<usize> {
        match self {
            Backing::Owned(bytes) => Some(bytes.as_mut_ptr() as usize),
            Backing::External { address, .. } => Some(*address),
            Backing::Detached => None,
        }
    }
}

/// View header stored in a view cell; `buffer` is an owning edge to the ArrayBuffer cell.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ViewHeader {
    pub(crate) buffer: CellId,
    pub(crate) element: ElementType,
    pub(crate) byte_offset: usize,
    pub(crate) length: usize,
}

/// Contents of a live slot. The variant is fixed for the lifetime of the cell.
#[derive(Debug)]
pub(crate) enum Payload {
    Undefined,
    Null,
    Number(f64),
    Integer(i64),
    String(String),
    Array(Vec<CellId>),
    Object(Vec<(String, CellId)>),
    ArrayBuffer(Backing),
    View(ViewHeader),
    NativeFunction(NativeFunctionRef),
}

impl Payload {
    fn push_children(&self, out: &mut Vec<CellId>) {
        match self {
            Payload::Array(items) => out.extend(items.iter().copied()),
            Payload::Object(fields) => out.extend(fields.iter().map(|(_, id)| *id)),
            Payload::View(header) => out.push(header.buffer),
            Payload::Undefined
            | Payload::Null
            | Payload::Number(_)
            | Payload::Integer(_)
            | Payload::String(_)
            | Payload::ArrayBuffer(_)
            | Payload::NativeFunction(_) => {}
        }
    }

    fn owned_bytes(&self) -> usize {
        match self {
            Payload::ArrayBuffer(backing) => backing.owned_len(),
            _ => 0,
        }
    }
}

static FREED: Payload = Payload::Undefined;

#[derive(Debug, Default)]
struct Slot {
    refs: u32,
    payload: Option<Payload>,
}

impl Slot {
    fn pinned(payload: Payload) -> Self {
        Self {
            refs: 1,
            payload: Some(payload),
        }
    }
}

/// Sticky conditions reported through `getErrorFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFlag {
    /// Live cells crossed the configured low-memory threshold.
    LowMemory,
    /// An allocation failed.
    Memory,
}

impl ErrorFlag {
    const ALL: [ErrorFlag; 2] = [ErrorFlag::LowMemory, ErrorFlag::Memory];

    fn bit(self) -> u8 {
        match self {
            ErrorFlag::LowMemory => 1,
            ErrorFlag::Memory => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorFlag::LowMemory => "LOW_MEMORY",
            ErrorFlag::Memory => "MEMORY",
        }
    }

    fn decode(bits: u8) -> Vec<ErrorFlag> {
        Self::ALL
            .into_iter()
            .filter(|flag| bits & flag.bit() != 0)
            .collect()
    }
}

/// Point-in-time arena usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    pub cell_capacity: usize,
    pub live_cells: usize,
    pub buffer_capacity: usize,
    pub buffer_used: usize,
}

impl ArenaStats {
    pub fn free_cells(&self) -> usize {
        self.cell_capacity - self.live_cells
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} cells, {} / {} buffer bytes",
            self.live_cells, self.cell_capacity, self.buffer_used, self.buffer_capacity
        )
    }
}

/// Mutable arena state; only reachable through [`Arena::lock`].
#[derive(Debug)]
pub(crate) struct ArenaState {
    slots: Vec<Slot>,
    free: Vec<CellId>,
    live: usize,
    buffer_used: usize,
    buffer_capacity: usize,
    low_water: usize,
    flags: u8,
}

impl ArenaState {
    fn new(config: &ArenaConfig) -> Self {
        let cells = config.cells;
        let total = cells + PINNED_CELLS;
        let mut slots = Vec::with_capacity(total);
        slots.push(Slot::pinned(Payload::Undefined));
        slots.push(Slot::pinned(Payload::Null));
        slots.resize_with(total, Slot::default);
        let free = (PINNED_CELLS..total)
            .rev()
            .map(|index| CellId(index as u32))
            .collect();
        let low_water = if config.low_memory_percent == 0 {
            usize::MAX
        } else {
            (cells * usize::from(config.low_memory_percent)).div_ceil(100)
        };
        Self {
            slots,
            free,
            live: 0,
            buffer_used: 0,
            buffer_capacity: config.buffer_bytes,
            low_water,
            flags: 0,
        }
    }

    fn cell_capacity(&self) -> usize {
        self.slots.len() - PINNED_CELLS
    }

    pub(crate) fn free_cells(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn live_cells(&self) -> usize {
        self.live
    }

    pub(crate) fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub(crate) fn alloc(&mut self, payload: Payload) -> SubstrateResult<CellId> {
        let bytes = payload.owned_bytes();
        let available = self.buffer_capacity.saturating_sub(self.buffer_used);
        if bytes > available {
            warn!(requested = bytes, available, "array buffer budget exhausted");
            self.flags |= ErrorFlag::Memory.bit();
            self.discard(payload);
            return Err(SubstrateError::OutOfMemory {
                resource: "buffer bytes",
                requested: bytes,
                available,
            });
        }
        let Some(id) = self.free.pop() else {
            warn!(capacity = self.cell_capacity(), "cell arena exhausted");
            self.flags |= ErrorFlag::Memory.bit();
            self.discard(payload);
            return Err(SubstrateError::OutOfMemory {
                resource: "cells",
                requested: 1,
                available: 0,
            });
        };
        self.buffer_used += bytes;
        let slot = &mut self.slots[id.index()];
        slot.refs = 1;
        slot.payload = Some(payload);
        self.live += 1;
        if self.live >= self.low_water {
            self.flags |= ErrorFlag::LowMemory.bit();
        }
        trace!(cell = id.raw(), live = self.live, "allocated cell");
        Ok(id)
    }

    /// Drops the references a payload holds without ever giving it a slot.
    fn discard(&mut self, payload: Payload) {
        let mut pending = Vec::new();
        payload.push_children(&mut pending);
        self.release_all(pending);
    }

    pub(crate) fn retain(&mut self, id: CellId) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            debug_assert!(slot.payload.is_some(), "retain of free cell {}", id.raw());
            slot.refs = slot.refs.saturating_add(1);
        }
    }

    pub(crate) fn release(&mut self, id: CellId) {
        self.release_all(vec![id]);
    }

    /// Releases with an explicit work list so deep structures never recurse.
    fn release_all(&mut self, mut pending: Vec<CellId>) {
        while let Some(id) = pending.pop() {
            let Some(slot) = self.slots.get_mut(id.index()) else {
                continue;
            };
            debug_assert!(slot.refs > 0, "release of free cell {}", id.raw());
            slot.refs = slot.refs.saturating_sub(1);
            if slot.refs > 0 {
                continue;
            }
            let Some(payload) = slot.payload.take() else {
                continue;
            };
            payload.push_children(&mut pending);
            self.buffer_used -= payload.owned_bytes();
            self.free.push(id);
            self.live -= 1;
            trace!(cell = id.raw(), live = self.live, "released cell");
        }
    }

    pub(crate) fn refs(&self, id: CellId) -> u32 {
        self.slots.get(id.index()).map_or(0, |slot| slot.refs)
    }

    pub(crate) fn payload(&self, id: CellId) -> &Payload {
        match self.slots.get(id.index()).and_then(|slot| slot.payload.as_ref()) {
            Some(payload) => payload,
            None => {
                debug_assert!(false, "access to free cell {}", id.raw());
                &FREED
            }
        }
    }

    pub(crate) fn payload_mut(&mut self, id: CellId) -> Option<&mut Payload> {
        self.slots
            .get_mut(id.index())
            .and_then(|slot| slot.payload.as_mut())
    }

    /// Numeric coercion used by every algorithm that reads generic arrays.
    pub(crate) fn number_of(&self, id: CellId) -> f64 {
        match self.payload(id) {
            Payload::Number(value) => *value,
            Payload::Integer(value) => *value as f64,
            Payload::Null => 0.0,
            Payload::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Payload::Undefined
            | Payload::Array(_)
            | Payload::Object(_)
            | Payload::ArrayBuffer(_)
            | Payload::View(_)
            | Payload::NativeFunction(_) => f64::NAN,
        }
    }

    fn stats(&self) -> ArenaStats {
        ArenaStats {
            cell_capacity: self.cell_capacity(),
            live_cells: self.live,
            buffer_capacity: self.buffer_capacity,
            buffer_used: self.buffer_used,
        }
    }
}

/// Initial contents for [`Arena::allocate`].
#[derive(Debug)]
pub enum CellInit {
    Undefined,
    Null,
    Number(f64),
    Integer(i64),
    String(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
    ArrayBuffer(Vec<u8>),
    NativeFunction(NativeFunctionRef),
}

/// Shared handle to the cell arena. Cloning shares the same pool.
#[derive(Clone)]
pub struct Arena {
    state: Arc<Mutex<ArenaState>>,
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::from_config(&ArenaConfig::default())
    }
}

impl Arena {
    pub fn new(cells: usize, buffer_bytes: usize) -> Self {
        Self::from_config(&ArenaConfig {
            cells,
            buffer_bytes,
            ..ArenaConfig::default()
        })
    }

    pub fn from_config(config: &ArenaConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ArenaState::new(config))),
        }
    }

    /// Locks the arena. Callers must not drop a [`Value`] while holding the guard.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ArenaState> {
        self.state.lock()
    }

    pub fn ptr_eq(&self, other: &Arena) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn stats(&self) -> ArenaStats {
        self.lock().stats()
    }

    pub fn live_cells(&self) -> usize {
        self.lock().live
    }

    /// Returns the sticky error flags without clearing them.
    pub fn error_flags(&self) -> Vec<ErrorFlag> {
        ErrorFlag::decode(self.lock().flags)
    }

    /// Returns the sticky error flags and clears them.
    pub fn take_error_flags(&self) -> Vec<ErrorFlag> {
        let mut state = self.lock();
        let flags = std::mem::take(&mut state.flags);
        ErrorFlag::decode(flags)
    }

    pub(crate) fn ensure_owned(&self, value: &Value) -> SubstrateResult<()> {
        if value.arena().ptr_eq(self) {
            Ok(())
        } else {
            Err(SubstrateError::type_mismatch(
                "value from this arena",
                "value from another arena",
            ))
        }
    }

    /// Allocates a cell with reference count 1. Children passed in are retained by the new cell.
    pub fn allocate(&self, init: CellInit) -> SubstrateResult<Value> {
        match init {
            CellInit::Undefined => Ok(self.undefined()),
            CellInit::Null => Ok(self.null()),
            CellInit::Number(value) => self.allocate_payload(Payload::Number(value)),
            CellInit::Integer(value) => self.allocate_payload(Payload::Integer(value)),
            CellInit::String(text) => self.allocate_payload(Payload::String(text)),
            CellInit::Array(items) => {
                let ids = items.iter().map(Value::id).collect();
                self.allocate_with_children(Payload::Array(ids), &items)
            }
            CellInit::Object(fields) => {
                let entries = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.id()))
                    .collect();
                let children: Vec<Value> = fields.into_iter().map(|(_, value)| value).collect();
                self.allocate_with_children(Payload::Object(entries), &children)
            }
            CellInit::ArrayBuffer(bytes) => self.allocate_payload(Payload::ArrayBuffer(
                Backing::Owned(bytes.into_boxed_slice()),
            )),
            CellInit::NativeFunction(function) => {
                self.allocate_payload(Payload::NativeFunction(function))
            }
        }
    }

    fn allocate_with_children(&self, payload: Payload, children: &[Value]) -> SubstrateResult<Value> {
        for child in children {
            self.ensure_owned(child)?;
        }
        let id = {
            let mut state = self.lock();
            for child in children {
                state.retain(child.id());
            }
            state.alloc(payload)?
        };
        Ok(Value::from_raw(self.clone(), id))
    }

    pub(crate) fn allocate_payload(&self, payload: Payload) -> SubstrateResult<Value> {
        let id = self.lock().alloc(payload)?;
        Ok(Value::from_raw(self.clone(), id))
    }

    /// The pinned `undefined` cell. Never allocates.
    pub fn undefined(&self) -> Value {
        self.lock().retain(CellId::UNDEFINED);
        Value::from_raw(self.clone(), CellId::UNDEFINED)
    }

    /// The pinned `null` cell. Never allocates.
    pub fn null(&self) -> Value {
        self.lock().retain(CellId::NULL);
        Value::from_raw(self.clone(), CellId::NULL)
    }

    pub fn number(&self, value: f64) -> SubstrateResult<Value> {
        self.allocate_payload(Payload::Number(value))
    }

    pub fn integer(&self, value: i64) -> SubstrateResult<Value> {
        self.allocate_payload(Payload::Integer(value))
    }

    pub fn string(&self, text: impl Into<String>) -> SubstrateResult<Value> {
        self.allocate_payload(Payload::String(text.into()))
    }

    pub fn array(&self, items: Vec<Value>) -> SubstrateResult<Value> {
        self.allocate(CellInit::Array(items))
    }

    /// Allocates an array of numbers, one cell per element plus the array cell.
    pub fn number_array(&self, values: &[f64]) -> SubstrateResult<Value> {
        let items = values
            .iter()
            .map(|value| self.number(*value))
            .collect::<SubstrateResult<Vec<_>>>()?;
        self.array(items)
    }

    pub fn object(&self, fields: Vec<(String, Value)>) -> SubstrateResult<Value> {
        self.allocate(CellInit::Object(fields))
    }

    /// Allocates a zero-filled ArrayBuffer charged against the buffer budget.
    pub fn array_buffer(&self, len: usize) -> SubstrateResult<Value> {
        self.allocate(CellInit::ArrayBuffer(vec![0; len]))
    }

    pub fn array_buffer_from(&self, bytes: Vec<u8>) -> SubstrateResult<Value> {
        self.allocate(CellInit::ArrayBuffer(bytes))
    }
}
