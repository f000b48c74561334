use std::fmt;

use crate::ffi::NativeFunctionRef;
use crate::view::ElementType;
use crate::{SubstrateError, SubstrateResult};

use super::arena::{Arena, CellId, Payload};

/// Variant tag of a cell. Fixed for the lifetime of the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Undefined,
    Null,
    Number,
    Integer,
    String,
    Array,
    Object,
    ArrayBuffer,
    View(ElementType),
    NativeFunction,
}

impl CellKind {
    pub fn name(&self) -> &'static str {
        match self {
            CellKind::Undefined => "undefined",
            CellKind::Null => "null",
            CellKind::Number => "number",
            CellKind::Integer => "integer",
            CellKind::String => "string",
            CellKind::Array => "array",
            CellKind::Object => "object",
            CellKind::ArrayBuffer => "ArrayBuffer",
            CellKind::View(element) => element.name(),
            CellKind::NativeFunction => "native function",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, CellKind::Number | CellKind::Integer)
    }

    pub(crate) fn of(payload: &Payload) -> CellKind {
        match payload {
            Payload::Undefined => CellKind::Undefined,
            Payload::Null => CellKind::Null,
            Payload::Number(_) => CellKind::Number,
            Payload::Integer(_) => CellKind::Integer,
            Payload::String(_) => CellKind::String,
            Payload::Array(_) => CellKind::Array,
            Payload::Object(_) => CellKind::Object,
            Payload::ArrayBuffer(_) => CellKind::ArrayBuffer,
            Payload::View(header) => CellKind::View(header.element),
            Payload::NativeFunction(_) => CellKind::NativeFunction,
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owning handle to one cell. Cloning retains the cell and dropping releases it.
pub struct Value {
    arena: Arena,
    id: CellId,
}

impl Value {
    /// Wraps a reference the caller already owns.
    pub(crate) fn from_raw(arena: Arena, id: CellId) -> Self {
        Self { arena, id }
    }

    /// Takes a fresh reference to `id`, which must be live in `arena`.
    pub(crate) fn retained(arena: &Arena, id: CellId) -> Self {
        arena.lock().retain(id);
        Self::from_raw(arena.clone(), id)
    }

    pub(crate) fn id(&self) -> CellId {
        self.id
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn kind(&self) -> CellKind {
        CellKind::of(self.arena.lock().payload(self.id))
    }

    pub fn is_undefined(&self) -> bool {
        self.kind() == CellKind::Undefined
    }

    pub fn is_null(&self) -> bool {
        self.kind() == CellKind::Null
    }

    /// Numeric value of a Number or Integer cell.
    pub fn as_f64(&self) -> Option<f64> {
        match self.arena.lock().payload(self.id) {
            Payload::Number(value) => Some(*value),
            Payload::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.arena.lock().payload(self.id) {
            Payload::Integer(value) => Some(*value),
            Payload::Number(value) if value.is_finite() => Some(value.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self.arena.lock().payload(self.id) {
            Payload::String(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// Numeric coercion; non-numeric cells become NaN, null becomes 0.
    pub fn to_number(&self) -> f64 {
        self.arena.lock().number_of(self.id)
    }

    pub(crate) fn expect_number(&self, what: &str) -> SubstrateResult<f64> {
        self.as_f64()
            .ok_or_else(|| SubstrateError::type_mismatch(format!("number for {what}"), self.kind().name()))
    }

    /// Element count of arrays and views, byte count of buffers, character count of strings.
    pub fn length(&self) -> Option<usize> {
        match self.arena.lock().payload(self.id) {
            Payload::Array(items) => Some(items.len()),
            Payload::Object(fields) => Some(fields.len()),
            Payload::String(text) => Some(text.chars().count()),
            Payload::ArrayBuffer(backing) => Some(backing.len()),
            Payload::View(header) => Some(header.length),
            Payload::Undefined
            | Payload::Null
            | Payload::Number(_)
            | Payload::Integer(_)
            | Payload::NativeFunction(_) => None,
        }
    }

    /// Child of an Array cell.
    pub fn element(&self, index: usize) -> Option<Value> {
        let id = {
            let mut state = self.arena.lock();
            let child = match state.payload(self.id) {
                Payload::Array(items) => *items.get(index)?,
                _ => return None,
            };
            state.retain(child);
            child
        };
        Some(Value::from_raw(self.arena.clone(), id))
    }

    /// All children of an Array cell, in order.
    pub fn elements(&self) -> Vec<Value> {
        let ids = {
            let mut state = self.arena.lock();
            let ids = match state.payload(self.id) {
                Payload::Array(items) => items.clone(),
                _ => Vec::new(),
            };
            for id in &ids {
                state.retain(*id);
            }
            ids
        };
        ids.into_iter()
            .map(|id| Value::from_raw(self.arena.clone(), id))
            .collect()
    }

    /// Appends to an Array cell.
    pub fn push(&self, item: Value) -> SubstrateResult<()> {
        self.arena.ensure_owned(&item)?;
        let mut state = self.arena.lock();
        let found = CellKind::of(state.payload(self.id));
        state.retain(item.id);
        match state.payload_mut(self.id) {
            Some(Payload::Array(items)) => {
                items.push(item.id);
                Ok(())
            }
            _ => {
                state.release(item.id);
                Err(SubstrateError::type_mismatch("array", found.name()))
            }
        }
    }

    /// Replaces the child at `index` of an Array cell.
    pub fn set_element(&self, index: usize, item: Value) -> SubstrateResult<()> {
        self.arena.ensure_owned(&item)?;
        let mut state = self.arena.lock();
        let found = CellKind::of(state.payload(self.id));
        let previous = match state.payload_mut(self.id) {
            Some(Payload::Array(items)) => match items.get_mut(index) {
                Some(slot) => std::mem::replace(slot, item.id),
                None => {
                    let len = items.len();
                    return Err(SubstrateError::range(format!(
                        "index {index} out of range for array of length {len}"
                    )));
                }
            },
            _ => return Err(SubstrateError::type_mismatch("array", found.name())),
        };
        state.retain(item.id);
        state.release(previous);
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        let id = {
            let mut state = self.arena.lock();
            let child = match state.payload(self.id) {
                Payload::Object(fields) => fields
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, id)| *id)?,
                _ => return None,
            };
            state.retain(child);
            child
        };
        Some(Value::from_raw(self.arena.clone(), id))
    }

    /// Inserts or replaces a field, keeping insertion order for new names.
    pub fn set_field(&self, name: &str, value: Value) -> SubstrateResult<()> {
        self.arena.ensure_owned(&value)?;
        let mut state = self.arena.lock();
        let found = CellKind::of(state.payload(self.id));
        let previous = match state.payload_mut(self.id) {
            Some(Payload::Object(fields)) => {
                match fields.iter_mut().find(|(key, _)| key == name) {
                    Some((_, slot)) => Some(std::mem::replace(slot, value.id)),
                    None => {
                        fields.push((name.to_string(), value.id));
                        None
                    }
                }
            }
            _ => return Err(SubstrateError::type_mismatch("object", found.name())),
        };
        state.retain(value.id);
        if let Some(previous) = previous {
            state.release(previous);
        }
        Ok(())
    }

    pub fn fields(&self) -> Vec<(String, Value)> {
        let entries = {
            let mut state = self.arena.lock();
            let entries = match state.payload(self.id) {
                Payload::Object(fields) => fields.clone(),
                _ => Vec::new(),
            };
            for (_, id) in &entries {
                state.retain(*id);
            }
            entries
        };
        entries
            .into_iter()
            .map(|(name, id)| (name, Value::from_raw(self.arena.clone(), id)))
            .collect()
    }

    pub fn native_function(&self) -> Option<NativeFunctionRef> {
        match self.arena.lock().payload(self.id) {
            Payload::NativeFunction(function) => Some(function.clone()),
            _ => None,
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.arena.lock().refs(self.id)
    }

    /// Identity comparison: both handles name the same cell.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        self.arena.ptr_eq(&other.arena) && self.id == other.id
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        Value::retained(&self.arena, self.id)
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        self.arena.lock().release(self.id);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("cell", &self.id.raw())
            .field("kind", &self.kind())
            .finish()
    }
}
