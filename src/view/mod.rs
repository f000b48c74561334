//! Typed views over ArrayBuffer cells.
//!
//! A view never owns bytes. It keeps an owning edge to the ArrayBuffer cell it aliases and
//! describes the element type, a byte offset and an element count. Every access checks that the
//! described extent still fits inside the buffer, so a shrunken or detached buffer fails with
//! `RangeError` instead of reading stray memory.
//!
//! Elements of 8 bits and wider are little-endian. Sub-byte elements are packed MSB-first: the
//! first element of a `Uint1Array` is bit 7 of its first byte.

pub mod bits;
mod convert;
#[cfg(feature = "ffi")]
mod external;
mod map;

pub use bits::{BitCursor, BitOrder};
pub use convert::{to_array_buffer, to_string, to_uint8_array};
pub(crate) use convert::collect_bytes;
#[cfg(feature = "ffi")]
pub use external::{BorrowedBuffer, memory_area};
pub use map::{Lookup, map_in_place};

use crate::memory::{Arena, ArenaState, CellId, Payload, Value, ViewHeader};
use crate::{SubstrateError, SubstrateResult};

/// How the bits of an element are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericRepr {
    Unsigned,
    Signed,
    Float,
}

/// Width and interpretation of one view element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementType {
    bits: u8,
    repr: NumericRepr,
}

impl ElementType {
    pub const UINT1: Self = Self::known(1, NumericRepr::Unsigned);
    pub const UINT2: Self = Self::known(2, NumericRepr::Unsigned);
    pub const UINT4: Self = Self::known(4, NumericRepr::Unsigned);
    pub const UINT8: Self = Self::known(8, NumericRepr::Unsigned);
    pub const INT8: Self = Self::known(8, NumericRepr::Signed);
    pub const UINT16: Self = Self::known(16, NumericRepr::Unsigned);
    pub const INT16: Self = Self::known(16, NumericRepr::Signed);
    pub const UINT32: Self = Self::known(32, NumericRepr::Unsigned);
    pub const INT32: Self = Self::known(32, NumericRepr::Signed);
    pub const FLOAT32: Self = Self::known(32, NumericRepr::Float);
    pub const FLOAT64: Self = Self::known(64, NumericRepr::Float);

    const ALL: [ElementType; 11] = [
        Self::UINT1,
        Self::UINT2,
        Self::UINT4,
        Self::UINT8,
        Self::INT8,
        Self::UINT16,
        Self::INT16,
        Self::UINT32,
        Self::INT32,
        Self::FLOAT32,
        Self::FLOAT64,
    ];

    const fn known(bits: u8, repr: NumericRepr) -> Self {
        Self { bits, repr }
    }

    /// Looks up a supported element type; anything else is a `RangeError`.
    pub fn new(bits: u32, repr: NumericRepr) -> SubstrateResult<Self> {
        Self::ALL
            .into_iter()
            .find(|element| u32::from(element.bits) == bits && element.repr == repr)
            .ok_or_else(|| {
                SubstrateError::range(format!("unsupported {repr:?} element width of {bits} bits"))
            })
    }

    pub fn unsigned(bits: u32) -> SubstrateResult<Self> {
        Self::new(bits, NumericRepr::Unsigned)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|element| element.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match (self.bits, self.repr) {
            (1, NumericRepr::Unsigned) => "Uint1Array",
            (2, NumericRepr::Unsigned) => "Uint2Array",
            (4, NumericRepr::Unsigned) => "Uint4Array",
            (8, NumericRepr::Unsigned) => "Uint8Array",
            (8, NumericRepr::Signed) => "Int8Array",
            (16, NumericRepr::Unsigned) => "Uint16Array",
            (16, NumericRepr::Signed) => "Int16Array",
            (32, NumericRepr::Unsigned) => "Uint32Array",
            (32, NumericRepr::Signed) => "Int32Array",
            (32, NumericRepr::Float) => "Float32Array",
            (64, NumericRepr::Float) => "Float64Array",
            _ => "TypedArray",
        }
    }

    pub fn bits(&self) -> u32 {
        u32::from(self.bits)
    }

    pub fn repr(&self) -> NumericRepr {
        self.repr
    }

    pub fn is_float(&self) -> bool {
        self.repr == NumericRepr::Float
    }

    /// Bytes touched by `length` elements, rounding a partial trailing byte up.
    pub fn byte_extent(&self, length: usize) -> SubstrateResult<usize> {
        length
            .checked_mul(self.bits as usize)
            .map(|bits| bits.div_ceil(8))
            .ok_or_else(|| {
                SubstrateError::range(format!("{length} elements of {} bits overflow", self.bits))
            })
    }

    /// Converts raw element bits to a number.
    pub fn decode(&self, raw: u64) -> f64 {
        let bits = self.bits();
        match self.repr {
            NumericRepr::Unsigned => (raw & mask(bits)) as f64,
            NumericRepr::Signed => {
                let shift = 64 - bits;
                (((raw << shift) as i64) >> shift) as f64
            }
            NumericRepr::Float if bits == 32 => f64::from(f32::from_bits(raw as u32)),
            NumericRepr::Float => f64::from_bits(raw),
        }
    }

    /// Converts a number to raw element bits. Integers truncate toward zero and wrap modulo
    /// 2^bits; NaN and infinities store 0.
    pub fn encode(&self, value: f64) -> u64 {
        match self.repr {
            NumericRepr::Float if self.bits == 32 => u64::from((value as f32).to_bits()),
            NumericRepr::Float => value.to_bits(),
            NumericRepr::Unsigned | NumericRepr::Signed => wrap_to_width(value, self.bits()),
        }
    }
}

impl ViewHeader {
    /// Byte extent of a header whose length was checked when the view was created.
    pub(crate) fn byte_len(&self) -> usize {
        (self.length * self.element.bits() as usize).div_ceil(8)
    }
}

pub(crate) fn mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

pub(crate) fn wrap_to_width(value: f64, bits: u32) -> u64 {
    if !value.is_finite() {
        return 0;
    }
    (value.trunc() as i64 as u64) & mask(bits)
}

/// Bytes aliased by a view, checked against the current buffer length.
pub(crate) fn view_region<'s>(state: &'s ArenaState, header: &ViewHeader) -> SubstrateResult<&'s [u8]> {
    let Payload::ArrayBuffer(backing) = state.payload(header.buffer) else {
        return Err(SubstrateError::type_mismatch("ArrayBuffer", "detached view"));
    };
    let end = header.byte_offset + header.byte_len();
    let len = backing.len();
    backing
        .bytes()
        .get(header.byte_offset..end)
        .ok_or_else(|| out_of_extent(end, len))
}

pub(crate) fn view_region_mut<'s>(
    state: &'s mut ArenaState,
    header: &ViewHeader,
) -> SubstrateResult<&'s mut [u8]> {
    let Some(Payload::ArrayBuffer(backing)) = state.payload_mut(header.buffer) else {
        return Err(SubstrateError::type_mismatch("ArrayBuffer", "detached view"));
    };
    let end = header.byte_offset + header.byte_len();
    let len = backing.len();
    backing
        .bytes_mut()
        .get_mut(header.byte_offset..end)
        .ok_or_else(|| out_of_extent(end, len))
}

fn out_of_extent(end: usize, len: usize) -> SubstrateError {
    SubstrateError::range(format!("view extends to byte {end} of a {len} byte buffer"))
}

/// Reads every element of a view as a number.
pub(crate) fn read_all(state: &ArenaState, header: &ViewHeader) -> SubstrateResult<Vec<f64>> {
    let region = view_region(state, header)?;
    let width = header.element.bits();
    let mut cursor = BitCursor::new(BitOrder::MsbFirst);
    let mut values = Vec::with_capacity(header.length);
    for _ in 0..header.length {
        let raw = cursor
            .read(region, width)
            .ok_or_else(|| out_of_extent(region.len(), region.len()))?;
        values.push(header.element.decode(raw));
    }
    Ok(values)
}

fn check_index(header: &ViewHeader, index: usize) -> SubstrateResult<()> {
    if index >= header.length {
        return Err(SubstrateError::range(format!(
            "index {index} out of range for {} of length {}",
            header.element.name(),
            header.length
        )));
    }
    Ok(())
}

pub(crate) fn read_element(state: &ArenaState, header: &ViewHeader, index: usize) -> SubstrateResult<f64> {
    check_index(header, index)?;
    let region = view_region(state, header)?;
    let width = header.element.bits();
    BitCursor::at(index * width as usize, BitOrder::MsbFirst)
        .read(region, width)
        .map(|raw| header.element.decode(raw))
        .ok_or_else(|| out_of_extent(region.len(), region.len()))
}

pub(crate) fn write_element(
    state: &mut ArenaState,
    header: &ViewHeader,
    index: usize,
    value: f64,
) -> SubstrateResult<()> {
    check_index(header, index)?;
    let region = view_region_mut(state, header)?;
    let width = header.element.bits();
    let raw = header.element.encode(value);
    if BitCursor::at(index * width as usize, BitOrder::MsbFirst).write(region, width, raw) {
        Ok(())
    } else {
        Err(out_of_extent(region.len(), region.len()))
    }
}

/// Every element of an array or view as a number.
pub(crate) fn load_numbers(state: &ArenaState, id: CellId) -> SubstrateResult<Vec<f64>> {
    match state.payload(id) {
        Payload::Array(items) => Ok(items.iter().map(|item| state.number_of(*item)).collect()),
        Payload::View(header) => read_all(state, header),
        other => Err(SubstrateError::type_mismatch(
            "array or typed view",
            crate::memory::CellKind::of(other).name(),
        )),
    }
}

/// Overwrites the leading elements of an array or view. Array slots receive fresh number cells,
/// view elements are encoded in place.
pub(crate) fn store_numbers(state: &mut ArenaState, id: CellId, values: &[f64]) -> SubstrateResult<()> {
    let (header, len) = match state.payload(id) {
        Payload::View(header) => (Some(*header), header.length),
        Payload::Array(items) => (None, items.len()),
        other => {
            return Err(SubstrateError::type_mismatch(
                "array or typed view",
                crate::memory::CellKind::of(other).name(),
            ));
        }
    };
    if len < values.len() {
        return Err(SubstrateError::range(format!(
            "destination holds {len} elements, {} needed",
            values.len()
        )));
    }
    match header {
        Some(header) => {
            for (index, value) in values.iter().enumerate() {
                write_element(state, &header, index, *value)?;
            }
            Ok(())
        }
        None => map::write_array(state, id, values),
    }
}

pub(crate) fn allocate_view(arena: &Arena, header: ViewHeader) -> SubstrateResult<Value> {
    let id = {
        let mut state = arena.lock();
        state.retain(header.buffer);
        state.alloc(Payload::View(header))?
    };
    Ok(Value::from_raw(arena.clone(), id))
}

/// Buffer cell and byte range of an ArrayBuffer or view.
fn backing_range(state: &ArenaState, id: CellId) -> SubstrateResult<(CellId, usize, usize)> {
    match state.payload(id) {
        Payload::ArrayBuffer(backing) => Ok((id, 0, backing.len())),
        Payload::View(header) => Ok((
            header.buffer,
            header.byte_offset,
            header.byte_len(),
        )),
        other => Err(SubstrateError::type_mismatch(
            "ArrayBuffer or typed view",
            crate::memory::CellKind::of(other).name(),
        )),
    }
}

/// Zero-copy re-tag of a buffer (or of the bytes under another view) as `element`.
///
/// Fails with `RangeError` when the element width does not evenly divide the byte length.
pub fn reinterpret(buffer: &Value, element: ElementType) -> SubstrateResult<Value> {
    let arena = buffer.arena();
    let (buffer_id, byte_offset, byte_len) = backing_range(&arena.lock(), buffer.id())?;
    let bits = byte_len * 8;
    let width = element.bits() as usize;
    if bits % width != 0 {
        return Err(SubstrateError::range(format!(
            "{} bit elements do not evenly divide {byte_len} bytes",
            element.bits()
        )));
    }
    allocate_view(
        arena,
        ViewHeader {
            buffer: buffer_id,
            element,
            byte_offset,
            length: bits / width,
        },
    )
}

/// Creates a view over part of a buffer. Without `length` the view runs to the end of the
/// buffer, which must then hold a whole number of elements.
pub fn view(
    buffer: &Value,
    element: ElementType,
    byte_offset: usize,
    length: Option<usize>,
) -> SubstrateResult<Value> {
    let arena = buffer.arena();
    let (buffer_id, base, byte_len) = backing_range(&arena.lock(), buffer.id())?;
    if byte_offset > byte_len {
        return Err(out_of_extent(byte_offset, byte_len));
    }
    let available_bits = (byte_len - byte_offset) * 8;
    let width = element.bits() as usize;
    let length = match length {
        Some(length) => length,
        None if available_bits % width == 0 => available_bits / width,
        None => {
            return Err(SubstrateError::range(format!(
                "{} bit elements do not evenly divide {} bytes",
                element.bits(),
                byte_len - byte_offset
            )));
        }
    };
    let end = element
        .byte_extent(length)?
        .checked_add(byte_offset)
        .ok_or_else(|| SubstrateError::range("view extent overflows"))?;
    if end > byte_len {
        return Err(out_of_extent(end, byte_len));
    }
    allocate_view(
        arena,
        ViewHeader {
            buffer: buffer_id,
            element,
            byte_offset: base + byte_offset,
            length,
        },
    )
}

/// Allocates a zero-filled buffer and a view of `length` elements over it.
pub fn typed_array(arena: &Arena, element: ElementType, length: usize) -> SubstrateResult<Value> {
    let buffer = arena.array_buffer(element.byte_extent(length)?)?;
    view(&buffer, element, 0, Some(length))
}

pub fn typed_array_from(arena: &Arena, element: ElementType, values: &[f64]) -> SubstrateResult<Value> {
    let mut bytes = vec![0u8; element.byte_extent(values.len())?];
    let mut cursor = BitCursor::new(BitOrder::MsbFirst);
    for value in values {
        cursor.write(&mut bytes, element.bits(), element.encode(*value));
    }
    let buffer = arena.array_buffer_from(bytes)?;
    view(&buffer, element, 0, Some(values.len()))
}

impl Value {
    pub(crate) fn view_header(&self) -> Option<ViewHeader> {
        match self.arena().lock().payload(self.id()) {
            Payload::View(header) => Some(*header),
            _ => None,
        }
    }

    /// Element type of a view cell.
    pub fn element_type(&self) -> Option<ElementType> {
        self.view_header().map(|header| header.element)
    }

    /// Byte length of an ArrayBuffer, or the byte extent of a view.
    pub fn byte_length(&self) -> Option<usize> {
        match self.arena().lock().payload(self.id()) {
            Payload::ArrayBuffer(backing) => Some(backing.len()),
            Payload::View(header) => Some(header.byte_len()),
            _ => None,
        }
    }

    /// The ArrayBuffer cell a view aliases.
    pub fn view_buffer(&self) -> Option<Value> {
        let header = self.view_header()?;
        Some(Value::retained(self.arena(), header.buffer))
    }

    /// Copy of the bytes behind an ArrayBuffer or view.
    pub fn bytes(&self) -> SubstrateResult<Vec<u8>> {
        let state = self.arena().lock();
        match state.payload(self.id()) {
            Payload::ArrayBuffer(backing) => Ok(backing.bytes().to_vec()),
            Payload::View(header) => Ok(view_region(&state, header)?.to_vec()),
            other => Err(SubstrateError::type_mismatch(
                "ArrayBuffer or typed view",
                crate::memory::CellKind::of(other).name(),
            )),
        }
    }

    /// Numeric element of an array or view.
    pub fn read_element(&self, index: usize) -> SubstrateResult<f64> {
        let state = self.arena().lock();
        match state.payload(self.id()) {
            Payload::View(header) => read_element(&state, header, index),
            Payload::Array(items) => items
                .get(index)
                .map(|id| state.number_of(*id))
                .ok_or_else(|| {
                    SubstrateError::range(format!(
                        "index {index} out of range for array of length {}",
                        items.len()
                    ))
                }),
            other => Err(SubstrateError::type_mismatch(
                "array or typed view",
                crate::memory::CellKind::of(other).name(),
            )),
        }
    }

    /// Stores a number into an array or view element, encoding it for the view's element type.
    pub fn write_element(&self, index: usize, value: f64) -> SubstrateResult<()> {
        if let Some(header) = self.view_header() {
            return write_element(&mut self.arena().lock(), &header, index, value);
        }
        match self.kind() {
            crate::memory::CellKind::Array => {
                let number = self.arena().number(value)?;
                self.set_element(index, number)
            }
            other => Err(SubstrateError::type_mismatch("array or typed view", other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;

    fn arena() -> Arena {
        Arena::new(ArenaConfig::MIN_CELLS * 4, 1024)
    }

    #[test]
    fn signed_elements_sign_extend() {
        assert_eq!(ElementType::INT8.decode(0xFF), -1.0);
        assert_eq!(ElementType::INT16.decode(0x8000), -32768.0);
        assert_eq!(ElementType::UINT8.decode(0xFF), 255.0);
    }

    #[test]
    fn integer_encoding_wraps() {
        assert_eq!(ElementType::UINT8.encode(256.0), 0);
        assert_eq!(ElementType::UINT8.encode(-1.0), 0xFF);
        assert_eq!(ElementType::INT8.encode(-2.7), 0xFE);
        assert_eq!(ElementType::UINT4.encode(f64::NAN), 0);
    }

    #[test]
    fn huge_lengths_are_range_errors() {
        let arena = arena();
        let buffer = arena.array_buffer(4).expect("buffer");
        let err = view(&buffer, ElementType::UINT32, 0, Some(usize::MAX / 4)).unwrap_err();
        assert!(matches!(err, SubstrateError::Range(_)));
        let err = typed_array(&arena, ElementType::FLOAT64, usize::MAX).unwrap_err();
        assert!(matches!(err, SubstrateError::Range(_)));
        assert_eq!(ElementType::UINT4.byte_extent(3).expect("extent"), 2);
    }

    #[test]
    fn float32_round_trips_through_bits() {
        let raw = ElementType::FLOAT32.encode(1.5);
        assert_eq!(ElementType::FLOAT32.decode(raw), 1.5);
    }

    #[test]
    fn reinterpret_rejects_uneven_widths() {
        let arena = arena();
        let buffer = arena.array_buffer(3).expect("buffer");
        let err = reinterpret(&buffer, ElementType::UINT16).unwrap_err();
        assert!(matches!(err, SubstrateError::Range(_)));
        let nibbles = reinterpret(&buffer, ElementType::UINT4).expect("nibbles");
        assert_eq!(nibbles.length(), Some(6));
    }

    #[test]
    fn views_share_storage() {
        let arena = arena();
        let bytes = typed_array_from(&arena, ElementType::UINT8, &[0x12 as f64, 0x34 as f64]).expect("bytes");
        let words = reinterpret(&bytes, ElementType::UINT16).expect("words");
        assert_eq!(words.read_element(0).expect("read"), f64::from(0x3412u16));
        words.write_element(0, 0xBEEF as f64).expect("write");
        assert_eq!(bytes.bytes().expect("bytes"), vec![0xEF, 0xBE]);
    }

    #[test]
    fn sub_byte_views_are_msb_first() {
        let arena = arena();
        let buffer = arena.array_buffer_from(vec![0b1010_0000]).expect("buffer");
        let bits = reinterpret(&buffer, ElementType::UINT1).expect("bits");
        assert_eq!(bits.read_element(0).expect("bit 0"), 1.0);
        assert_eq!(bits.read_element(1).expect("bit 1"), 0.0);
        assert_eq!(bits.read_element(2).expect("bit 2"), 1.0);
    }

    #[test]
    fn out_of_extent_access_is_rejected() {
        let arena = arena();
        let buffer = arena.array_buffer(4).expect("buffer");
        assert!(view(&buffer, ElementType::UINT32, 2, Some(1)).is_err());
        let words = view(&buffer, ElementType::UINT16, 2, None).expect("tail");
        assert_eq!(words.length(), Some(1));
        assert!(matches!(
            words.read_element(1).unwrap_err(),
            SubstrateError::Range(_)
        ));
    }

    #[test]
    fn view_keeps_its_buffer_alive() {
        let arena = arena();
        let bytes = typed_array(&arena, ElementType::UINT8, 4).expect("view");
        assert_eq!(arena.live_cells(), 2);
        let buffer = bytes.view_buffer().expect("buffer");
        drop(bytes);
        assert_eq!(arena.live_cells(), 1);
        drop(buffer);
        assert_eq!(arena.live_cells(), 0);
        assert_eq!(arena.stats().buffer_used, 0);
    }
}
