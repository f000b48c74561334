//! ArrayBuffers over memory the arena does not own.

use std::marker::PhantomData;

use tracing::debug;

use crate::memory::{Arena, Backing, Payload, Value};
use crate::{SubstrateError, SubstrateResult};

/// Wraps `len` bytes at `address` in an ArrayBuffer cell.
///
/// The arena never frees, zeroes or resizes the region; releasing the cell only returns the
/// slot. Views over it are bounds checked against `len` like any other buffer.
///
/// # Safety
/// `address..address + len` must stay valid for reads and writes for as long as any cell
/// derived from the returned value is alive, and nothing else may hold a Rust reference to it
/// while scripts access it. Peripheral registers and firmware-owned RAM qualify; stack memory
/// usually does not.
pub unsafe fn memory_area(arena: &Arena, address: usize, len: usize) -> SubstrateResult<Value> {
    if address == 0 && len > 0 {
        return Err(SubstrateError::range("memory area at null address"));
    }
    address
        .checked_add(len)
        .ok_or_else(|| SubstrateError::range("memory area wraps the address space"))?;
    debug!(address = format_args!("{address:#x}"), len, "wrapping external memory");
    arena.allocate_payload(Payload::ArrayBuffer(Backing::External { address, len }))
}

/// ArrayBuffer cell lending out a Rust slice for a bounded scope.
///
/// When the borrow ends the cell is detached: it stays allocated but reports a length of zero,
/// so views and native calls made through surviving clones fail instead of touching freed memory.
pub struct BorrowedBuffer<'a> {
    value: Value,
    attached: bool,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> BorrowedBuffer<'a> {
    /// Runs `body` with `bytes` exposed as an ArrayBuffer and detaches it afterwards.
    pub fn scope<R>(
        arena: &Arena,
        bytes: &'a mut [u8],
        body: impl FnOnce(&BorrowedBuffer<'a>) -> R,
    ) -> SubstrateResult<R> {
        // SAFETY: the buffer is dropped, and therefore detached, before `scope` returns.
        let borrowed = unsafe { Self::new(arena, bytes)? };
        Ok(body(&borrowed))
    }

    /// Exposes `bytes` as an ArrayBuffer cell until this handle is dropped.
    ///
    /// # Safety
    /// The handle must be dropped before `'a` ends. Leaking it (for example with
    /// [`std::mem::forget`]) leaves the cell pointing at memory the borrow checker considers free.
    pub unsafe fn new(arena: &Arena, bytes: &'a mut [u8]) -> SubstrateResult<Self> {
        let address = bytes.as_mut_ptr() as usize;
        let len = bytes.len();
        let value =
            arena.allocate_payload(Payload::ArrayBuffer(Backing::External { address, len }))?;
        Ok(Self {
            value,
            attached: true,
            _borrow: PhantomData,
        })
    }

    /// The ArrayBuffer cell. Clones outlive the borrow only as detached buffers.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Ends the borrow without detaching, turning the cell into a plain external buffer.
    ///
    /// # Safety
    /// Same contract as [`memory_area`]: the underlying memory must outlive every cell derived
    /// from the returned value.
    pub unsafe fn into_static(mut self) -> Value {
        self.attached = false;
        self.value.clone()
    }
}

impl Drop for BorrowedBuffer<'_> {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        let mut state = self.value.arena().lock();
        if let Some(Payload::ArrayBuffer(backing)) = state.payload_mut(self.value.id()) {
            *backing = Backing::Detached;
        }
        drop(state);
        debug!("detached borrowed buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::view::{ElementType, reinterpret};

    #[test]
    fn scoped_buffer_aliases_the_slice() {
        let arena = Arena::new(ArenaConfig::MIN_CELLS, 0);
        let mut storage = [0u8; 4];
        let survivor = BorrowedBuffer::scope(&arena, &mut storage, |buffer| {
            let words = reinterpret(buffer.value(), ElementType::UINT16).expect("view");
            words.write_element(1, 0x0102 as f64).expect("write");
            words
        })
        .expect("scope");
        assert_eq!(storage, [0, 0, 0x02, 0x01]);
        assert!(matches!(
            survivor.read_element(0).unwrap_err(),
            SubstrateError::Range(_)
        ));
    }

    #[test]
    fn external_buffers_do_not_use_the_byte_budget() {
        let arena = Arena::new(ArenaConfig::MIN_CELLS, 0);
        let mut storage = vec![7u8; 32];
        let area = unsafe { memory_area(&arena, storage.as_mut_ptr() as usize, storage.len()) }
            .expect("area");
        assert_eq!(area.byte_length(), Some(32));
        assert_eq!(arena.stats().buffer_used, 0);
        drop(area);
        assert_eq!(storage[31], 7);
    }

    #[test]
    fn null_address_is_rejected() {
        let arena = Arena::new(ArenaConfig::MIN_CELLS, 0);
        assert!(unsafe { memory_area(&arena, 0, 4) }.is_err());
    }
}
