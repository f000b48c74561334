//! Bit-granular cursor over byte storage.
//!
//! Positions are absolute bit indices (`byte * 8 + bit`). Fields narrower than a byte, or fields
//! that start off a byte boundary, are walked one bit at a time in the cursor's [`BitOrder`].
//! Whole-byte fields on a byte boundary are little-endian, which is how every supported target
//! lays out typed array elements.

/// Order in which bits are consumed inside each byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Bit 7 of every byte comes first and the first bit read is the field's most significant.
    #[default]
    MsbFirst,
    /// Bit 0 of every byte comes first and the first bit read is the field's least significant.
    LsbFirst,
}

impl BitOrder {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "msb" | "msbfirst" | "msb_first" => Some(BitOrder::MsbFirst),
            "lsb" | "lsbfirst" | "lsb_first" => Some(BitOrder::LsbFirst),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitCursor {
    position: usize,
    order: BitOrder,
}

impl BitCursor {
    pub fn new(order: BitOrder) -> Self {
        Self::at(0, order)
    }

    pub fn at(position: usize, order: BitOrder) -> Self {
        Self { position, order }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn order(&self) -> BitOrder {
        self.order
    }

    /// Number of whole `width`-bit fields left in `bytes` from the current position.
    pub fn remaining_fields(&self, bytes: &[u8], width: u32) -> usize {
        let total = bytes.len() * 8;
        if width == 0 || self.position >= total {
            return 0;
        }
        (total - self.position) / width as usize
    }

    /// Reads the next `width`-bit field and advances. Returns `None` past the end of `bytes`.
    pub fn read(&mut self, bytes: &[u8], width: u32) -> Option<u64> {
        if !(1..=64).contains(&width) || self.remaining_fields(bytes, width) == 0 {
            return None;
        }
        let value = if self.is_byte_field(width) {
            let start = self.position / 8;
            let mut word = [0u8; 8];
            let len = width as usize / 8;
            word[..len].copy_from_slice(&bytes[start..start + len]);
            u64::from_le_bytes(word)
        } else {
            let mut value = 0u64;
            for k in 0..width {
                let bit = self.bit(bytes, self.position + k as usize);
                match self.order {
                    BitOrder::MsbFirst => value = (value << 1) | bit,
                    BitOrder::LsbFirst => value |= bit << k,
                }
            }
            value
        };
        self.position += width as usize;
        Some(value)
    }

    /// Writes the low `width` bits of `value` and advances. Leaves `bytes` untouched and returns
    /// `false` when the field does not fit.
    pub fn write(&mut self, bytes: &mut [u8], width: u32, value: u64) -> bool {
        if !(1..=64).contains(&width) || self.remaining_fields(bytes, width) == 0 {
            return false;
        }
        if self.is_byte_field(width) {
            let start = self.position / 8;
            let len = width as usize / 8;
            bytes[start..start + len].copy_from_slice(&value.to_le_bytes()[..len]);
        } else {
            for k in 0..width {
                let bit = match self.order {
                    BitOrder::MsbFirst => (value >> (width - 1 - k)) & 1,
                    BitOrder::LsbFirst => (value >> k) & 1,
                };
                self.set_bit(bytes, self.position + k as usize, bit != 0);
            }
        }
        self.position += width as usize;
        true
    }

    fn is_byte_field(&self, width: u32) -> bool {
        width % 8 == 0 && self.position % 8 == 0
    }

    fn shift(&self, offset: usize) -> usize {
        match self.order {
            BitOrder::MsbFirst => 7 - offset,
            BitOrder::LsbFirst => offset,
        }
    }

    fn bit(&self, bytes: &[u8], position: usize) -> u64 {
        u64::from((bytes[position / 8] >> self.shift(position % 8)) & 1)
    }

    fn set_bit(&self, bytes: &mut [u8], position: usize, on: bool) {
        let mask = 1u8 << self.shift(position % 8);
        if on {
            bytes[position / 8] |= mask;
        } else {
            bytes[position / 8] &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first_nibbles() {
        let bytes = [0xA5, 0x3C];
        let mut cursor = BitCursor::new(BitOrder::MsbFirst);
        let fields: Vec<u64> = std::iter::from_fn(|| cursor.read(&bytes, 4)).collect();
        assert_eq!(fields, vec![0xA, 0x5, 0x3, 0xC]);
    }

    #[test]
    fn lsb_first_nibbles() {
        let bytes = [0xA5, 0x3C];
        let mut cursor = BitCursor::new(BitOrder::LsbFirst);
        let fields: Vec<u64> = std::iter::from_fn(|| cursor.read(&bytes, 4)).collect();
        assert_eq!(fields, vec![0x5, 0xA, 0xC, 0x3]);
    }

    #[test]
    fn single_bits_follow_order() {
        let bytes = [0b1000_0001];
        let mut msb = BitCursor::new(BitOrder::MsbFirst);
        let mut lsb = BitCursor::new(BitOrder::LsbFirst);
        assert_eq!(msb.read(&bytes, 1), Some(1));
        assert_eq!(msb.read(&bytes, 1), Some(0));
        assert_eq!(lsb.read(&bytes, 1), Some(1));
        assert_eq!(lsb.read(&bytes, 1), Some(0));
    }

    #[test]
    fn fields_cross_byte_boundaries() {
        let mut bytes = [0u8; 2];
        let mut writer = BitCursor::at(6, BitOrder::MsbFirst);
        assert!(writer.write(&mut bytes, 4, 0b1011));
        assert_eq!(bytes, [0b0000_0010, 0b1100_0000]);
        let mut reader = BitCursor::at(6, BitOrder::MsbFirst);
        assert_eq!(reader.read(&bytes, 4), Some(0b1011));
    }

    #[test]
    fn aligned_words_are_little_endian() {
        let mut bytes = [0u8; 4];
        let mut writer = BitCursor::new(BitOrder::MsbFirst);
        assert!(writer.write(&mut bytes, 16, 0x1234));
        assert!(writer.write(&mut bytes, 16, 0xABCD));
        assert_eq!(bytes, [0x34, 0x12, 0xCD, 0xAB]);
    }

    #[test]
    fn writes_past_the_end_are_refused() {
        let mut bytes = [0u8; 1];
        let mut cursor = BitCursor::at(6, BitOrder::LsbFirst);
        assert!(!cursor.write(&mut bytes, 4, 0xF));
        assert_eq!(bytes, [0]);
        assert_eq!(cursor.position(), 6);
    }
}
