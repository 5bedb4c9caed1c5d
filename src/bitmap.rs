use crate::error::DecodeError;

pub(crate) trait BitmapExt {
    fn is_bit_set(&self, bit_index: usize) -> bool;
}

impl BitmapExt for [u8] {
    /// Bit 0 of byte 0 is the first unit; bits within a byte count from the
    /// least significant end.
    #[inline]
    fn is_bit_set(&self, bit_index: usize) -> bool {
        let byte = self[bit_index / 8];
        let mask = 1u8 << (bit_index % 8);
        byte & mask != 0
    }
}

/// An allocation bitmap limited to its first `len` logical units.
///
/// Any bits past `len` are padding and never observed.
#[derive(Debug, Clone, Copy)]
pub struct Bitmap<'a> {
    bytes: &'a [u8],
    len: usize,
}

impl<'a> Bitmap<'a> {
    pub fn new(bytes: &'a [u8], len: usize) -> Result<Self, DecodeError> {
        if bytes.len() * 8 < len {
            return Err(DecodeError::InvalidGeometry(format!(
                "bitmap of {} bytes cannot describe {} units",
                bytes.len(),
                len
            )));
        }
        Ok(Bitmap { bytes, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` when unit `index` is allocated.
    pub fn is_used(&self, index: usize) -> bool {
        index < self.len && self.bytes.is_bit_set(index)
    }

    /// Allocation state of every unit, in bit order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bytes.is_bit_set(i))
    }

    pub fn used_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.bytes.is_bit_set(i))
    }

    pub fn count_used(&self) -> usize {
        self.iter().filter(|&used| used).count()
    }

    pub fn count_free(&self) -> usize {
        self.len - self.count_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_set_units() {
        let raw = [0b0001_0101u8];
        let bitmap = Bitmap::new(&raw, 8).unwrap();
        assert_eq!(bitmap.used_indices().collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(bitmap.count_used(), 3);
        assert_eq!(bitmap.count_free(), 5);
    }

    #[test]
    fn reads_bytes_left_to_right_and_bits_right_to_left() {
        // 0x40 0x3C reads as 00000010 00111100
        let raw = [0x40u8, 0x3C];
        let bitmap = Bitmap::new(&raw, 16).unwrap();
        let order: String = bitmap.iter().map(|b| if b { '1' } else { '0' }).collect();
        assert_eq!(order, "0000001000111100");
    }

    #[test]
    fn ignores_padding_bits() {
        let raw = [0xFFu8, 0b1111_1000];
        let bitmap = Bitmap::new(&raw, 11).unwrap();
        assert_eq!(bitmap.count_used(), 8);
        assert_eq!(bitmap.count_free(), 3);
        assert!(!bitmap.is_used(12));
    }

    #[test]
    fn rejects_undersized_buffer() {
        let raw = [0u8; 2];
        assert!(Bitmap::new(&raw, 17).is_err());
    }
}
