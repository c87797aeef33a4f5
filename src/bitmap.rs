//! One-block allocation bitmap, one bit per block or inode slot.
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8`, matching the on-disk
//! ext2 bitmap encoding — the buffer is written to the image verbatim.

use crate::layout::BLOCK_SIZE;

pub struct Bitmap {
    bits: Vec<u8>,
}

impl Bitmap {
    pub fn new() -> Self {
        Bitmap {
            bits: vec![0u8; BLOCK_SIZE],
        }
    }

    pub fn set(&mut self, index: usize) {
        self.bits[index / 8] |= 1 << (index % 8);
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Lowest clear bit below `limit`, scanning from bit 0 upward.
    pub fn first_clear(&self, limit: usize) -> Option<usize> {
        (0..limit).find(|&i| !self.is_set(i))
    }

    /// Raw block-sized buffer, as written to the image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
