//! Immutable, bit-addressable byte buffer.
//!
//! Protocol payloads are assembled and taken apart with [`BitVector`]. The
//! vector keeps its exact length in bits, so a value built from three
//! nibbles is 12 bits long rather than being rounded up to two bytes.
//! Bits are numbered MSB-first: bit 0 is the most significant bit of the
//! first byte.
//!
//! Every operation returns a new value; a vector can be shared freely and
//! reused across retries.
//!
//! # Examples
//!
//! ```
//! use wristpay_core::BitVector;
//!
//! let header = BitVector::from_bytes(&[0x30]);
//! let page = BitVector::from_bytes(&[0x04]);
//! let frame = header.concat(&page);
//!
//! assert_eq!(frame.len(), 16);
//! assert_eq!(frame.to_bytes().unwrap(), vec![0x30, 0x04]);
//! ```

use std::fmt;
use std::ops::Add;

use crate::{Error, Result};

/// Ordered sequence of bits with an exact bit length.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitVector {
    /// Backing storage, MSB-first. Bits past `len` are always zero.
    bytes: Vec<u8>,

    /// Length in bits.
    len: usize,
}

impl BitVector {
    /// Create an empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a vector holding all bits of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            len: bytes.len() * 8,
        }
    }

    /// Create a vector of `len` zero bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Create a vector from individual bits.
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut bytes = Vec::new();
        let mut len = 0;
        for bit in bits {
            if len % 8 == 0 {
                bytes.push(0);
            }
            if bit {
                let last = bytes.len() - 1;
                bytes[last] |= 0x80 >> (len % 8);
            }
            len += 1;
        }
        Self { bytes, len }
    }

    /// Length in bits.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length in whole bytes, if the vector is byte aligned.
    pub fn byte_len(&self) -> Option<usize> {
        (self.len % 8 == 0).then_some(self.len / 8)
    }

    /// Get the bit at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BitIndexOutOfRange`] if `index >= len()`.
    pub fn get(&self, index: usize) -> Result<bool> {
        if index >= self.len {
            return Err(Error::BitIndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(self.bit(index))
    }

    /// Extract the 8 bits starting at `bit_offset` as a byte.
    ///
    /// The offset does not need to be byte aligned.
    pub fn byte_at(&self, bit_offset: usize) -> Result<u8> {
        let end = bit_offset.checked_add(8).ok_or(Error::BitIndexOutOfRange {
            index: bit_offset,
            len: self.len,
        })?;
        if end > self.len {
            return Err(Error::BitIndexOutOfRange {
                index: end - 1,
                len: self.len,
            });
        }
        if bit_offset % 8 == 0 {
            return Ok(self.bytes[bit_offset / 8]);
        }
        Ok((bit_offset..end).fold(0u8, |acc, i| (acc << 1) | u8::from(self.bit(i))))
    }

    /// Get the byte with index `index` (bit offset `index * 8`).
    pub fn byte(&self, index: usize) -> Result<u8> {
        self.byte_at(index.saturating_mul(8))
    }

    /// Copy `len` bits starting at `start` into a new vector.
    pub fn slice(&self, start: usize, len: usize) -> Result<BitVector> {
        let end = start.checked_add(len).ok_or(Error::BitIndexOutOfRange {
            index: start,
            len: self.len,
        })?;
        if end > self.len {
            return Err(Error::BitIndexOutOfRange {
                index: end.saturating_sub(1),
                len: self.len,
            });
        }
        if start % 8 == 0 && len % 8 == 0 {
            return Ok(Self::from_bytes(&self.bytes[start / 8..end / 8]));
        }
        Ok(Self::from_bits((start..end).map(|i| self.bit(i))))
    }

    /// Copy `len` bytes starting at byte `start` into a new vector.
    pub fn slice_bytes(&self, start: usize, len: usize) -> Result<BitVector> {
        self.slice(start.saturating_mul(8), len.saturating_mul(8))
    }

    /// Append `other` to this vector, returning the combined value.
    pub fn concat(&self, other: &BitVector) -> BitVector {
        if self.len % 8 == 0 {
            let mut bytes = self.bytes.clone();
            bytes.extend_from_slice(&other.bytes);
            return Self {
                bytes,
                len: self.len + other.len,
            };
        }
        Self::from_bits(self.iter().chain(other.iter()))
    }

    /// Convert to a byte array.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotByteAligned`] if the length is not a multiple of 8.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.len % 8 != 0 {
            return Err(Error::NotByteAligned { len: self.len });
        }
        Ok(self.bytes.clone())
    }

    /// Iterate over the bits, MSB-first.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.bit(i))
    }

    fn bit(&self, index: usize) -> bool {
        self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }
}

impl From<&[u8]> for BitVector {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for BitVector {
    fn from(bytes: Vec<u8>) -> Self {
        let len = bytes.len() * 8;
        Self { bytes, len }
    }
}

impl<const N: usize> From<[u8; N]> for BitVector {
    fn from(bytes: [u8; N]) -> Self {
        Self::from_bytes(&bytes)
    }
}

impl Add<&BitVector> for &BitVector {
    type Output = BitVector;

    fn add(self, rhs: &BitVector) -> BitVector {
        self.concat(rhs)
    }
}

impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitVector({} bits: {})", self.len, self)
    }
}

impl fmt::Display for BitVector {
    /// Hex for byte-aligned vectors, binary otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len % 8 == 0 {
            for byte in &self.bytes {
                write!(f, "{byte:02X}")?;
            }
        } else {
            for bit in self.iter() {
                write!(f, "{}", u8::from(bit))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_bytes_length() {
        let bv = BitVector::from_bytes(&[0xAB, 0xCD]);
        assert_eq!(bv.len(), 16);
        assert_eq!(bv.byte_len(), Some(2));
        assert!(!bv.is_empty());
    }

    #[test]
    fn test_get_msb_first() {
        let bv = BitVector::from_bytes(&[0b1000_0001]);
        assert!(bv.get(0).unwrap());
        assert!(!bv.get(1).unwrap());
        assert!(bv.get(7).unwrap());
        assert_eq!(
            bv.get(8),
            Err(Error::BitIndexOutOfRange { index: 8, len: 8 })
        );
    }

    #[test]
    fn test_exact_bit_length_is_kept() {
        let bv = BitVector::from_bits([true, false, true]);
        assert_eq!(bv.len(), 3);
        assert_eq!(bv.byte_len(), None);
        assert_eq!(bv.to_string(), "101");
        assert_eq!(bv.to_bytes(), Err(Error::NotByteAligned { len: 3 }));
    }

    #[test]
    fn test_unaligned_concat() {
        let nibble = BitVector::from_bits([true, true, true, true]);
        let joined = nibble.concat(&nibble);
        assert_eq!(joined.to_bytes().unwrap(), vec![0xFF]);

        let three = BitVector::from_bits([false, false, false, false]);
        let frame = three.concat(&BitVector::from_bytes(&[0xA5]));
        assert_eq!(frame.len(), 12);
        assert_eq!(frame.byte_at(4).unwrap(), 0xA5);
    }

    #[test]
    fn test_byte_at_unaligned_offset() {
        let bv = BitVector::from_bytes(&[0x0F, 0xF0]);
        assert_eq!(bv.byte_at(4).unwrap(), 0xFF);
        assert_eq!(bv.byte(1).unwrap(), 0xF0);
        assert!(bv.byte_at(9).is_err());
    }

    #[test]
    fn test_slice() {
        let bv = BitVector::from_bytes(&[0x01, 0x02, 0x03, 0x04]);
        let middle = bv.slice_bytes(1, 2).unwrap();
        assert_eq!(middle.to_bytes().unwrap(), vec![0x02, 0x03]);

        let bits = bv.slice(6, 4).unwrap();
        assert_eq!(bits.to_string(), "0100");

        assert!(bv.slice(30, 4).is_err());
    }

    #[test]
    fn test_add_operator() {
        let a = BitVector::from_bytes(&[0x60]);
        let b = BitVector::from_bytes(&[0x00]);
        assert_eq!((&a + &b).to_bytes().unwrap(), vec![0x60, 0x00]);
        // operands are untouched
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_zeros_and_display() {
        let bv = BitVector::zeros(16);
        assert_eq!(bv.to_string(), "0000");
        assert_eq!(format!("{:?}", bv), "BitVector(16 bits: 0000)");
    }

    proptest! {
        #[test]
        fn prop_slice_of_concat_recovers_parts(
            a in proptest::collection::vec(any::<u8>(), 0..32),
            b in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let left = BitVector::from_bytes(&a);
            let right = BitVector::from_bytes(&b);
            let joined = left.concat(&right);

            prop_assert_eq!(joined.len(), left.len() + right.len());
            prop_assert_eq!(joined.slice(0, left.len()).unwrap(), left);
            prop_assert_eq!(joined.slice(a.len() * 8, b.len() * 8).unwrap(), right);
        }

        #[test]
        fn prop_from_bits_matches_get(bits in proptest::collection::vec(any::<bool>(), 0..64)) {
            let bv = BitVector::from_bits(bits.clone());
            prop_assert_eq!(bv.len(), bits.len());
            for (i, bit) in bits.iter().enumerate() {
                prop_assert_eq!(bv.get(i).unwrap(), *bit);
            }
        }
    }
}
