use std::ops::{BitAnd, BitOr, Not};

/// Fixed-size set over `0..size`, used for state and choice sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BitVector {
    bits: Vec<bool>,
}

impl BitVector {
    pub fn new(size: usize, value: bool) -> BitVector {
        BitVector { bits: vec![value; size] }
    }

    pub fn from_indices<I: IntoIterator<Item = usize>>(size: usize, indices: I) -> BitVector {
        let mut bv = BitVector::new(size, false);
        for i in indices {
            bv.set(i, true);
        }
        bv
    }

    pub fn size(&self) -> usize {
        self.bits.len()
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits[index]
    }

    pub fn set(&mut self, index: usize, value: bool) {
        self.bits[index] = value;
    }

    pub fn number_of_set_bits(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// True if no bit is set.
    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    pub fn is_full(&self) -> bool {
        self.bits.iter().all(|b| *b)
    }

    /// Indices of the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().filter(|(_, b)| **b).map(|(i, _)| i)
    }

    /// Maps every set index to its position among the set indices. Unset
    /// positions hold `None`.
    pub fn compressed_indices(&self) -> Vec<Option<usize>> {
        let mut counter = 0;
        self.bits
            .iter()
            .map(|b| {
                if *b {
                    counter += 1;
                    Some(counter - 1)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn and_not(&self, other: &BitVector) -> BitVector {
        self & &!other
    }
}

impl Not for &BitVector {
    type Output = BitVector;

    fn not(self) -> BitVector {
        BitVector { bits: self.bits.iter().map(|b| !*b).collect() }
    }
}

impl Not for BitVector {
    type Output = BitVector;

    fn not(self) -> BitVector {
        !&self
    }
}

impl BitAnd for &BitVector {
    type Output = BitVector;

    fn bitand(self, rhs: &BitVector) -> BitVector {
        assert_eq!(self.size(), rhs.size(), "bit vectors of different size");
        BitVector { bits: self.bits.iter().zip(rhs.bits.iter()).map(|(a, b)| *a && *b).collect() }
    }
}

impl BitOr for &BitVector {
    type Output = BitVector;

    fn bitor(self, rhs: &BitVector) -> BitVector {
        assert_eq!(self.size(), rhs.size(), "bit vectors of different size");
        BitVector { bits: self.bits.iter().zip(rhs.bits.iter()).map(|(a, b)| *a || *b).collect() }
    }
}
