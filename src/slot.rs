//! Fixed-capacity slot allocator backing each descriptor table.

use crate::error::{Error, Result, SlotIndex};

/// Bitset allocator over `[0, capacity)`. Allocation is first-fit, so freed
/// low indices are reused before the high watermark grows.
pub struct SlotTable {
    name: &'static str,
    bits: Vec<u64>,
    capacity: u32,
    num_in_use: u32,
}

impl SlotTable {
    pub fn new(name: &'static str, capacity: u32) -> Self {
        let words = (capacity as usize + 63) / 64;
        SlotTable {
            name,
            bits: vec![0; words],
            capacity,
            num_in_use: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn num_in_use(&self) -> u32 {
        self.num_in_use
    }

    /// Lowest free index, or `CapacityExhausted`.
    pub fn allocate(&mut self) -> Result<SlotIndex> {
        for (word_index, word) in self.bits.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = (!*word).trailing_zeros();
                let index = word_index as u32 * 64 + bit;
                if index >= self.capacity {
                    break;
                }
                *word |= 1 << bit;
                self.num_in_use += 1;
                return Ok(index);
            }
        }
        Err(Error::CapacityExhausted {
            table: self.name,
            capacity: self.capacity,
        })
    }

    pub fn release(&mut self, index: SlotIndex) -> Result<()> {
        if index >= self.capacity {
            return Err(Error::OutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        let (word, bit) = (index as usize / 64, index % 64);
        if self.bits[word] & (1 << bit) == 0 {
            return Err(Error::DoubleRelease { index });
        }
        self.bits[word] &= !(1 << bit);
        self.num_in_use -= 1;
        Ok(())
    }

    pub fn is_in_use(&self, index: SlotIndex) -> bool {
        if index >= self.capacity {
            return false;
        }
        self.bits[index as usize / 64] & (1 << (index % 64)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_index() {
        let mut table = SlotTable::new("test", 8);
        assert_eq!(table.allocate(), Ok(0));
        assert_eq!(table.allocate(), Ok(1));
        assert_eq!(table.allocate(), Ok(2));
        table.release(1).unwrap();
        assert_eq!(table.allocate(), Ok(1));
        assert_eq!(table.num_in_use(), 3);
    }

    #[test]
    fn indices_are_exclusive_until_released() {
        let mut table = SlotTable::new("test", 200);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(table.allocate().unwrap()));
        }
        assert_eq!(
            table.allocate(),
            Err(Error::CapacityExhausted {
                table: "test",
                capacity: 200
            })
        );
    }

    #[test]
    fn release_errors() {
        let mut table = SlotTable::new("test", 4);
        let i = table.allocate().unwrap();
        assert_eq!(
            table.release(9),
            Err(Error::OutOfRange {
                index: 9,
                capacity: 4
            })
        );
        table.release(i).unwrap();
        assert_eq!(table.release(i), Err(Error::DoubleRelease { index: i }));
        assert!(!table.is_in_use(i));
    }

    #[test]
    fn crosses_word_boundaries() {
        let mut table = SlotTable::new("test", 130);
        for expected in 0..130 {
            assert_eq!(table.allocate(), Ok(expected));
        }
        table.release(127).unwrap();
        table.release(64).unwrap();
        assert_eq!(table.allocate(), Ok(64));
        assert_eq!(table.allocate(), Ok(127));
    }
}
