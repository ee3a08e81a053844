//! The bounded data store `S` the interpreter runs against (spec §4.6).
//!
//! Only ever holds user-addressable object slots (declared variables, array
//! elements, parameter slots, and the temporary evaluation stack above
//! them). Activation-record bookkeeping — static link, dynamic link, saved
//! return address — lives in the machine's own call stack instead of being
//! laid out inline here; see `machine::Frame` for why.

/// A fixed-size, address-checked block of `i32` cells.
pub trait Storage {
    fn length(&self) -> usize;

    fn check_range(&self, address: usize, length: usize) -> bool {
        address.checked_add(length).map_or(false, |end| end <= self.length())
    }

    fn read(&self, address: usize) -> Result<i32, ()>;
}

pub trait StorageMut: Storage {
    fn write(&mut self, address: usize, value: i32) -> Result<(), ()>;
}

/// A contiguous block of `i32` cells, sized once at construction.
pub struct Store {
    cells: Vec<i32>,
}

impl Store {
    pub fn new(length: usize) -> Store {
        Store { cells: vec![0; length] }
    }
}

impl Storage for Store {
    fn length(&self) -> usize {
        self.cells.len()
    }

    fn read(&self, address: usize) -> Result<i32, ()> {
        if self.check_range(address, 1) {
            Ok(self.cells[address])
        } else {
            Err(())
        }
    }
}

impl StorageMut for Store {
    fn write(&mut self, address: usize, value: i32) -> Result<(), ()> {
        if self.check_range(address, 1) {
            self.cells[address] = value;
            Ok(())
        } else {
            Err(())
        }
    }
}

impl Store {
    /// Copies cells `0..len` out, for handing a spawned node's fresh store
    /// a snapshot of everything live in the spawning node's store at that
    /// moment (spec §9 "each node's static chain lives entirely inside its
    /// own data stack" — the chain's *addresses* are self-contained once
    /// copied into the child's frame stack, but need the matching data
    /// alongside them, or they'd just address zeroes).
    pub(crate) fn snapshot(&self, len: usize) -> Vec<i32> {
        self.cells[..len.min(self.cells.len())].to_vec()
    }

    /// Writes `values` into cells `0..values.len()` of a freshly
    /// constructed store.
    pub(crate) fn restore(&mut self, values: &[i32]) {
        self.cells[..values.len()].copy_from_slice(values);
    }
}
