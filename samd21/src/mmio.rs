use core::marker::PhantomData;
use core::ptr;

/// Memory mapped peripheral register of width `T`
#[derive(Copy, Clone)]
pub struct Reg<T> {
    address: usize,
    _width: PhantomData<T>,
}

impl<T: Copy> Reg<T> {
    /// # Safety
    /// `address` must be a register of width `T` on this device.
    pub const unsafe fn at(address: usize) -> Self {
        Reg {
            address,
            _width: PhantomData,
        }
    }

    pub fn read(&self) -> T {
        // SAFETY: `at` guarantees a valid register address
        unsafe { ptr::read_volatile(self.address as *const T) }
    }

    pub fn write(&self, value: T) {
        // SAFETY: `at` guarantees a valid register address
        unsafe { ptr::write_volatile(self.address as *mut T, value) }
    }

    pub fn modify(&self, f: impl FnOnce(T) -> T) {
        self.write(f(self.read()));
    }
}

/// Register at `offset` from a peripheral `base`
pub const fn reg<T: Copy>(base: usize, offset: usize) -> Reg<T> {
    // SAFETY: all bases and offsets in this crate come from the datasheet
    unsafe { Reg::at(base + offset) }
}
