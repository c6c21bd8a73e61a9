//! Transfer of control to the application
//!
//! The application region starts with the application's vector table: the
//! initial main stack pointer followed by the reset vector. Handing off means
//! pointing VTOR at that table, loading the stack pointer from it and branching
//! to the reset vector. Nothing of the bootloader survives the jump.

use embedded_hal::delay::DelayNs;

use crate::{bootloader::Report, Nvm};

/// Time for the last diagnostic line to leave the UART before the jump
pub const HANDOFF_SETTLE_MS: u32 = 100;

/// Time for a diagnostic line to leave the UART before a system reset
pub const RESET_SETTLE_MS: u32 = 5_000;

/// Valid bits of the Cortex-M0+ VTOR (TBLOFF, 128 byte aligned)
pub const VTOR_TBLOFF_MASK: u32 = 0xFFFF_FF80;

/// VTOR value for a vector table at `base`
pub const fn vtor_offset(base: u32) -> u32 {
    base & VTOR_TBLOFF_MASK
}

/// First two entries of a Cortex-M vector table
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct VectorTable {
    pub initial_sp: u32,
    pub reset_vector: u32,
}

impl VectorTable {
    /// Read the vector table at `base` through the flash controller.
    pub fn read<N: Nvm>(nvm: &mut N, base: u32) -> Result<Self, N::Error> {
        let mut raw = [0; 8];
        nvm.read(base, &mut raw)?;
        Ok(VectorTable::from_bytes(raw))
    }

    pub fn from_bytes(raw: [u8; 8]) -> Self {
        VectorTable {
            initial_sp: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            reset_vector: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    /// Both words still hold the erased pattern, i.e. no application was ever written
    pub fn is_erased(&self) -> bool {
        self.initial_sp == u32::MAX && self.reset_vector == u32::MAX
    }
}

/// Permission to start the application at [`base`](Application::base)
///
/// Only [`Bootloader::run`](crate::Bootloader::run) creates this, and only when
/// there was no update to apply or the update was verified.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Application {
    base: u32,
    report: Option<Report>,
}

impl Application {
    pub(crate) fn new(base: u32, report: Option<Report>) -> Self {
        Application { base, report }
    }

    /// Address of the application's vector table
    pub fn base(&self) -> u32 {
        self.base
    }

    /// What the update did, `None` if no update was requested
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn vector_table_offset(&self) -> u32 {
        vtor_offset(self.base)
    }

    /// Wait for outstanding diagnostics to drain before peripherals are torn down.
    pub fn settle<D: DelayNs>(&self, delay: &mut D) {
        delay.delay_ms(HANDOFF_SETTLE_MS);
    }

    /// Jump to the application. Never returns.
    ///
    /// Disables and clears all NVIC interrupts, points VTOR at the application's
    /// vector table, loads the main stack pointer from its first word and branches
    /// to the reset vector in its second word.
    ///
    /// # Safety
    /// Every peripheral the bootloader set up must be de-initialised, and the
    /// application region must hold a valid vector table.
    #[cfg(feature = "cortex-m")]
    pub unsafe fn jump(self) -> ! {
        use cortex_m::peripheral::{NVIC, SCB};

        let table = self.base as *const u32;
        let initial_sp = table.read_volatile();
        let reset_vector = table.add(1).read_volatile();

        cortex_m::interrupt::disable();
        let nvic = &*NVIC::PTR;
        nvic.icer[0].write(0xFFFF_FFFF);
        nvic.icpr[0].write(0xFFFF_FFFF);

        let scb = &*SCB::PTR;
        scb.vtor.write(self.vector_table_offset());
        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        cortex_m::asm::bootstrap(initial_sp as *const u32, reset_vector as *const u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimFlash;
    use crate::{Geometry, Nvm};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    #[test]
    fn vtor_keeps_table_alignment_bits_only() {
        assert_eq!(vtor_offset(0x12000), 0x12000);
        assert_eq!(vtor_offset(0x1207F), 0x12000);
        assert_eq!(vtor_offset(0x12080), 0x12080);
        assert_eq!(Application::new(0x12004, None).vector_table_offset(), 0x12000);
    }

    #[test]
    fn reads_little_endian_vector_table() {
        let geometry = Geometry {
            page_size: 64,
            pages: 16,
            pages_per_row: 4,
        };
        let mut flash = SimFlash::new(geometry);
        let mut page = [0xFF; 64];
        page[..8].copy_from_slice(&[0x00, 0x80, 0x00, 0x20, 0x91, 0x02, 0x01, 0x00]);
        flash.write_page(0x100, &page).unwrap();

        let table = VectorTable::read(&mut flash, 0x100).unwrap();
        assert_eq!(
            table,
            VectorTable {
                initial_sp: 0x2000_8000,
                reset_vector: 0x0001_0291,
            }
        );
        assert!(!table.is_erased());
        assert!(VectorTable::read(&mut flash, 0x200).unwrap().is_erased());
    }

    #[test]
    fn settle_waits_before_handoff() {
        let app = Application::new(0x12000, None);
        app.settle(&mut NoopDelay::new());
        assert_eq!(app.report(), None);
    }
}
