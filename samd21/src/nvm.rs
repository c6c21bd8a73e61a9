//! NVMCTRL flash controller
//!
//! Manual page writes: the page buffer is cleared, filled through the flash
//! address space with 16-bit writes, and committed with an explicit write-page
//! command. Every command is polled to completion with `nb`.

use cardboot::{Geometry, Nvm};

use crate::mmio::{reg, Reg};

const NVMCTRL: usize = 0x4100_4000;

const CTRLA: Reg<u16> = reg(NVMCTRL, 0x00);
const CTRLB: Reg<u32> = reg(NVMCTRL, 0x04);
const PARAM: Reg<u32> = reg(NVMCTRL, 0x08);
const INTFLAG: Reg<u8> = reg(NVMCTRL, 0x14);
const STATUS: Reg<u16> = reg(NVMCTRL, 0x18);
const ADDR: Reg<u32> = reg(NVMCTRL, 0x1C);

const CMDEX: u16 = 0xA5 << 8;
const CMD_ER: u16 = 0x02;
const CMD_WP: u16 = 0x04;
const CMD_PBC: u16 = 0x44;

const CTRLB_MANW: u32 = 1 << 7;
const INTFLAG_READY: u8 = 1 << 0;
const STATUS_PROGE: u16 = 1 << 2;
const STATUS_LOCKE: u16 = 1 << 3;
const STATUS_NVME: u16 = 1 << 4;
const STATUS_ERRORS: u16 = STATUS_PROGE | STATUS_LOCKE | STATUS_NVME;

/// A row is always four pages on this family
const PAGES_PER_ROW: u32 = 4;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NvmError {
    /// Invalid command or bad keyword
    Programming,
    /// Target region is locked
    Locked,
    /// The controller reported a failed erase or write
    Nvm,
    /// Address or length does not fit the flash organisation
    Misaligned(u32),
}

pub struct Nvmctrl {
    page_size: u32,
    /// CTRLB as found at boot
    ctrlb: u32,
}

impl Nvmctrl {
    pub fn new() -> Self {
        let ctrlb = CTRLB.read();
        CTRLB.write(ctrlb | CTRLB_MANW);
        Nvmctrl {
            page_size: Self::param().page_size,
            ctrlb,
        }
    }

    /// Put CTRLB back the way the application expects it, automatic page writes
    /// included.
    pub fn release(self) {
        nb::block!(self.ready()).ok();
        CTRLB.write(self.ctrlb);
    }

    fn param() -> Geometry {
        let param = PARAM.read();
        Geometry {
            page_size: 8 << ((param >> 16) & 0b111),
            pages: param & 0xFFFF,
            pages_per_row: PAGES_PER_ROW,
        }
    }

    fn ready(&self) -> nb::Result<(), NvmError> {
        if INTFLAG.read() & INTFLAG_READY == 0 {
            return Err(nb::Error::WouldBlock);
        }
        Ok(())
    }

    fn command(&mut self, cmd: u16) -> Result<(), NvmError> {
        nb::block!(self.ready())?;
        CTRLA.write(CMDEX | cmd);
        nb::block!(self.ready())?;
        self.status()
    }

    /// Decode and clear the error bits of the last command.
    fn status(&mut self) -> Result<(), NvmError> {
        let status = STATUS.read();
        STATUS.write(STATUS_ERRORS);
        if status & STATUS_LOCKE != 0 {
            Err(NvmError::Locked)
        } else if status & STATUS_PROGE != 0 {
            Err(NvmError::Programming)
        } else if status & STATUS_NVME != 0 {
            Err(NvmError::Nvm)
        } else {
            Ok(())
        }
    }

    fn set_address(address: u32) {
        // ADDR takes 16-bit word addresses
        ADDR.write(address / 2);
    }
}

impl Nvm for Nvmctrl {
    type Error = NvmError;

    fn geometry(&mut self) -> Result<Geometry, Self::Error> {
        Ok(Self::param())
    }

    fn erase_row(&mut self, address: u32) -> Result<(), Self::Error> {
        if address % (self.page_size * PAGES_PER_ROW) != 0 {
            return Err(NvmError::Misaligned(address));
        }
        nb::block!(self.ready())?;
        STATUS.write(STATUS_ERRORS);
        Self::set_address(address);
        self.command(CMD_ER)
    }

    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        if address % self.page_size != 0 || data.len() != self.page_size as usize {
            return Err(NvmError::Misaligned(address));
        }
        self.command(CMD_PBC)?;

        // the page buffer only accepts 16 and 32-bit writes
        let page = address as *mut u16;
        for (i, half) in data.chunks_exact(2).enumerate() {
            // SAFETY: `address` is a page aligned flash address and the page holds
            // `data.len() / 2` half-words
            unsafe { page.add(i).write_volatile(u16::from_le_bytes([half[0], half[1]])) };
        }

        Self::set_address(address);
        self.command(CMD_WP)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let geometry = Self::param();
        let size = geometry.pages * geometry.page_size;
        if address.checked_add(buf.len() as u32).map_or(true, |end| end > size) {
            return Err(NvmError::Misaligned(address));
        }
        nb::block!(self.ready())?;
        // SAFETY: the range lies inside the memory mapped flash array checked above
        unsafe {
            core::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}
