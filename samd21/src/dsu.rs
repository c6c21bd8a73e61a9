//! CRC32 through the Device Service Unit
//!
//! The DSU computes the IEEE 802.3 CRC over a word-aligned memory range and
//! leaves the raw register in DATA. Its result is bit-compatible with
//! [`cardboot::crc::SoftwareCrc`].

use cardboot::Crc32;

use crate::mmio::{reg, Reg};

const DSU: usize = 0x4100_2000;
const PAC1: usize = 0x4100_0000;

const CTRL: Reg<u8> = reg(DSU, 0x00);
const STATUSA: Reg<u8> = reg(DSU, 0x01);
const ADDR: Reg<u32> = reg(DSU, 0x04);
const LENGTH: Reg<u32> = reg(DSU, 0x08);
const DATA: Reg<u32> = reg(DSU, 0x0C);
const PAC1_WPCLR: Reg<u32> = reg(PAC1, 0x00);
const PAC1_WPSET: Reg<u32> = reg(PAC1, 0x04);

const CTRL_CRC: u8 = 1 << 2;
const STATUSA_DONE: u8 = 1 << 0;
const STATUSA_BERR: u8 = 1 << 2;
const PAC1_DSU: u32 = 1 << 1;

// Silicon erratum: the DSU cannot read RAM while these bits of the undocumented
// register are set. Cleared for every calculation, bit 17 restored afterwards.
const ERRATUM: Reg<u32> = reg(0x4100_7000, 0x58);
const ERRATUM_CLEAR: u32 = 0x3 << 16;
const ERRATUM_RESTORE: u32 = 0x2 << 16;

/// Largest buffer one call can checksum
const SCRATCH_LEN: usize = 256;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DsuError {
    /// Length is not a whole number of words or exceeds the scratch buffer
    Length(usize),
    /// The DSU bus master hit a bus error
    BusError,
}

#[repr(C, align(4))]
struct Scratch([u8; SCRATCH_LEN]);

pub struct Dsu {
    scratch: Scratch,
}

impl Dsu {
    pub fn new() -> Self {
        PAC1_WPCLR.write(PAC1_DSU);
        Dsu {
            scratch: Scratch([0; SCRATCH_LEN]),
        }
    }

    /// Write-protect the DSU again, as it is out of reset.
    pub fn release(self) {
        PAC1_WPSET.write(PAC1_DSU);
    }
}

impl Crc32 for Dsu {
    type Error = DsuError;

    fn checksum(&mut self, seed: u32, data: &[u8]) -> Result<u32, Self::Error> {
        if data.len() % 4 != 0 || data.len() > SCRATCH_LEN {
            return Err(DsuError::Length(data.len()));
        }
        let scratch = &mut self.scratch.0[..data.len()];
        scratch.copy_from_slice(data);

        STATUSA.write(STATUSA_DONE | STATUSA_BERR);
        ADDR.write(scratch.as_ptr() as u32);
        // LENGTH counts words from bit 2 up, i.e. the byte count
        LENGTH.write(data.len() as u32);
        DATA.write(seed);
        CTRL.write(CTRL_CRC);
        while STATUSA.read() & STATUSA_DONE == 0 {}

        if STATUSA.read() & STATUSA_BERR != 0 {
            return Err(DsuError::BusError);
        }
        Ok(DATA.read())
    }

    fn prepare(&mut self) {
        ERRATUM.modify(|v| v & !ERRATUM_CLEAR);
    }

    fn finish(&mut self) {
        ERRATUM.modify(|v| v | ERRATUM_RESTORE);
    }
}
