//! Software stand-in for the checksum accelerator

use core::convert::Infallible;

use crc::{Crc, CRC_32_JAMCRC};

use crate::Crc32;

/// Register value a fresh checksum starts from
pub const INITIAL: u32 = 0xFFFF_FFFF;

/// Seed of the first row when checksums are chained across the image
pub const CHAIN_START: u32 = 0;

// The accelerator computes the IEEE 802.3 CRC-32 but hands out the raw register,
// without the final inversion.
const ACCELERATOR: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

/// CRC-32 computed on the CPU, bit-compatible with the accelerator
#[derive(Copy, Clone, Default, Debug)]
pub struct SoftwareCrc;

impl Crc32 for SoftwareCrc {
    type Error = Infallible;

    fn checksum(&mut self, seed: u32, data: &[u8]) -> Result<u32, Self::Error> {
        // the crate reflects the initial value, the register already is reflected
        let mut digest = ACCELERATOR.digest_with_initial(seed.reverse_bits());
        digest.update(data);
        Ok(digest.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_check_value() {
        assert_eq!(SoftwareCrc.checksum(INITIAL, b"123456789"), Ok(0x340B_C6D9));
    }

    #[test]
    fn seed_changes_result() {
        let mut crc = SoftwareCrc;
        let fresh = crc.checksum(INITIAL, &[0xA5; 256]).unwrap();
        let seeded = crc.checksum(fresh, &[0xA5; 256]).unwrap();
        assert_ne!(fresh, seeded);
        assert_eq!(crc.checksum(INITIAL, &[0xA5; 256]), Ok(fresh));
    }

    #[test]
    fn seeding_with_a_result_continues_the_checksum() {
        let mut crc = SoftwareCrc;
        let data: Vec<u8> = (0..=255).collect();
        let whole = crc.checksum(INITIAL, &data).unwrap();
        let first = crc.checksum(INITIAL, &data[..100]).unwrap();
        assert_eq!(crc.checksum(first, &data[100..]), Ok(whole));
    }
}
