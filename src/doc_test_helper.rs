use core::convert::Infallible;

use crate::crc::SoftwareCrc;
use crate::{Bootloader, Config, Geometry, Nvm, Storage};

/// used for doc tests
pub fn get_bootloader() -> Bootloader<'static, NoOpFlash, NoOpStorage, SoftwareCrc> {
    Bootloader::new(NoOpFlash, NoOpStorage, SoftwareCrc, Config::DEFAULT)
}

/// Erased 256 KiB flash that accepts everything
pub struct NoOpFlash;

/// Empty card
pub struct NoOpStorage;

impl Nvm for NoOpFlash {
    type Error = Infallible;

    fn geometry(&mut self) -> Result<Geometry, Self::Error> {
        Ok(Geometry {
            page_size: 64,
            pages: 4096,
            pages_per_row: 4,
        })
    }

    fn erase_row(&mut self, _address: u32) -> Result<(), Self::Error> {
        Ok(())
    }

    fn write_page(&mut self, _address: u32, _data: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read(&mut self, _address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        buf.fill(0xFF);
        Ok(())
    }
}

impl Storage for NoOpStorage {
    type Error = ();
    type File = ();

    fn open(&mut self, _name: &str) -> Result<Self::File, Self::Error> {
        Err(())
    }

    fn read(&mut self, _file: &mut Self::File, _buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn close(&mut self, _file: Self::File) -> Result<(), Self::Error> {
        Ok(())
    }

    fn delete(&mut self, _name: &str) -> Result<(), Self::Error> {
        Err(())
    }
}
