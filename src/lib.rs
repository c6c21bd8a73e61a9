//! Second-stage bootloader core for row/page organised NVM.
//!
//! On every boot the [`Bootloader`] looks for an update marker file on removable
//! storage. If present, it erases the application region, streams the replacement
//! image into it row by row, checks the written rows against the image with the
//! checksum accelerator and deletes the marker. The resulting [`Application`] token
//! is the only way to reach the final jump.
//!
//! Hardware is reached exclusively through the [`Nvm`], [`Storage`] and [`Crc32`]
//! traits, so the whole sequence runs unchanged on the target and on a host.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::fmt::Debug;

pub use crate::bootloader::{BootError, BootState, Bootloader, ChecksumPair, Error, Report, Stage};
pub use crate::config::{Config, Verify};
pub use crate::handoff::{Application, VectorTable};
pub use crate::layout::{Geometry, Layout, LayoutError};

mod bootloader;
mod config;
pub mod crc;
#[doc(hidden)]
pub mod doc_test_helper;
mod eraser;
pub mod handoff;
mod layout;
mod programmer;
#[cfg(any(test, feature = "std"))]
pub mod sim;

/// Flash controller: row-granularity erase, page-granularity write.
pub trait Nvm {
    type Error: Debug;

    /// Report the device's page size and page count.
    fn geometry(&mut self) -> Result<Geometry, Self::Error>;

    /// Erase the row starting at `address`.
    fn erase_row(&mut self, address: u32) -> Result<(), Self::Error>;

    /// Program one page. `data` is exactly one page long and `address` is page aligned.
    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Read back `buf.len()` bytes starting at `address`.
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Filesystem on removable storage.
pub trait Storage {
    type Error: Debug;
    type File;

    /// Open `name` for reading.
    fn open(&mut self, name: &str) -> Result<Self::File, Self::Error>;

    /// Read into `buf`, returning the number of bytes read. `0` means end of file.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn close(&mut self, file: Self::File) -> Result<(), Self::Error>;

    fn delete(&mut self, name: &str) -> Result<(), Self::Error>;
}

/// Checksum accelerator.
///
/// Some accelerators must be re-armed between uses; [`prepare`](Crc32::prepare) and
/// [`finish`](Crc32::finish) are called around every [`checksum`](Crc32::checksum).
pub trait Crc32 {
    type Error: Debug;

    /// CRC-32 of `data`, starting from `seed` instead of a fresh register.
    fn checksum(&mut self, seed: u32, data: &[u8]) -> Result<u32, Self::Error>;

    fn prepare(&mut self) {}

    fn finish(&mut self) {}
}

impl<N: Nvm> Nvm for &mut N {
    type Error = N::Error;

    fn geometry(&mut self) -> Result<Geometry, Self::Error> {
        N::geometry(self)
    }

    fn erase_row(&mut self, address: u32) -> Result<(), Self::Error> {
        N::erase_row(self, address)
    }

    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        N::write_page(self, address, data)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        N::read(self, address, buf)
    }
}

impl<S: Storage> Storage for &mut S {
    type Error = S::Error;
    type File = S::File;

    fn open(&mut self, name: &str) -> Result<Self::File, Self::Error> {
        S::open(self, name)
    }

    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Self::Error> {
        S::read(self, file, buf)
    }

    fn close(&mut self, file: Self::File) -> Result<(), Self::Error> {
        S::close(self, file)
    }

    fn delete(&mut self, name: &str) -> Result<(), Self::Error> {
        S::delete(self, name)
    }
}

impl<C: Crc32> Crc32 for &mut C {
    type Error = C::Error;

    fn checksum(&mut self, seed: u32, data: &[u8]) -> Result<u32, Self::Error> {
        C::checksum(self, seed, data)
    }

    fn prepare(&mut self) {
        C::prepare(self)
    }

    fn finish(&mut self) {
        C::finish(self)
    }
}
