use log::{debug, error};

use crate::{
    bootloader::{BootError, BootState, Bootloader, ChecksumPair, Error, Report},
    config::Verify,
    crc::{CHAIN_START, INITIAL},
    layout::Layout,
    Crc32, Nvm, Storage,
};

/// State of one image transfer
struct Session<F> {
    image: F,
    /// Next row of the application region to write
    row: u32,
    /// Image bytes consumed so far
    len: u32,
    /// Checksums of the last row written
    checksums: ChecksumPair,
}

impl<'a, N: Nvm, S: Storage, C: Crc32, const ROW: usize> Bootloader<'a, N, S, C, ROW> {
    /// Stream the image into the (already erased) application region.
    ///
    /// Every row is written page by page, read back and checksummed against the
    /// row taken from storage. The last row is padded with the erased byte value.
    /// The image file is closed on every path out of this function.
    pub fn program(&mut self, layout: &Layout) -> Result<Report, BootError<N, S, C>> {
        let image = self.storage.open(self.config.image).map_err(|e| {
            error!("could not open {}", self.config.image);
            BootError::<N, S, C>::StorageError(e)
        })?;

        let mut session = Session {
            image,
            row: 0,
            len: 0,
            checksums: ChecksumPair::seed(match self.config.verify {
                Verify::PerRow => INITIAL,
                Verify::LastRow => CHAIN_START,
            }),
        };
        let streamed = self.stream(layout, &mut session);
        let Session {
            image,
            row,
            len,
            checksums,
        } = session;
        let closed = self.storage.close(image);
        streamed?;
        closed.map_err(BootError::<N, S, C>::StorageError)?;

        if self.config.verify == Verify::LastRow {
            self.check(layout.absolute_row(row - 1), checksums)?;
        }

        Ok(Report {
            rows_erased: 0,
            rows_written: row,
            image_len: len,
            checksums,
        })
    }

    fn stream(
        &mut self,
        layout: &Layout,
        session: &mut Session<S::File>,
    ) -> Result<(), BootError<N, S, C>> {
        loop {
            let filled = self.fill_row(&mut session.image)?;
            if filled == 0 {
                break;
            }
            if session.row >= layout.rows() {
                error!("image is larger than {} rows", layout.rows());
                return Err(Error::ImageTooLarge { rows: layout.rows() });
            }
            self.buf[filled..].fill(self.config.erased);

            self.write_row(layout, session.row)?;

            let seed = match self.config.verify {
                Verify::PerRow => ChecksumPair::seed(INITIAL),
                Verify::LastRow => session.checksums,
            };
            session.checksums = self.checksum_row(layout, session.row, seed)?;
            if self.config.verify == Verify::PerRow {
                self.check(layout.absolute_row(session.row), session.checksums)?;
            }

            session.row += 1;
            session.len += filled as u32;
            if filled < ROW {
                break;
            }
        }
        if session.row == 0 {
            error!("{} is empty", self.config.image);
            return Err(Error::EmptyImage);
        }
        Ok(())
    }

    /// Read the next row of the image into `buf`. Returns how many bytes it holds,
    /// fewer than `ROW` only at the end of the image.
    fn fill_row(&mut self, image: &mut S::File) -> Result<usize, BootError<N, S, C>> {
        let mut filled = 0;
        while filled < ROW {
            let read = self
                .storage
                .read(image, &mut self.buf[filled..])
                .map_err(|e| {
                    error!("read error");
                    BootError::<N, S, C>::StorageError(e)
                })?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }

    /// One hardware write per page of the row.
    fn write_row(&mut self, layout: &Layout, row: u32) -> Result<(), BootError<N, S, C>> {
        let address = layout.row_address(row);
        let page_size = layout.page_size() as usize;
        debug!("writing row {} at {:#x}", layout.absolute_row(row), address);
        for (page, data) in self.buf.chunks(page_size).enumerate() {
            let page = page as u32;
            let page_address = address + page * page_size as u32;
            self.nvm.write_page(page_address, data).map_err(|source| {
                let row = layout.absolute_row(row);
                error!("NVM write error at row {} page {}", row, page);
                BootError::<N, S, C>::WriteError { row, page, source }
            })?;
        }
        Ok(())
    }

    fn checksum_row(
        &mut self,
        layout: &Layout,
        row: u32,
        seed: ChecksumPair,
    ) -> Result<ChecksumPair, BootError<N, S, C>> {
        let address = layout.row_address(row);
        self.nvm
            .read(address, &mut self.readback)
            .map_err(|source| BootError::<N, S, C>::ReadBackError {
                row: layout.absolute_row(row),
                source,
            })?;
        let source = checksum(&mut self.crc, seed.source, &self.buf)
            .map_err(BootError::<N, S, C>::ChecksumError)?;
        let flash = checksum(&mut self.crc, seed.flash, &self.readback)
            .map_err(BootError::<N, S, C>::ChecksumError)?;
        Ok(ChecksumPair { source, flash })
    }

    fn check(&mut self, row: u32, checksums: ChecksumPair) -> Result<(), BootError<N, S, C>> {
        if checksums.matches() {
            return Ok(());
        }
        self.state = BootState::Verify;
        error!(
            "CRC error at row {}: storage {:#010x}, NVM {:#010x}",
            row, checksums.source, checksums.flash
        );
        Err(Error::CrcValidationError {
            row,
            source: checksums.source,
            flash: checksums.flash,
        })
    }
}

/// The accelerator has to be re-armed around every use.
fn checksum<C: Crc32>(crc: &mut C, seed: u32, data: &[u8]) -> Result<u32, C::Error> {
    crc.prepare();
    let result = crc.checksum(seed, data);
    crc.finish();
    result
}
