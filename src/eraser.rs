use log::{debug, error};

use crate::{
    bootloader::{BootError, Bootloader, Error},
    layout::Layout,
    Crc32, Nvm, Storage,
};

impl<'a, N: Nvm, S: Storage, C: Crc32, const ROW: usize> Bootloader<'a, N, S, C, ROW> {
    /// Erase every row of the application region, lowest address first.
    ///
    /// Stops at the first failing row. Rows erased before it stay erased and rows
    /// after it keep their old content. Returns the number of rows erased.
    pub fn erase_region(&mut self, layout: &Layout) -> Result<u32, BootError<N, S, C>> {
        debug!(
            "erasing {} rows from {:#x} to {:#x}",
            layout.rows(),
            layout.base(),
            layout.end()
        );
        for row in 0..layout.rows() {
            let address = layout.row_address(row);
            if let Err(source) = self.nvm.erase_row(address) {
                let row = layout.absolute_row(row);
                error!("NVM erase error at row {} ({:#x})", row, address);
                return Err(Error::EraseError { row, source });
            }
        }
        Ok(layout.rows())
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::{FlashOp, MemStorage, SimFlash};
    use crate::{crc::SoftwareCrc, Bootloader, Config, Error, Geometry, Layout};

    fn geometry(rows: u32) -> Geometry {
        Geometry {
            page_size: 64,
            pages: rows * 4,
            pages_per_row: 4,
        }
    }

    #[test]
    fn erases_only_the_application_region() {
        for reserved in [0, 1, 3, 7] {
            let layout = Layout::new(geometry(8), reserved, 256).unwrap();
            let mut bootloader: Bootloader<_, _, _> = Bootloader::new(
                SimFlash::new(geometry(8)),
                MemStorage::new(),
                SoftwareCrc,
                Config::DEFAULT.with_reserved_rows(reserved),
            );

            assert_eq!(bootloader.erase_region(&layout), Ok(8 - reserved));

            let erased: Vec<u32> = bootloader.nvm.erased_rows().collect();
            let expected: Vec<u32> = (reserved..8).map(|row| row * 256).collect();
            assert_eq!(erased, expected);
            assert!(erased.iter().all(|&address| address >= layout.base()));
        }
    }

    #[test]
    fn stops_at_first_failing_row() {
        let layout = Layout::new(geometry(8), 2, 256).unwrap();
        let mut bootloader: Bootloader<_, _, _> = Bootloader::new(
            SimFlash::new(geometry(8)).fail_erase_on(1),
            MemStorage::new(),
            SoftwareCrc,
            Config::DEFAULT.with_reserved_rows(2),
        );

        let result = bootloader.erase_region(&layout);

        assert!(matches!(result, Err(Error::EraseError { row: 3, .. })));
        assert_eq!(
            bootloader.nvm.ops(),
            &[FlashOp::Erase(0x200), FlashOp::Erase(0x300)]
        );
    }
}
