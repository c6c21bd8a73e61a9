use core::fmt::{self, Debug};

use log::{debug, error, info, warn};

use crate::{
    config::Config,
    handoff::Application,
    layout::{Layout, LayoutError},
    Crc32, Nvm, Storage,
};

/// Bootloader Error
///
/// `SE`, `NE` and `CE` are the error types of the [`Storage`], [`Nvm`] and [`Crc32`]
/// collaborators. See [`BootError`] for the alias spelled in terms of those.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Error<SE, NE, CE> {
    /// The flash controller could not report its geometry
    ParameterError(NE),
    /// The reported geometry cannot host an application region
    GeometryError(LayoutError),
    /// Opening, reading or deleting a file failed
    StorageError(SE),
    /// Erasing a row failed; `row` is the device row number
    EraseError { row: u32, source: NE },
    /// Programming a page failed
    WriteError { row: u32, page: u32, source: NE },
    /// Reading a freshly written row back failed
    ReadBackError { row: u32, source: NE },
    /// The checksum accelerator failed
    ChecksumError(CE),
    /// Image has more rows than the application region
    ImageTooLarge { rows: u32 },
    /// Image file is empty
    EmptyImage,
    /// Checksum of the row read from storage differs from the row read back from flash
    CrcValidationError { row: u32, source: u32, flash: u32 },
}

/// [`Error`] for a particular set of collaborators
pub type BootError<N, S, C> =
    Error<<S as Storage>::Error, <N as Nvm>::Error, <C as Crc32>::Error>;

impl<SE: Debug, NE: Debug, CE: Debug> fmt::Display for Error<SE, NE, CE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ParameterError(e) => write!(f, "cannot read NVM parameters: {:?}", e),
            Error::GeometryError(e) => write!(f, "{}", e),
            Error::StorageError(e) => write!(f, "storage error: {:?}", e),
            Error::EraseError { row, source } => {
                write!(f, "erase error at row {}: {:?}", row, source)
            }
            Error::WriteError { row, page, source } => {
                write!(f, "write error at row {} page {}: {:?}", row, page, source)
            }
            Error::ReadBackError { row, source } => {
                write!(f, "read back error at row {}: {:?}", row, source)
            }
            Error::ChecksumError(e) => write!(f, "checksum accelerator error: {:?}", e),
            Error::ImageTooLarge { rows } => {
                write!(f, "image does not fit into {} application rows", rows)
            }
            Error::EmptyImage => f.write_str("image is empty"),
            Error::CrcValidationError { row, source, flash } => write!(
                f,
                "CRC error at row {}: storage {:#010x}, flash {:#010x}",
                row, source, flash
            ),
        }
    }
}

/// Phase of the boot sequence an error happened in
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Stage {
    CheckUpdate,
    Erase,
    Program,
    Verify,
}

/// Boot state machine
///
/// `Idle → CheckUpdate → Erase → Program → Verify → Handoff`; a missing marker goes
/// straight from `CheckUpdate` to `Handoff`. Any error ends in `Failed`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BootState {
    Idle,
    CheckUpdate,
    Erase,
    Program,
    Verify,
    Handoff,
    Failed(Stage),
}

impl BootState {
    fn stage(self) -> Stage {
        match self {
            BootState::Erase => Stage::Erase,
            BootState::Program => Stage::Program,
            BootState::Verify => Stage::Verify,
            BootState::Failed(stage) => stage,
            BootState::Idle | BootState::CheckUpdate | BootState::Handoff => Stage::CheckUpdate,
        }
    }
}

/// Checksums of one row: as read from storage and as read back from flash
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ChecksumPair {
    pub source: u32,
    pub flash: u32,
}

impl ChecksumPair {
    pub(crate) const fn seed(value: u32) -> Self {
        ChecksumPair {
            source: value,
            flash: value,
        }
    }

    pub fn matches(&self) -> bool {
        self.source == self.flash
    }
}

/// Summary of a completed update
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Report {
    pub rows_erased: u32,
    pub rows_written: u32,
    /// Image length in bytes, before padding
    pub image_len: u32,
    /// Checksum pair of the last row written
    pub checksums: ChecksumPair,
}

/// Main struct of this crate
///
/// Owns the flash controller, the storage and the checksum accelerator for the
/// duration of one boot. [`run`](Bootloader::run) performs the whole sequence; the
/// individual phases are public for callers that need finer control.
///
/// # Note:
/// Rows are staged in internal buffers of `ROW` bytes, which defaults to `256`.
/// The row size reported by the flash controller must equal `ROW`, otherwise
/// [`run`](Bootloader::run) fails with [`Error::GeometryError`].
#[derive(Clone, Debug)]
pub struct Bootloader<'a, N, S, C, const ROW: usize = 256> {
    pub nvm: N,
    pub storage: S,
    pub crc: C,
    pub(crate) config: Config<'a>,
    pub(crate) state: BootState,
    pub(crate) buf: [u8; ROW],
    pub(crate) readback: [u8; ROW],
}

impl<'a, N: Nvm, S: Storage, C: Crc32, const ROW: usize> Bootloader<'a, N, S, C, ROW> {
    /// Create a Bootloader instance
    pub fn new(nvm: N, storage: S, crc: C, config: Config<'a>) -> Self {
        Bootloader {
            nvm,
            storage,
            crc,
            config,
            state: BootState::Idle,
            buf: [0; ROW],
            readback: [0; ROW],
        }
    }

    pub fn config(&self) -> &Config<'a> {
        &self.config
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Give the collaborators back, e.g. to de-initialise them before the jump.
    pub fn release(self) -> (N, S, C) {
        (self.nvm, self.storage, self.crc)
    }

    /// Run the boot sequence.
    ///
    /// Returns the [`Application`] to hand off to if no update was requested or the
    /// update was written, verified and its marker deleted. On error the marker
    /// stays in place and the application must not be started.
    ///
    /// ```
    /// # use cardboot::doc_test_helper::get_bootloader;
    /// use cardboot::BootState;
    ///
    /// let mut bootloader = get_bootloader();
    /// let app = bootloader.run().unwrap();
    /// assert_eq!(bootloader.state(), BootState::Handoff);
    /// assert_eq!(app.base(), 0x12000);
    /// ```
    pub fn run(&mut self) -> Result<Application, BootError<N, S, C>> {
        match self.sequence() {
            Ok(app) => {
                self.state = BootState::Handoff;
                Ok(app)
            }
            Err(e) => {
                self.state = BootState::Failed(self.state.stage());
                error!("FW update error: {}", e);
                Err(e)
            }
        }
    }

    fn sequence(&mut self) -> Result<Application, BootError<N, S, C>> {
        self.state = BootState::CheckUpdate;
        if !self.update_pending() {
            info!("no update requested");
            let base = Layout::base_for(self.config.reserved_rows, ROW as u32)
                .map_err(BootError::<N, S, C>::GeometryError)?;
            return Ok(Application::new(base, None));
        }
        info!("found update flag, attempting firmware update");

        let geometry = self
            .nvm
            .geometry()
            .map_err(BootError::<N, S, C>::ParameterError)?;
        info!(
            "NVM info: {} pages of {} bytes",
            geometry.pages, geometry.page_size
        );
        let layout =
            Layout::new(geometry, self.config.reserved_rows, ROW)
            .map_err(BootError::<N, S, C>::GeometryError)?;

        self.state = BootState::Erase;
        let rows_erased = self.erase_region(&layout)?;

        self.state = BootState::Program;
        let mut report = self.program(&layout)?;
        report.rows_erased = rows_erased;

        self.state = BootState::Verify;
        self.storage
            .delete(self.config.marker)
            .map_err(BootError::<N, S, C>::StorageError)?;
        info!(
            "firmware updated: {} bytes in {} rows",
            report.image_len, report.rows_written
        );
        Ok(Application::new(layout.base(), Some(report)))
    }

    /// Check for the update marker. Only its existence matters.
    pub fn update_pending(&mut self) -> bool {
        match self.storage.open(self.config.marker) {
            Ok(marker) => {
                if let Err(e) = self.storage.close(marker) {
                    warn!("closing {} failed: {:?}", self.config.marker, e);
                }
                true
            }
            Err(e) => {
                debug!("{} not opened: {:?}", self.config.marker, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verify;
    use crate::crc::SoftwareCrc;
    use crate::sim::{MemStorage, MemStorageError, SimFlash, SimFlashError};
    use crate::Geometry;

    const RESERVED: u32 = 4;
    const BASE: u32 = RESERVED * 256;

    fn geometry(rows: u32) -> Geometry {
        Geometry {
            page_size: 64,
            pages: rows * 4,
            pages_per_row: 4,
        }
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn bootloader<'a>(
        app_rows: u32,
        storage: MemStorage,
    ) -> Bootloader<'a, SimFlash, MemStorage, SoftwareCrc> {
        let flash = SimFlash::new(geometry(RESERVED + app_rows));
        Bootloader::new(
            flash,
            storage,
            SoftwareCrc,
            Config::DEFAULT.with_reserved_rows(RESERVED),
        )
    }

    fn card(image: &[u8]) -> MemStorage {
        MemStorage::new()
            .with_file("update.txt", b"")
            .with_file("fw.bin", image)
    }

    #[test]
    fn single_row_update() {
        let _ = env_logger::builder().is_test(true).try_init();
        let image = image(256);
        let mut bootloader = bootloader(1, card(&image));

        let app = bootloader.run().unwrap();

        assert_eq!(bootloader.state(), BootState::Handoff);
        assert_eq!(app.base(), BASE);
        assert_eq!(bootloader.nvm.erased_rows().collect::<Vec<_>>(), [BASE]);
        assert_eq!(
            bootloader.nvm.written_pages().collect::<Vec<_>>(),
            [BASE, BASE + 64, BASE + 128, BASE + 192]
        );
        assert_eq!(&bootloader.nvm.contents()[BASE as usize..], &image[..]);
        assert!(!bootloader.storage.exists("update.txt"));
        assert_eq!(bootloader.storage.open_files(), 0);

        let report = app.report().unwrap();
        assert_eq!(report.rows_erased, 1);
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.image_len, 256);
        assert!(report.checksums.matches());
    }

    #[test]
    fn every_row_matches_image_after_update() {
        let image = image(5 * 256 + 17);
        let mut bootloader = bootloader(8, card(&image));

        let report = *bootloader.run().unwrap().report().unwrap();

        assert_eq!(report.rows_erased, 8);
        assert_eq!(report.rows_written, 6);
        let flash = &bootloader.nvm.contents()[BASE as usize..];
        assert_eq!(&flash[..image.len()], &image[..]);
        assert!(flash[image.len()..].iter().all(|&b| b == 0xFF));
        assert!(bootloader.nvm.contents()[..BASE as usize]
            .iter()
            .all(|&b| b == 0xFF));
    }

    #[test]
    fn short_image_is_padded_with_erased_value() {
        let image = image(10);
        let mut bootloader = bootloader(1, card(&image));

        bootloader.run().unwrap();

        let row = &bootloader.nvm.contents()[BASE as usize..BASE as usize + 256];
        assert_eq!(&row[..10], &image[..]);
        assert!(row[10..].iter().all(|&b| b == 0xFF));
        assert_eq!(bootloader.nvm.written_pages().count(), 4);
    }

    #[test]
    fn no_marker_goes_straight_to_handoff() {
        let storage = MemStorage::new().with_file("fw.bin", &image(256));
        let mut bootloader = bootloader(1, storage);

        let app = bootloader.run().unwrap();

        assert_eq!(bootloader.state(), BootState::Handoff);
        assert_eq!(app.base(), BASE);
        assert_eq!(app.report(), None);
        assert!(bootloader.nvm.ops().is_empty());
        assert!(bootloader.storage.exists("fw.bin"));
    }

    #[test]
    fn erase_failure_aborts_before_any_write() {
        let storage = card(&image(3 * 256));
        let flash = SimFlash::new(geometry(RESERVED + 3)).fail_erase_on(1);
        let mut bootloader: Bootloader<_, _, _> = Bootloader::new(
            flash,
            storage,
            SoftwareCrc,
            Config::DEFAULT.with_reserved_rows(RESERVED),
        );

        let result = bootloader.run();

        assert_eq!(
            result,
            Err(Error::EraseError {
                row: RESERVED + 1,
                source: SimFlashError::Injected
            })
        );
        assert_eq!(bootloader.state(), BootState::Failed(Stage::Erase));
        assert_eq!(bootloader.nvm.erased_rows().count(), 2);
        assert_eq!(bootloader.nvm.written_pages().count(), 0);
        assert!(bootloader.storage.exists("update.txt"));
    }

    #[test]
    fn missing_image_is_a_storage_error() {
        let storage = MemStorage::new().with_file("update.txt", b"");
        let mut bootloader = bootloader(2, storage);

        let result = bootloader.run();

        assert_eq!(
            result,
            Err(Error::StorageError(MemStorageError::NotFound(
                "fw.bin".to_owned()
            )))
        );
        assert_eq!(bootloader.state(), BootState::Failed(Stage::Program));
        assert_eq!(bootloader.nvm.erased_rows().count(), 2);
        assert_eq!(bootloader.nvm.written_pages().count(), 0);
        assert!(bootloader.storage.exists("update.txt"));
    }

    #[test]
    fn read_error_closes_image_and_keeps_marker() {
        let storage = card(&image(3 * 256)).fail_read_on(1);
        let mut bootloader = bootloader(4, storage);

        let result = bootloader.run();

        assert_eq!(
            result,
            Err(Error::StorageError(MemStorageError::Injected))
        );
        assert_eq!(bootloader.storage.open_files(), 0);
        assert!(bootloader.storage.exists("update.txt"));
        assert_eq!(bootloader.nvm.written_pages().count(), 4);
    }

    #[test]
    fn write_failure_names_row_and_page() {
        let storage = card(&image(3 * 256));
        let flash = SimFlash::new(geometry(RESERVED + 3)).fail_write_on(5);
        let mut bootloader: Bootloader<_, _, _> = Bootloader::new(
            flash,
            storage,
            SoftwareCrc,
            Config::DEFAULT.with_reserved_rows(RESERVED),
        );

        let result = bootloader.run();

        assert_eq!(
            result,
            Err(Error::WriteError {
                row: RESERVED + 1,
                page: 1,
                source: SimFlashError::Injected
            })
        );
        assert_eq!(bootloader.state(), BootState::Failed(Stage::Program));
        assert_eq!(bootloader.storage.open_files(), 0);
        assert!(bootloader.storage.exists("update.txt"));
    }

    #[test]
    fn image_larger_than_region_is_rejected() {
        let mut bootloader = bootloader(2, card(&image(2 * 256 + 1)));
        let end = (RESERVED + 2) * 256;

        let result = bootloader.run();

        assert_eq!(result, Err(Error::ImageTooLarge { rows: 2 }));
        assert!(bootloader.nvm.written_pages().all(|address| address < end));
        assert_eq!(bootloader.storage.open_files(), 0);
        assert!(bootloader.storage.exists("update.txt"));
    }

    #[test]
    fn image_exactly_filling_region_fits() {
        let image = image(2 * 256);
        let mut bootloader = bootloader(2, card(&image));

        let report = *bootloader.run().unwrap().report().unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(bootloader.nvm.written_pages().count(), 8);
    }

    #[test]
    fn empty_image_is_rejected() {
        let mut bootloader = bootloader(2, card(b""));

        assert_eq!(bootloader.run(), Err(Error::EmptyImage));
        assert_eq!(bootloader.nvm.written_pages().count(), 0);
        assert!(bootloader.storage.exists("update.txt"));
    }

    #[test]
    fn fragmented_reads_fill_whole_rows() {
        let image = image(3 * 256 + 40);
        let mut bootloader = bootloader(4, card(&image).read_limit(100));

        let report = *bootloader.run().unwrap().report().unwrap();

        assert_eq!(report.rows_written, 4);
        assert_eq!(report.image_len, image.len() as u32);
        assert_eq!(
            &bootloader.nvm.contents()[BASE as usize..BASE as usize + image.len()],
            &image[..]
        );
    }

    #[test]
    fn row_size_must_match_buffer() {
        let mut bootloader: Bootloader<_, _, _, 512> = Bootloader::new(
            SimFlash::new(geometry(8)),
            card(&image(256)),
            SoftwareCrc,
            Config::DEFAULT.with_reserved_rows(RESERVED),
        );

        assert_eq!(
            bootloader.run(),
            Err(Error::GeometryError(LayoutError::RowSize {
                expected: 512,
                actual: 256
            }))
        );
        assert!(bootloader.nvm.ops().is_empty());
        assert!(bootloader.storage.exists("update.txt"));
    }

    #[test]
    fn custom_file_names() {
        let storage = MemStorage::new()
            .with_file("UPDATE.FLG", b"1")
            .with_file("APP.BIN", &image(300));
        let config = Config::DEFAULT
            .with_reserved_rows(RESERVED)
            .with_files("UPDATE.FLG", "APP.BIN")
            .with_verify(Verify::LastRow);
        let mut bootloader: Bootloader<_, _, _> = Bootloader::new(
            SimFlash::new(geometry(RESERVED + 2)),
            storage,
            SoftwareCrc,
            config,
        );

        bootloader.run().unwrap();

        assert!(!bootloader.storage.exists("UPDATE.FLG"));
        assert!(bootloader.storage.exists("APP.BIN"));
    }

    #[test]
    fn marker_delete_failure_withholds_the_application() {
        let image = image(256);
        let mut bootloader = bootloader(1, card(&image).fail_delete());

        let result = bootloader.run();

        assert_eq!(
            result,
            Err(Error::StorageError(MemStorageError::Injected))
        );
        assert_eq!(bootloader.state(), BootState::Failed(Stage::Verify));
        assert!(bootloader.storage.exists("update.txt"));
        assert_eq!(bootloader.storage.open_files(), 0);
        assert_eq!(&bootloader.nvm.contents()[BASE as usize..], &image[..]);
    }

    #[test]
    fn oversized_reserved_region_is_rejected_without_update() {
        let storage = MemStorage::new().with_file("fw.bin", &image(256));
        let mut bootloader: Bootloader<_, _, _> = Bootloader::new(
            SimFlash::new(geometry(8)),
            storage,
            SoftwareCrc,
            Config::DEFAULT.with_reserved_rows(20_000_000),
        );

        assert_eq!(
            bootloader.run(),
            Err(Error::GeometryError(LayoutError::AddressOverflow {
                rows: 20_000_000
            }))
        );
        assert_eq!(bootloader.state(), BootState::Failed(Stage::CheckUpdate));
        assert!(bootloader.nvm.ops().is_empty());
    }

    #[test]
    fn errors_render_row_numbers() {
        let error: Error<(), (), ()> = Error::CrcValidationError {
            row: 290,
            source: 0x1234,
            flash: 0xABCD,
        };
        assert_eq!(
            error.to_string(),
            "CRC error at row 290: storage 0x00001234, flash 0x0000abcd"
        );
        let error: Error<(), &str, ()> = Error::EraseError {
            row: 289,
            source: "locked",
        };
        assert_eq!(error.to_string(), "erase error at row 289: \"locked\"");
    }
}
