//! FAT volume on an SD card in SPI mode, exposed as [`Storage`]

use cardboot::Storage;
use embedded_hal::spi::SpiBus as _;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::{
    Mode, RawDirectory, RawFile, RawVolume, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use log::{info, warn};

use crate::board::{self, Pin};
use crate::delay::AsmDelay;
use crate::spi::{self, ChipSelect, SpiBus};

type Card = SdCard<ExclusiveDevice<SpiBus, ChipSelect, AsmDelay>, AsmDelay>;

pub type Error = embedded_sdmmc::Error<SdCardError>;

/// There is no RTC, files written by the bootloader get a fixed date
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 54,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Root directory of the first partition
pub struct SdStorage {
    volumes: VolumeManager<Card, FixedTime>,
    volume: RawVolume,
    root: RawDirectory,
}

impl SdStorage {
    /// Bring up the card and open the root directory of its first partition.
    pub fn mount(delay: AsmDelay) -> Result<Self, Error> {
        let mut bus = SpiBus::new(board::SD_SERCOM, spi::BAUD_INIT);
        let cs = ChipSelect::new(board::SD_CS);
        // at least 74 clocks with the card deselected before the first command
        bus.write(&[0xFF; 10]).unwrap_or_else(|e| match e {});
        let device = ExclusiveDevice::new(bus, cs, delay).unwrap_or_else(|e| match e {});

        let card = SdCard::new(device, delay);
        let size = card.num_bytes().map_err(Error::DeviceError)?;
        info!("SD card mounted, {} MiB", size / (1024 * 1024));
        card.spi(|device| device.bus_mut().set_baud(spi::BAUD_FAST));

        let mut volumes = VolumeManager::new(card, FixedTime);
        let volume = volumes.open_raw_volume(VolumeIdx(0))?;
        let root = volumes.open_root_dir(volume)?;
        Ok(SdStorage {
            volumes,
            volume,
            root,
        })
    }

    /// Close the volume and return the SPI SERCOM and pins to their reset state.
    pub fn unmount(mut self) {
        if let Err(e) = self.volumes.close_dir(self.root) {
            warn!("closing root directory: {:?}", e);
        }
        if let Err(e) = self.volumes.close_volume(self.volume) {
            warn!("closing volume: {:?}", e);
        }
        let (card, _) = self.volumes.free();
        card.spi(|device| device.bus_mut().shutdown());
        Pin(board::SD_CS).reset();
    }

    /// Write a text file and a file holding every byte value once.
    #[cfg(feature = "self-test")]
    pub fn self_test(&mut self) -> Result<(), Error> {
        let mut pattern = [0; 256];
        for (i, byte) in pattern.iter_mut().enumerate() {
            *byte = i as u8;
        }
        self.create("TEST.TXT", b"cardboot storage self-test\n")?;
        self.create("TEST.BIN", &pattern)?;
        info!("storage self-test passed");
        Ok(())
    }

    #[cfg(feature = "self-test")]
    fn create(&mut self, name: &str, content: &[u8]) -> Result<(), Error> {
        let file = self
            .volumes
            .open_file_in_dir(self.root, name, Mode::ReadWriteCreateOrTruncate)?;
        let written = self.volumes.write(file, content);
        self.volumes.close_file(file)?;
        written
    }
}

impl Storage for SdStorage {
    type Error = Error;
    type File = RawFile;

    fn open(&mut self, name: &str) -> Result<Self::File, Self::Error> {
        self.volumes
            .open_file_in_dir(self.root, name, Mode::ReadOnly)
    }

    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.volumes.read(*file, buf)
    }

    fn close(&mut self, file: Self::File) -> Result<(), Self::Error> {
        self.volumes.close_file(file)
    }

    fn delete(&mut self, name: &str) -> Result<(), Self::Error> {
        self.volumes.delete_file_in_dir(self.root, name)
    }
}
