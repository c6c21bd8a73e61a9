/// When the per-row checksum pairs are compared
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Verify {
    /// Compare every row right after it is written and stop at the first mismatch.
    PerRow,
    /// Seed each row's checksum with the previous row's value and compare only the
    /// final pair once the image is exhausted. The first row is seeded with
    /// [`CHAIN_START`](crate::crc::CHAIN_START), so the final pair is the CRC
    /// register over the whole padded image started from zero.
    LastRow,
}

/// Bootloader settings
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Config<'a> {
    /// File whose existence requests an update
    pub marker: &'a str,
    /// Replacement application image
    pub image: &'a str,
    /// Rows at the start of flash occupied by the bootloader itself
    pub reserved_rows: u32,
    /// Value of an erased flash byte, used to pad the last row
    pub erased: u8,
    pub verify: Verify,
}

impl Config<'static> {
    /// 288 reserved rows of 256 bytes put the application at `0x12000`.
    pub const DEFAULT: Config<'static> = Config {
        marker: "update.txt",
        image: "fw.bin",
        reserved_rows: 288,
        erased: 0xFF,
        verify: Verify::PerRow,
    };
}

impl Default for Config<'static> {
    fn default() -> Self {
        Config::DEFAULT
    }
}

impl<'a> Config<'a> {
    pub const fn with_files(self, marker: &'a str, image: &'a str) -> Config<'a> {
        Config {
            marker,
            image,
            reserved_rows: self.reserved_rows,
            erased: self.erased,
            verify: self.verify,
        }
    }

    pub const fn with_reserved_rows(mut self, reserved_rows: u32) -> Self {
        self.reserved_rows = reserved_rows;
        self
    }

    pub const fn with_verify(mut self, verify: Verify) -> Self {
        self.verify = verify;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_places_application_at_0x12000() {
        let config = Config::default();
        assert_eq!(config, Config::DEFAULT);
        assert_eq!(config.reserved_rows * 256, 0x12000);
        assert_eq!(config.verify, Verify::PerRow);
        assert_eq!(config.erased, 0xFF);
    }

    #[test]
    fn builders_change_only_their_field() {
        const CONFIG: Config<'static> = Config::DEFAULT
            .with_files("UPDATE.FLG", "APP.BIN")
            .with_verify(Verify::LastRow);
        assert_eq!(CONFIG.marker, "UPDATE.FLG");
        assert_eq!(CONFIG.image, "APP.BIN");
        assert_eq!(CONFIG.reserved_rows, 288);
        assert_eq!(CONFIG.verify, Verify::LastRow);
    }
}
