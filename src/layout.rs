//! Flash geometry and the application region carved out of it

use core::fmt;

/// Geometry reported by the flash controller at runtime
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Geometry {
    /// Bytes per page, the write granularity
    pub page_size: u32,
    /// Total number of pages in the device
    pub pages: u32,
    /// Pages per row, the erase granularity
    pub pages_per_row: u32,
}

impl Geometry {
    pub const fn row_size(&self) -> u32 {
        self.page_size * self.pages_per_row
    }

    pub const fn rows(&self) -> u32 {
        if self.pages_per_row == 0 {
            0
        } else {
            self.pages / self.pages_per_row
        }
    }
}

/// Reasons a [`Geometry`] cannot host an application region
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LayoutError {
    /// Page size or pages per row is zero
    EmptyRow,
    /// Row size differs from the bootloader's row buffer
    RowSize { expected: u32, actual: u32 },
    /// Nothing is left after the reserved bootloader rows
    NoApplicationRows { rows: u32, reserved: u32 },
    /// Region end does not fit the 32-bit address space
    AddressOverflow { rows: u32 },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::EmptyRow => f.write_str("flash reports an empty row"),
            LayoutError::RowSize { expected, actual } => {
                write!(f, "row size is {} bytes, expected {}", actual, expected)
            }
            LayoutError::NoApplicationRows { rows, reserved } => write!(
                f,
                "{} rows reserved for the bootloader but the device only has {}",
                reserved, rows
            ),
            LayoutError::AddressOverflow { rows } => {
                write!(f, "{} rows exceed the 32-bit address space", rows)
            }
        }
    }
}

/// Application region: every row after the reserved bootloader rows.
///
/// Flash starts at address 0, so row `i` of the region lives at
/// `(reserved_rows + i) * row_size`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Layout {
    geometry: Geometry,
    reserved_rows: u32,
}

impl Layout {
    /// Derive the application region from a reported geometry.
    ///
    /// `row_buffer` is the size of the buffer rows are staged in; the device's
    /// row size must match it.
    ///
    /// ```
    /// use cardboot::{Geometry, Layout};
    ///
    /// let geometry = Geometry { page_size: 64, pages: 4096, pages_per_row: 4 };
    /// let layout = Layout::new(geometry, 288, 256).unwrap();
    /// assert_eq!(layout.base(), 0x12000);
    /// assert_eq!(layout.rows(), 1024 - 288);
    /// ```
    pub fn new(geometry: Geometry, reserved_rows: u32, row_buffer: usize) -> Result<Self, LayoutError> {
        if geometry.page_size == 0 || geometry.pages_per_row == 0 {
            return Err(LayoutError::EmptyRow);
        }
        if geometry.row_size() as usize != row_buffer {
            return Err(LayoutError::RowSize {
                expected: row_buffer as u32,
                actual: geometry.row_size(),
            });
        }
        if geometry.rows().checked_mul(geometry.row_size()).is_none() {
            return Err(LayoutError::AddressOverflow {
                rows: geometry.rows(),
            });
        }
        if reserved_rows >= geometry.rows() {
            return Err(LayoutError::NoApplicationRows {
                rows: geometry.rows(),
                reserved: reserved_rows,
            });
        }
        Ok(Layout {
            geometry,
            reserved_rows,
        })
    }

    /// Start of the application region without a device to check against
    pub fn base_for(reserved_rows: u32, row_size: u32) -> Result<u32, LayoutError> {
        reserved_rows
            .checked_mul(row_size)
            .ok_or(LayoutError::AddressOverflow {
                rows: reserved_rows,
            })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn reserved_rows(&self) -> u32 {
        self.reserved_rows
    }

    /// First address of the application region
    pub fn base(&self) -> u32 {
        self.reserved_rows * self.row_size()
    }

    /// One past the last address of the application region
    pub fn end(&self) -> u32 {
        self.geometry.rows() * self.row_size()
    }

    /// Number of rows in the application region
    pub fn rows(&self) -> u32 {
        self.geometry.rows() - self.reserved_rows
    }

    pub fn row_size(&self) -> u32 {
        self.geometry.row_size()
    }

    pub fn page_size(&self) -> u32 {
        self.geometry.page_size
    }

    /// Address of row `row` of the application region
    pub fn row_address(&self, row: u32) -> u32 {
        self.base() + row * self.row_size()
    }

    /// Device row number of row `row` of the application region
    pub fn absolute_row(&self, row: u32) -> u32 {
        self.reserved_rows + row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMD21: Geometry = Geometry {
        page_size: 64,
        pages: 4096,
        pages_per_row: 4,
    };

    #[test]
    fn region_follows_reserved_rows() {
        let layout = Layout::new(SAMD21, 288, 256).unwrap();
        assert_eq!(layout.base(), 0x12000);
        assert_eq!(layout.end(), 0x40000);
        assert_eq!(layout.rows(), 736);
        assert_eq!(layout.row_address(0), 0x12000);
        assert_eq!(layout.row_address(1), 0x12100);
        assert_eq!(layout.absolute_row(2), 290);
        assert_eq!(layout.row_address(layout.rows() - 1) + layout.row_size(), layout.end());
    }

    #[test]
    fn no_reserved_rows_starts_at_zero() {
        let layout = Layout::new(SAMD21, 0, 256).unwrap();
        assert_eq!(layout.base(), 0);
        assert_eq!(layout.rows(), 1024);
    }

    #[test]
    fn rejects_regions_past_the_address_space() {
        let huge = Geometry {
            pages: u32::MAX,
            ..SAMD21
        };
        assert_eq!(
            Layout::new(huge, 288, 256),
            Err(LayoutError::AddressOverflow {
                rows: u32::MAX / 4
            })
        );
        assert_eq!(Layout::base_for(288, 256), Ok(0x12000));
        assert_eq!(
            Layout::base_for(20_000_000, 256),
            Err(LayoutError::AddressOverflow { rows: 20_000_000 })
        );
    }

    #[test]
    fn rejects_unusable_geometry() {
        assert_eq!(
            Layout::new(SAMD21, 1024, 256),
            Err(LayoutError::NoApplicationRows {
                rows: 1024,
                reserved: 1024
            })
        );
        assert_eq!(
            Layout::new(SAMD21, 288, 512),
            Err(LayoutError::RowSize {
                expected: 512,
                actual: 256
            })
        );
        let empty = Geometry {
            pages_per_row: 0,
            ..SAMD21
        };
        assert_eq!(empty.rows(), 0);
        assert_eq!(Layout::new(empty, 0, 256), Err(LayoutError::EmptyRow));
    }
}
