use core::convert::Infallible;

use embedded_hal::{digital, spi};

use crate::board::{self, Pin};
use crate::mmio::{reg, Reg};

const CTRLA_SWRST: u32 = 1 << 0;
const CTRLA_ENABLE: u32 = 1 << 1;
const CTRLA_MODE_SPI_MASTER: u32 = 0x3 << 2;
const CTRLA_DOPO_PAD0: u32 = 0 << 16;
const CTRLA_DIPO_PAD3: u32 = 3 << 20;
const CTRLB_RXEN: u32 = 1 << 17;
const INTFLAG_DRE: u8 = 1 << 0;
const INTFLAG_RXC: u8 = 1 << 2;
const SYNCBUSY_ANY: u32 = 0b111;

/// 400 kHz for card identification
pub const BAUD_INIT: u8 = 9;
/// 4 MHz once the card is initialised
pub const BAUD_FAST: u8 = 0;

/// SERCOM in SPI master mode 0, MSB first
pub struct SpiBus {
    n: u8,
    ctrla: Reg<u32>,
    ctrlb: Reg<u32>,
    baud: Reg<u8>,
    intflag: Reg<u8>,
    syncbusy: Reg<u32>,
    data: Reg<u32>,
}

impl SpiBus {
    pub fn new(n: u8, baud: u8) -> Self {
        let base = board::sercom_base(n);
        let bus = SpiBus {
            n,
            ctrla: reg(base, 0x00),
            ctrlb: reg(base, 0x04),
            baud: reg(base, 0x0C),
            intflag: reg(base, 0x18),
            syncbusy: reg(base, 0x1C),
            data: reg(base, 0x28),
        };

        board::enable_sercom(n);
        bus.ctrla.write(CTRLA_SWRST);
        bus.sync();
        bus.ctrla
            .write(CTRLA_MODE_SPI_MASTER | CTRLA_DOPO_PAD0 | CTRLA_DIPO_PAD3);
        bus.ctrlb.write(CTRLB_RXEN);
        bus.sync();
        bus.baud.write(baud);
        bus.ctrla.modify(|ctrla| ctrla | CTRLA_ENABLE);
        bus.sync();

        Pin(board::SD_MOSI).into_function(board::PMUX_SERCOM);
        Pin(board::SD_SCK).into_function(board::PMUX_SERCOM);
        Pin(board::SD_MISO).into_function(board::PMUX_SERCOM);
        bus
    }

    fn sync(&self) {
        while self.syncbusy.read() & SYNCBUSY_ANY != 0 {}
    }

    /// BAUD is enable-protected, so the SERCOM is stopped around the change.
    pub fn set_baud(&mut self, baud: u8) {
        self.ctrla.modify(|ctrla| ctrla & !CTRLA_ENABLE);
        self.sync();
        self.baud.write(baud);
        self.ctrla.modify(|ctrla| ctrla | CTRLA_ENABLE);
        self.sync();
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        while self.intflag.read() & INTFLAG_DRE == 0 {}
        self.data.write(byte as u32);
        while self.intflag.read() & INTFLAG_RXC == 0 {}
        self.data.read() as u8
    }

    /// Return the SERCOM and its pins to their reset state. The bus is unusable
    /// afterwards.
    pub fn shutdown(&mut self) {
        self.ctrla.write(CTRLA_SWRST);
        self.sync();
        board::disable_sercom(self.n);
        Pin(board::SD_MOSI).reset();
        Pin(board::SD_SCK).reset();
        Pin(board::SD_MISO).reset();
    }
}

impl spi::ErrorType for SpiBus {
    type Error = Infallible;
}

impl spi::SpiBus for SpiBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words {
            *word = self.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        for &word in words {
            self.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        for i in 0..read.len().max(write.len()) {
            let received = self.exchange(write.get(i).copied().unwrap_or(0xFF));
            if let Some(word) = read.get_mut(i) {
                *word = received;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words {
            *word = self.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Card select, active low
pub struct ChipSelect(Pin);

impl ChipSelect {
    pub fn new(pin: u8) -> Self {
        let pin = Pin(pin).into_output();
        pin.set_high();
        ChipSelect(pin)
    }
}

impl digital::ErrorType for ChipSelect {
    type Error = Infallible;
}

impl digital::OutputPin for ChipSelect {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_low();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set_high();
        Ok(())
    }
}
