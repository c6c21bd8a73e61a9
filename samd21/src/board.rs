//! Clocks and pin multiplexing for the ATSAMD21G18A
//!
//! Everything runs from OSC8M through generic clock generator 0. After reset the
//! oscillator is divided by 8; [`init_clocks`] removes the prescaler and
//! [`restore_clocks`] puts it back before the jump.

use crate::mmio::{reg, Reg};

pub const CPU_HZ: u32 = 8_000_000;
pub const UART_BAUD: u32 = 115_200;

const PM: usize = 0x4000_0400;
const SYSCTRL: usize = 0x4000_0800;
const GCLK: usize = 0x4000_0C00;
const PORT: usize = 0x4100_4400;

const PM_APBCMASK: Reg<u32> = reg(PM, 0x20);
const SYSCTRL_OSC8M: Reg<u32> = reg(SYSCTRL, 0x20);
const GCLK_STATUS: Reg<u8> = reg(GCLK, 0x01);
const GCLK_CLKCTRL: Reg<u16> = reg(GCLK, 0x02);

const OSC8M_PRESC_MASK: u32 = 0b11 << 8;
const OSC8M_PRESC_DIV8: u32 = 0b11 << 8;
const GCLK_STATUS_SYNCBUSY: u8 = 1 << 7;
const GCLK_CLKCTRL_CLKEN: u16 = 1 << 14;
const GCLK_CLKCTRL_GEN0: u16 = 0 << 8;
const GCLK_SERCOM0_CORE: u16 = 0x14;

/// SD card SPI on SERCOM1: PA16 MOSI (pad 0), PA17 SCK (pad 1), PA19 MISO (pad 3)
pub const SD_SERCOM: u8 = 1;
pub const SD_MOSI: u8 = 16;
pub const SD_SCK: u8 = 17;
pub const SD_CS: u8 = 18;
pub const SD_MISO: u8 = 19;

/// Diagnostic UART on SERCOM3: PA22 TX (pad 0), PA23 RX (pad 1)
pub const UART_SERCOM: u8 = 3;
pub const UART_TX: u8 = 22;
pub const UART_RX: u8 = 23;

/// Peripheral function C routes pads to SERCOMn
pub const PMUX_SERCOM: u8 = 2;

pub fn init_clocks() {
    SYSCTRL_OSC8M.modify(|osc| osc & !OSC8M_PRESC_MASK);
}

/// Back to the reset clock of 1 MHz, the application sets up its own clocks.
pub fn restore_clocks() {
    SYSCTRL_OSC8M.modify(|osc| osc & !OSC8M_PRESC_MASK | OSC8M_PRESC_DIV8);
}

/// Base address of SERCOMn
pub const fn sercom_base(n: u8) -> usize {
    0x4200_0800 + 0x400 * n as usize
}

/// Clock SERCOMn from the bus and from generator 0
pub fn enable_sercom(n: u8) {
    PM_APBCMASK.modify(|mask| mask | 1 << (2 + n));
    GCLK_CLKCTRL.write(GCLK_CLKCTRL_CLKEN | GCLK_CLKCTRL_GEN0 | (GCLK_SERCOM0_CORE + n as u16));
    while GCLK_STATUS.read() & GCLK_STATUS_SYNCBUSY != 0 {}
}

/// Stop clocking SERCOMn
pub fn disable_sercom(n: u8) {
    GCLK_CLKCTRL.write(GCLK_SERCOM0_CORE + n as u16);
    while GCLK_STATUS.read() & GCLK_STATUS_SYNCBUSY != 0 {}
    PM_APBCMASK.modify(|mask| mask & !(1 << (2 + n)));
}

/// Port A pin
#[derive(Copy, Clone)]
pub struct Pin(pub u8);

impl Pin {
    const DIRCLR: Reg<u32> = reg(PORT, 0x04);
    const DIRSET: Reg<u32> = reg(PORT, 0x08);
    const OUTCLR: Reg<u32> = reg(PORT, 0x14);
    const OUTSET: Reg<u32> = reg(PORT, 0x18);

    const PINCFG_PMUXEN: u8 = 1 << 0;
    const PINCFG_INEN: u8 = 1 << 1;

    fn pincfg(self) -> Reg<u8> {
        reg(PORT, 0x40 + self.0 as usize)
    }

    fn pmux(self) -> Reg<u8> {
        reg(PORT, 0x30 + (self.0 / 2) as usize)
    }

    fn mask(self) -> u32 {
        1 << self.0
    }

    /// Hand the pin to a peripheral function
    pub fn into_function(self, function: u8) -> Self {
        let shift = if self.0 % 2 == 0 { 0 } else { 4 };
        self.pmux()
            .modify(|pmux| pmux & !(0xF << shift) | function << shift);
        self.pincfg()
            .write(Self::PINCFG_PMUXEN | Self::PINCFG_INEN);
        self
    }

    pub fn into_output(self) -> Self {
        self.pincfg().write(0);
        Self::DIRSET.write(self.mask());
        self
    }

    /// Back to the reset state: input buffer off, no peripheral, no drive
    pub fn reset(self) {
        self.pincfg().write(0);
        Self::DIRCLR.write(self.mask());
        Self::OUTCLR.write(self.mask());
    }

    pub fn set_high(self) {
        Self::OUTSET.write(self.mask());
    }

    pub fn set_low(self) {
        Self::OUTCLR.write(self.mask());
    }
}
