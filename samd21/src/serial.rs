use core::cell::RefCell;
use core::convert::Infallible;

use critical_section::{CriticalSection, Mutex};

use crate::board::{self, Pin};
use crate::mmio::{reg, Reg};
use crate::println;

pub static SERIAL: Mutex<RefCell<Option<Uart>>> = Mutex::new(RefCell::new(None));

const CTRLA_SWRST: u32 = 1 << 0;
const CTRLA_ENABLE: u32 = 1 << 1;
const CTRLA_MODE_USART_INT_CLK: u32 = 1 << 2;
const CTRLA_RXPO_PAD1: u32 = 1 << 20;
const CTRLA_TXPO_PAD0: u32 = 0 << 16;
const CTRLA_DORD_LSB: u32 = 1 << 30;
const CTRLB_TXEN: u32 = 1 << 16;
const CTRLB_RXEN: u32 = 1 << 17;
const INTFLAG_DRE: u8 = 1 << 0;
const INTFLAG_TXC: u8 = 1 << 1;
const SYNCBUSY_ANY: u32 = 0b111;

/// SERCOM in asynchronous USART mode, 8N1
pub struct Uart {
    n: u8,
    ctrla: Reg<u32>,
    ctrlb: Reg<u32>,
    baud: Reg<u16>,
    intflag: Reg<u8>,
    syncbusy: Reg<u32>,
    data: Reg<u16>,
}

impl Uart {
    pub fn new(n: u8, baud: u32) -> Self {
        let base = board::sercom_base(n);
        let uart = Uart {
            n,
            ctrla: reg(base, 0x00),
            ctrlb: reg(base, 0x04),
            baud: reg(base, 0x0C),
            intflag: reg(base, 0x18),
            syncbusy: reg(base, 0x1C),
            data: reg(base, 0x28),
        };

        board::enable_sercom(n);
        uart.reset();
        uart.ctrla.write(
            CTRLA_MODE_USART_INT_CLK | CTRLA_RXPO_PAD1 | CTRLA_TXPO_PAD0 | CTRLA_DORD_LSB,
        );
        uart.ctrlb.write(CTRLB_TXEN | CTRLB_RXEN);
        uart.sync();
        // arithmetic baud, 16x oversampling
        let ratio = (16 * baud as u64) << 16;
        uart.baud
            .write((65536 - ratio / board::CPU_HZ as u64) as u16);
        uart.ctrla.modify(|ctrla| ctrla | CTRLA_ENABLE);
        uart.sync();

        Pin(board::UART_TX).into_function(board::PMUX_SERCOM);
        Pin(board::UART_RX).into_function(board::PMUX_SERCOM);
        uart
    }

    fn sync(&self) {
        while self.syncbusy.read() & SYNCBUSY_ANY != 0 {}
    }

    fn reset(&self) {
        self.ctrla.write(CTRLA_SWRST);
        self.sync();
    }

    pub fn write_byte(&mut self, byte: u8) -> nb::Result<(), Infallible> {
        if self.intflag.read() & INTFLAG_DRE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        self.data.write(byte as u16);
        Ok(())
    }

    /// Wait for the shift register to empty
    pub fn flush(&mut self) -> nb::Result<(), Infallible> {
        if self.intflag.read() & INTFLAG_TXC == 0 {
            return Err(nb::Error::WouldBlock);
        }
        Ok(())
    }

    /// Return the SERCOM and its pins to their reset state
    pub fn release(self) {
        self.reset();
        board::disable_sercom(self.n);
        Pin(board::UART_TX).reset();
        Pin(board::UART_RX).reset();
    }
}

pub fn init(uart: Uart) {
    critical_section::with(|cs| {
        *SERIAL.borrow_ref_mut(cs) = Some(uart);
        println::set_print_func(cs, serial_print_func);
    });
}

/// Take the UART away from `println!` and shut it down
pub fn deinit() {
    let uart = critical_section::with(|cs| {
        println::set_print_func(cs, |_, _| Err(core::fmt::Error));
        SERIAL.borrow_ref_mut(cs).take()
    });
    if let Some(mut uart) = uart {
        nb::block!(uart.flush()).ok();
        uart.release();
    }
}

fn serial_print_func(cs: CriticalSection, s: &str) -> core::fmt::Result {
    let mut serial_ref = SERIAL.borrow_ref_mut(cs);
    let serial = serial_ref.as_mut().ok_or(core::fmt::Error)?;

    write(serial, s.as_bytes())
}

pub(crate) fn write(serial: &mut Uart, bytes: &[u8]) -> core::fmt::Result {
    for &byte in bytes {
        if byte == b'\n' {
            nb::block!(serial.write_byte(b'\r')).map_err(|_| core::fmt::Error)?;
        }
        nb::block!(serial.write_byte(byte)).map_err(|_| core::fmt::Error)?;
    }
    Ok(())
}
