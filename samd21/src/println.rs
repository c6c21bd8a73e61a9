use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

#[macro_export]
macro_rules! println {
    ($($arg:tt)*) => {{
        {
            use core::fmt::Write;
            writeln!($crate::println::Printer, $($arg)*).ok();
        }
    }};
}

/// Sink of `println!`, forwards to whatever print function is installed
pub struct Printer;

impl core::fmt::Write for Printer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        critical_section::with(|cs| {
            let f = PRINT_FUNC.borrow(cs).get();
            f(cs, s)
        })
    }
}

pub type PrintFunc = fn(cs: CriticalSection, s: &str) -> core::fmt::Result;

// output is dropped until the UART is up and after it is torn down
static PRINT_FUNC: Mutex<Cell<PrintFunc>> = Mutex::new(Cell::new(|_, _| Err(core::fmt::Error)));

pub fn set_print_func(cs: CriticalSection, f: PrintFunc) {
    PRINT_FUNC.borrow(cs).set(f);
}
