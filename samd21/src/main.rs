#![no_main]
#![no_std]

mod board;
mod delay;
mod dsu;
mod logger;
mod mmio;
mod nvm;
mod println;
mod sdcard;
mod serial;
mod spi;

use cardboot::handoff::RESET_SETTLE_MS;
use cardboot::{Bootloader, Config, VectorTable};
use cortex_m::peripheral::SCB;
use cortex_m_rt::entry;
use embedded_hal::delay::DelayNs;
use log::{error, info, warn};
use panic_persist::get_panic_message_bytes;

use crate::delay::AsmDelay;
use crate::dsu::Dsu;
use crate::nvm::Nvmctrl;
use crate::sdcard::SdStorage;
use crate::serial::{Uart, SERIAL};

#[entry]
fn main() -> ! {
    // ---------- Clocks -----------------
    board::init_clocks();
    let mut delay = AsmDelay::new(board::CPU_HZ);

    // ---------- UART -----------------
    serial::init(Uart::new(board::UART_SERCOM, board::UART_BAUD));

    // ---------- Logger -----------------
    logger::init_logger(log::LevelFilter::Info);

    // ---------- panic message -----------------
    if let Some(msg) = get_panic_message_bytes() {
        critical_section::with(|cs| {
            if let Some(serial) = SERIAL.borrow_ref_mut(cs).as_mut() {
                serial::write(serial, b"panic during previous boot: ").ok();
                serial::write(serial, msg).ok();
                serial::write(serial, b"\n").ok();
            }
        });
    }

    println!("ENTER BOOTLOADER");

    // ---------- SD card -----------------
    let storage = match SdStorage::mount(delay) {
        Ok(storage) => storage,
        Err(e) => {
            error!("SD card mount failed: {:?}", e);
            delay.delay_ms(RESET_SETTLE_MS);
            SCB::sys_reset();
        }
    };

    #[cfg(feature = "self-test")]
    let storage = {
        let mut storage = storage;
        if let Err(e) = storage.self_test() {
            warn!("storage self-test failed: {:?}", e);
        }
        storage
    };

    // ---------- update -----------------
    let mut bootloader: Bootloader<_, _, _> =
        Bootloader::new(Nvmctrl::new(), storage, Dsu::new(), Config::DEFAULT);
    let result = bootloader.run();
    let (mut nvm, storage, dsu) = bootloader.release();

    let app = match result {
        Ok(app) => app,
        // the error is logged by `run`
        Err(_) => halt(),
    };

    match VectorTable::read(&mut nvm, app.base()) {
        Ok(table) if table.is_erased() => warn!("no application at {:#x}", app.base()),
        Ok(table) => info!(
            "application at {:#x}: sp {:#010x}, reset {:#010x}",
            app.base(),
            table.initial_sp,
            table.reset_vector
        ),
        Err(e) => warn!("cannot read vector table: {:?}", e),
    }

    // ---------- handoff -----------------
    println!("EXIT BOOTLOADER");
    app.settle(&mut delay);
    storage.unmount();
    serial::deinit();
    nvm.release();
    dsu.release();
    board::restore_clocks();

    // SAFETY: SERCOMs, NVMCTRL, DSU protection and the clock prescaler are back in
    // their reset state
    unsafe { app.jump() }
}

/// An unverified application must not run. Stay here until someone resets the board.
fn halt() -> ! {
    println!("boot halted, reset or reflash required");
    loop {
        cortex_m::asm::wfi();
    }
}
