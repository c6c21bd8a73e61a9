use crate::println;

/// Route `log` records to the diagnostic UART.
pub fn init_logger(level: log::LevelFilter) {
    // SAFETY: called once from `main` before anything logs, interrupts are not used
    if unsafe { log::set_logger_racy(&UartLogger) }.is_ok() {
        log::set_max_level(level);
    }
}

struct UartLogger;

impl log::Log for UartLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        const RESET: &str = "\u{001B}[0m";
        const RED: &str = "\u{001B}[31m";
        const GREEN: &str = "\u{001B}[32m";
        const YELLOW: &str = "\u{001B}[33m";
        const BLUE: &str = "\u{001B}[34m";
        const MAGENTA: &str = "\u{001B}[35m";

        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            log::Level::Error => RED,
            log::Level::Warn => YELLOW,
            log::Level::Info => GREEN,
            log::Level::Debug => BLUE,
            log::Level::Trace => MAGENTA,
        };

        println!(
            "{}{:<5} {}: {}{}",
            color,
            record.level(),
            record.target(),
            record.args(),
            RESET
        );
    }

    fn flush(&self) {}
}
