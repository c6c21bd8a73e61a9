use embedded_hal::delay::DelayNs;

/// Busy-wait delay counted in CPU cycles
#[derive(Copy, Clone)]
pub struct AsmDelay {
    cycles_per_us: u32,
}

impl AsmDelay {
    pub const fn new(cpu_hz: u32) -> Self {
        AsmDelay {
            cycles_per_us: cpu_hz / 1_000_000,
        }
    }
}

impl DelayNs for AsmDelay {
    fn delay_ns(&mut self, ns: u32) {
        let cycles = (ns as u64 * self.cycles_per_us as u64).div_ceil(1_000);
        cortex_m::asm::delay(cycles.min(u32::MAX as u64) as u32);
    }

    fn delay_us(&mut self, us: u32) {
        let cycles = us as u64 * self.cycles_per_us as u64;
        cortex_m::asm::delay(cycles.min(u32::MAX as u64) as u32);
    }
}
