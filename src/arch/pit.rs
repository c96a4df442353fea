//! 8253/8254 programmable interval timer.

use crate::arch::io::outb;

const PIT_CHANNEL_0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, rate generator.
const PIT_RATE_GENERATOR: u8 = 0x34;

const PIT_BASE_HZ: u32 = 1_193_182;

/// Program channel 0 to fire the timer IRQ at `hz`.
pub fn init(hz: u32) {
    let divisor = PIT_BASE_HZ / hz;
    outb(PIT_COMMAND, PIT_RATE_GENERATOR);
    outb(PIT_CHANNEL_0, (divisor & 0xFF) as u8);
    outb(PIT_CHANNEL_0, ((divisor >> 8) & 0xFF) as u8);
    crate::kinfo!("PIT programmed for {} Hz preemption", hz);
}
