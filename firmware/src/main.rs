//! Blinks LD2 and reports progress over the ST-LINK virtual COM port.
//!
//! The board's USART2 TX (PA2) is wired to the debugger's virtual COM port, so
//! trace output shows up on the host at 115200 8N1. `defmt` output goes over RTT.

#![no_std]
#![no_main]

mod led;

use cortex_m::{asm, singleton};
use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_probe as _;
use uart_trace::stm32f4::{self, PCLK1_HZ};
use uart_trace::{TRACE_BUFFER_SIZE, Trace, uprintf};

use crate::led::Led;

/// Busy-loop iterations between LED toggles.
const BLINK_DELAY: u32 = 16_000_000;

/// Core clock. Nothing reconfigures the reset clock tree, so the core runs on the HSI
/// like APB1 does.
const SYSTEM_CLOCK_HZ: u32 = PCLK1_HZ;

#[entry]
fn main() -> ! {
    let dma = stm32f4::init().unwrap();
    let buffer = singleton!(: [u8; TRACE_BUFFER_SIZE] = [0; TRACE_BUFFER_SIZE]).unwrap();
    let mut trace = Trace::new(dma, buffer);

    let mut led = Led::init();

    trace.puts("Hello ARM World!\r\n");
    defmt::info!("System clock: {=u32} Hz", SYSTEM_CLOCK_HZ);

    for i in 0..20u8 {
        uprintf!(trace, "Works great {}\r\n", i);
    }

    let mut seconds: u32 = 0;

    loop {
        led.toggle();

        seconds = seconds.wrapping_add(1);
        uprintf!(trace, "Second {}\n", seconds);

        for _ in 0..BLINK_DELAY {
            asm::nop();
        }
    }
}
