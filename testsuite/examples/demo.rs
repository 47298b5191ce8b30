//! Boot banner, a burst of formatted lines, then the once-per-period counter.

#![no_std]
#![no_main]

use cortex_m::{asm, singleton};
use panic_semihosting as _;
use testsuite::{QemuDma, entry, exit_success};
use uart_trace::{TRACE_BUFFER_SIZE, Trace, uprintf};

#[entry]
fn main() -> ! {
    let buffer = singleton!(: [u8; TRACE_BUFFER_SIZE] = [0; TRACE_BUFFER_SIZE]).unwrap();
    let mut trace = Trace::new(QemuDma::new(), buffer);

    trace.puts("Hello ARM World!\n");

    for i in 0..20 {
        uprintf!(trace, "Works great {}\n", i);
    }

    for seconds in 1..=3u32 {
        uprintf!(trace, "Second {}\n", seconds);
        for _ in 0..1000 {
            asm::nop();
        }
    }

    exit_success();
}
