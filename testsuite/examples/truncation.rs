//! Formatted output is cut to one byte less than the buffer.

#![no_std]
#![no_main]

use cortex_m::singleton;
use panic_semihosting as _;
use testsuite::{QemuDma, entry, exit_success};
use uart_trace::{TRACE_BUFFER_SIZE, Trace, uprintf};

#[entry]
fn main() -> ! {
    let buffer = singleton!(: [u8; TRACE_BUFFER_SIZE] = [0; TRACE_BUFFER_SIZE]).unwrap();
    let mut trace = Trace::new(QemuDma::new(), buffer);

    // 255 bytes fit.
    uprintf!(trace, "{:#>254}\n", "");
    // 301 bytes do not, the newline is lost.
    uprintf!(trace, "{:*>300}\n", "");
    trace.puts("\n");

    // Small buffer: 7 bytes of text.
    let small = singleton!(: [u8; 8] = [0; 8]).unwrap();
    let mut trace = Trace::new(QemuDma::new(), small);
    uprintf!(trace, "{}", "truncated here");
    trace.puts("\n");

    // Empty output sends nothing.
    uprintf!(trace, "{}", "");
    trace.puts("done\n");

    exit_success();
}
