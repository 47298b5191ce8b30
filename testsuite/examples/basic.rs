//! Each trace operation puts exactly its own bytes on the wire.

#![no_std]
#![no_main]

use cortex_m::singleton;
use cortex_m_semihosting::hprintln;
use panic_semihosting as _;
use testsuite::{QemuDma, entry, exit_failure, exit_success};
use uart_trace::{TRACE_BUFFER_SIZE, Trace, uprintf};

#[entry]
fn main() -> ! {
    let buffer = singleton!(: [u8; TRACE_BUFFER_SIZE] = [0; TRACE_BUFFER_SIZE]).unwrap();
    let mut trace = Trace::new(QemuDma::new(), buffer);

    trace.puts("Hello ARM World!");
    trace.puts("\n");
    uprintf!(trace, "Second {}\n", 7);
    trace.puts_cstr(c"from a C string\n");
    trace.write(b"raw write\n");

    let transfers = trace.dma().transfers();
    hprintln!("{} transfers", transfers);
    if transfers != 5 {
        exit_failure();
    }
    exit_success();
}
