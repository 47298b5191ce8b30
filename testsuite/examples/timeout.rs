//! A completion flag that never rises costs exactly the poll budget.

#![no_std]
#![no_main]

use cortex_m::singleton;
use panic_semihosting as _;
use testsuite::{QemuDma, entry, exit_success};
use uart_trace::{TRACE_BUFFER_SIZE, Trace, uprintf};

#[entry]
fn main() -> ! {
    let buffer = singleton!(: [u8; TRACE_BUFFER_SIZE] = [0; TRACE_BUFFER_SIZE]).unwrap();
    let mut trace = Trace::new(QemuDma::stuck(), buffer).with_timeout(1000);

    trace.puts("first\n");
    let before = trace.dma().polls();
    trace.puts("second\n");
    let spent = trace.dma().polls() - before;
    let outcome = trace.wait_for_buffer_empty();
    uprintf!(trace, "polls: {} then {} gate: {:?}\n", before, spent, outcome);

    let buffer = singleton!(: [u8; 32] = [0; 32]).unwrap();
    let mut trace = Trace::new(QemuDma::new(), buffer).with_timeout(1000);
    let first = trace.wait_for_buffer_empty();
    trace.puts("ok\n");
    let second = trace.wait_for_buffer_empty();
    uprintf!(trace, "gate: {:?} then {:?}\n", first, second);

    exit_success();
}
