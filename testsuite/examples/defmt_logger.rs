//! @test-mode: defmt
//!
//! defmt records travel over the transport, split across several transfers when
//! a record is larger than the buffer.

#![no_std]
#![no_main]

use cortex_m::singleton;
use panic_semihosting as _;
use testsuite::{QemuDma, entry, exit_success};
use uart_trace::{InitError, Trace};

#[entry]
fn main() -> ! {
    let buffer = singleton!(: [u8; 16] = [0; 16]).unwrap();
    let trace = singleton!(: Trace<QemuDma, 16> = Trace::new(QemuDma::new(), buffer)).unwrap();
    uart_trace::init_logger(trace).unwrap();

    defmt::info!("Hello from uart-trace!");
    defmt::warn!("Second {=u32}", 7);
    defmt::error!("sent in pieces: {=str}", "a string argument travels inside the frame");

    let spare = singleton!(: [u8; 16] = [0; 16]).unwrap();
    let other = singleton!(: Trace<QemuDma, 16> = Trace::new(QemuDma::new(), spare)).unwrap();
    let rejected = uart_trace::init_logger(other) == Err(InitError::AlreadyInitialized);
    defmt::info!("second logger rejected: {=bool}", rejected);

    exit_success();
}
