#![no_std]

pub mod uart;

use core::cell::Cell;
use cortex_m_semihosting::debug::{self, EXIT_FAILURE, EXIT_SUCCESS};
use uart_trace::TxDma;

pub use cortex_m_rt::entry;

pub fn exit_success() -> ! {
    debug::exit(EXIT_SUCCESS);
    #[allow(clippy::empty_loop)]
    loop {}
}

pub fn exit_failure() -> ! {
    debug::exit(EXIT_FAILURE);
    #[allow(clippy::empty_loop)]
    loop {}
}

/// Stand-in for a memory-to-UART DMA channel.
///
/// The LM3S6965 model has no DMA engine wired to its UARTs, so a "transfer" copies
/// the bytes to UART0 synchronously and then raises the completion flag, the way
/// the hardware would once the last byte left memory.
pub struct QemuDma {
    complete: bool,
    /// Never raise the completion flag.
    stuck: bool,
    polls: Cell<u32>,
    transfers: u32,
}

impl QemuDma {
    pub const fn new() -> Self {
        QemuDma {
            complete: false,
            stuck: false,
            polls: Cell::new(0),
            transfers: 0,
        }
    }

    /// A channel whose transfer-complete flag never rises.
    pub const fn stuck() -> Self {
        QemuDma {
            stuck: true,
            ..Self::new()
        }
    }

    /// Number of times the completion flag has been read.
    pub fn polls(&self) -> u32 {
        self.polls.get()
    }

    /// Number of transfers started.
    pub fn transfers(&self) -> u32 {
        self.transfers
    }
}

impl Default for QemuDma {
    fn default() -> Self {
        Self::new()
    }
}

impl TxDma for QemuDma {
    unsafe fn start_transfer(&mut self, source: *const u8, len: u16) {
        // SAFETY: The caller guarantees `source` is valid for `len` bytes.
        let bytes = unsafe { core::slice::from_raw_parts(source, usize::from(len)) };
        uart::write_bytes(bytes);
        self.transfers += 1;
        self.complete = !self.stuck;
    }

    fn is_transfer_complete(&self) -> bool {
        self.polls.set(self.polls.get() + 1);
        self.complete
    }

    fn clear_transfer_complete(&mut self) {
        self.complete = false;
    }
}
