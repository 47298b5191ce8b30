#![no_std]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub use dma::{MAX_TRANSFER_LEN, TxDma};
#[cfg(feature = "defmt-logger")]
pub use logger::init_logger;
pub use poll::{PollOutcome, poll_until};
pub use transport::{DEFAULT_TIMEOUT, FrameSink, TRACE_BUFFER_SIZE, Trace, WaitOutcome};

mod dma;
#[cfg(feature = "defmt-logger")]
mod logger;
mod poll;
#[cfg(feature = "stm32f4")]
pub mod stm32f4;
mod transport;
mod truncate;

/// Error returned by one-time initialization functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum InitError {
    /// The initialization function has already been called.
    AlreadyInitialized,
}

/// Formats a message into the transport buffer and starts sending it.
///
/// Expands to [`Trace::printf`] with [`core::format_args!`].
///
/// ```ignore
/// uprintf!(trace, "Works great {}\r\n", i);
/// ```
#[macro_export]
macro_rules! uprintf {
    ($trace:expr, $($arg:tt)*) => {
        $trace.printf(::core::format_args!($($arg)*))
    };
}
