use crate::InitError;
use crate::transport::FrameSink;
use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering, compiler_fence},
};
use critical_section::RestoreState;
use defmt::Encoder;

#[defmt::global_logger]
struct Logger;

struct LoggerState {
    sink: UnsafeCell<MaybeUninit<&'static mut dyn FrameSink>>,
    cs_state: UnsafeCell<RestoreState>,
    encoder: UnsafeCell<Encoder>,
    initialized: AtomicBool,
    /// Records in progress. Only the outermost one (depth 1) reaches the sink.
    depth: AtomicUsize,
}

impl LoggerState {
    /// # Safety
    ///
    /// Must be called from within a critical section to prevent aliasing of `sink`.
    #[inline]
    unsafe fn with_sink(&self, f: impl FnOnce(&mut (dyn FrameSink + 'static))) {
        // Acquire: synchronizes with the Release store in `init_logger`, ensuring we see
        // the fully initialized `sink`.
        if self.initialized.load(Ordering::Acquire) {
            // SAFETY: The Acquire load ensures `sink` is initialized. The critical section
            // (upheld by caller) ensures exclusive access, so creating `&mut` is safe.
            let sink = unsafe { (*self.sink.get()).assume_init_mut() };
            f(&mut **sink);
        }
    }
}

// SAFETY: `sink` is published once through `initialized` (Release/Acquire) and is
// otherwise, like `cs_state` and `encoder`, only accessed inside the critical section.
unsafe impl Sync for LoggerState {}

static LOGGER_STATE: LoggerState = LoggerState {
    sink: UnsafeCell::new(MaybeUninit::uninit()),
    cs_state: UnsafeCell::new(RestoreState::invalid()),
    encoder: UnsafeCell::new(Encoder::new()),
    initialized: AtomicBool::new(false),
    depth: AtomicUsize::new(0),
};

/// Route `defmt` output through `sink`, usually a [`Trace`](crate::Trace).
///
/// Each log record becomes one frame: the sink's gate is passed when the record
/// starts and the encoded bytes are handed to the DMA channel when it ends.
/// Records logged before this call are dropped.
///
/// # Errors
///
/// Returns [`InitError::AlreadyInitialized`] if called more than once.
pub fn init_logger(sink: &'static mut dyn FrameSink) -> Result<(), InitError> {
    static CLAIMED: AtomicBool = AtomicBool::new(false);

    if CLAIMED.swap(true, Ordering::SeqCst) {
        return Err(InitError::AlreadyInitialized);
    }

    // SAFETY: The atomic swap above guarantees this runs once, and the logger does not
    // read `sink` before `initialized` is set below.
    unsafe { LOGGER_STATE.sink.get().write(MaybeUninit::new(sink)) };
    // Release: ensures the write to `sink` is visible before `initialized` becomes true.
    LOGGER_STATE.initialized.store(true, Ordering::Release);

    Ok(())
}

// SAFETY: `acquire` takes a critical section that `release` gives back, and the sink
// and encoder are only touched in between. A record started while another is being
// written (fault or panic mid-log) bumps `depth` and is dropped.
unsafe impl defmt::Logger for Logger {
    fn acquire() {
        let was_depth = LOGGER_STATE.depth.fetch_add(1, Ordering::Acquire);
        if was_depth > 0 {
            return;
        }

        // SAFETY: Balanced by `release()`, defmt guarantees paired acquire/release calls.
        let restore = unsafe { critical_section::acquire() };

        compiler_fence(Ordering::SeqCst);

        // SAFETY: We're in a critical section, so exclusive access to `cs_state` is guaranteed.
        unsafe { LOGGER_STATE.cs_state.get().write(restore) };

        compiler_fence(Ordering::SeqCst);

        // SAFETY: We're in a critical section, exclusive access to `sink` and `encoder`.
        unsafe {
            LOGGER_STATE.with_sink(|sink| {
                sink.begin_frame();
                (*LOGGER_STATE.encoder.get()).start_frame(|b| sink.extend_frame(b));
            })
        };
    }

    unsafe fn flush() {
        // Frames go out in `release`, there is nothing buffered between records.
    }

    unsafe fn release() {
        let was_depth = LOGGER_STATE.depth.fetch_sub(1, Ordering::Release);
        if was_depth != 1 {
            return;
        }

        // SAFETY: Still inside the critical section from `acquire()`.
        unsafe {
            LOGGER_STATE.with_sink(|sink| {
                (*LOGGER_STATE.encoder.get()).end_frame(|b| sink.extend_frame(b));
                sink.end_frame();
            })
        };

        compiler_fence(Ordering::SeqCst);

        // SAFETY: We read the restore state that was saved in `acquire()` and release
        // the critical section. The critical section guarantees exclusive access to `cs_state`.
        unsafe { critical_section::release(LOGGER_STATE.cs_state.get().read()) };

        compiler_fence(Ordering::SeqCst);
    }

    unsafe fn write(bytes: &[u8]) {
        // Skip if reentrant (depth != 1). The reentrant log is silently dropped.
        if LOGGER_STATE.depth.load(Ordering::Relaxed) != 1 {
            return;
        }

        // SAFETY: defmt calls this between acquire() and release(), inside the critical
        // section.
        unsafe {
            LOGGER_STATE.with_sink(|sink| {
                (*LOGGER_STATE.encoder.get()).write(bytes, |b| sink.extend_frame(b));
            })
        };
    }
}
