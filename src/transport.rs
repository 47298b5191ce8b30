use crate::dma::{MAX_TRANSFER_LEN, TxDma};
use crate::poll::{PollOutcome, poll_until};
use crate::truncate::Truncating;
use core::{
    ffi::CStr,
    fmt,
    sync::atomic::{Ordering, compiler_fence},
};

/// Default capacity of the formatting buffer, in bytes.
pub const TRACE_BUFFER_SIZE: usize = 256;

/// Default number of poll iterations spent waiting for a transfer to complete.
pub const DEFAULT_TIMEOUT: u32 = 1_000_000;

/// What [`Trace::wait_for_buffer_empty`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum WaitOutcome {
    /// First wait on this transport, there was no earlier transfer to wait for.
    Skipped,
    /// The transfer-complete flag was observed.
    Completed,
    /// The poll budget ran out. The previous transfer may still be running.
    TimedOut,
}

/// Receives an encoded log frame in pieces.
///
/// A frame is opened with [`begin_frame`](FrameSink::begin_frame), filled with
/// any number of [`extend_frame`](FrameSink::extend_frame) calls and sent with
/// [`end_frame`](FrameSink::end_frame). Frames must not be interleaved with other
/// writes to the same sink.
pub trait FrameSink {
    /// Start a new frame.
    fn begin_frame(&mut self);
    /// Append bytes to the current frame.
    fn extend_frame(&mut self, bytes: &[u8]);
    /// Send whatever is left of the current frame.
    fn end_frame(&mut self);
}

/// Trace transport: one buffer, one DMA channel, at most one transfer in flight.
///
/// Every sending operation except [`write`](Trace::write) first passes the
/// completion gate ([`wait_for_buffer_empty`](Trace::wait_for_buffer_empty)) and
/// then returns as soon as the DMA channel is enabled. Nothing is reported back to
/// the caller: truncation, formatting errors and gate timeouts are all silent.
///
/// The buffer is `'static` because the DMA engine keeps reading it after the call
/// returns, possibly after the `Trace` itself has been moved.
pub struct Trace<D, const N: usize = TRACE_BUFFER_SIZE> {
    dma: D,
    buffer: &'static mut [u8; N],
    /// Has the gate been passed at least once?
    started: bool,
    /// Bytes of the current frame waiting in `buffer`.
    staged: usize,
    timeout: u32,
}

impl<D: TxDma, const N: usize> Trace<D, N> {
    /// Creates a transport over an initialized DMA channel.
    ///
    /// Uses [`DEFAULT_TIMEOUT`] as the poll budget.
    pub fn new(dma: D, buffer: &'static mut [u8; N]) -> Self {
        const { assert!(N > 0, "trace buffer must not be empty") };

        Trace {
            dma,
            buffer,
            started: false,
            staged: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the number of poll iterations the gate spends before giving up.
    pub fn with_timeout(mut self, budget: u32) -> Self {
        self.timeout = budget;
        self
    }

    /// The poll budget of the completion gate.
    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    /// The underlying DMA channel.
    pub fn dma(&self) -> &D {
        &self.dma
    }

    /// Releases the DMA channel and the buffer.
    ///
    /// A transfer started by the last call may still be reading the buffer.
    pub fn free(self) -> (D, &'static mut [u8; N]) {
        (self.dma, self.buffer)
    }

    /// Starts sending `len` bytes at `source` without passing the gate.
    ///
    /// Lengths above [`MAX_TRANSFER_LEN`] are cut to fit the DMA item counter. A
    /// zero length programs nothing.
    ///
    /// # Safety
    ///
    /// `source` must be valid for reads of `len` bytes until the transfer has
    /// finished, and must not be written to until then.
    pub unsafe fn write_raw(&mut self, source: *const u8, len: usize) {
        let len = len.min(MAX_TRANSFER_LEN) as u16;
        if len == 0 {
            return;
        }

        // Buffer contents must be in memory before the channel is enabled.
        compiler_fence(Ordering::Release);

        // SAFETY: Upheld by the caller.
        unsafe { self.dma.start_transfer(source, len) };
    }

    /// Starts sending `bytes` without passing the gate.
    ///
    /// If a transfer is still running, the new one may be lost or may overlap it.
    /// Use [`puts`](Trace::puts) to wait for the running transfer first.
    pub fn write(&mut self, bytes: &'static [u8]) {
        // SAFETY: `bytes` lives forever and a shared `[u8]` is never written to.
        unsafe { self.write_raw(bytes.as_ptr(), bytes.len()) }
    }

    /// Waits for the previous transfer, then sends `text` as-is.
    pub fn puts(&mut self, text: &'static str) {
        self.wait_for_buffer_empty();
        self.write(text.as_bytes());
    }

    /// Waits for the previous transfer, then sends `text` up to its terminator.
    pub fn puts_cstr(&mut self, text: &'static CStr) {
        self.wait_for_buffer_empty();
        self.write(text.to_bytes());
    }

    /// Waits for the previous transfer, formats `args` into the buffer and sends it.
    ///
    /// At most `N - 1` bytes are sent, the byte after the text is set to zero.
    /// Nothing is sent if the output is empty or a formatting impl fails.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) {
        self.wait_for_buffer_empty();

        let mut w = Truncating::new(&mut self.buffer[..]);
        if fmt::write(&mut w, args).is_err() {
            return;
        }
        let len = w.finish();

        if len > 0 {
            self.send_buffer(len);
        }
    }

    /// The completion gate.
    ///
    /// The first call only records that transfers have begun. Later calls poll the
    /// transfer-complete flag for at most [`timeout`](Trace::timeout) iterations
    /// and then clear it, whether it was seen or not.
    pub fn wait_for_buffer_empty(&mut self) -> WaitOutcome {
        if !self.started {
            self.started = true;
            return WaitOutcome::Skipped;
        }

        let dma = &self.dma;
        let outcome = poll_until(self.timeout, || dma.is_transfer_complete());
        self.dma.clear_transfer_complete();

        match outcome {
            PollOutcome::Ready { .. } => WaitOutcome::Completed,
            PollOutcome::TimedOut => WaitOutcome::TimedOut,
        }
    }

    fn send_buffer(&mut self, len: usize) {
        let source = self.buffer.as_ptr();
        // SAFETY: The buffer is `'static` and exclusively ours. It is not written
        // again before the next pass through the gate.
        unsafe { self.write_raw(source, len.min(N)) };
    }
}

impl<D: TxDma, const N: usize> FrameSink for Trace<D, N> {
    fn begin_frame(&mut self) {
        self.wait_for_buffer_empty();
        self.staged = 0;
    }

    fn extend_frame(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            // A full buffer is only flushed once more bytes arrive, so the last
            // chunk of a frame always goes out in `end_frame`.
            if self.staged == N {
                self.send_buffer(N);
                self.wait_for_buffer_empty();
                self.staged = 0;
            }

            let n = bytes.len().min(N - self.staged);
            let (head, tail) = bytes.split_at(n);
            self.buffer[self.staged..self.staged + n].copy_from_slice(head);
            self.staged += n;
            bytes = tail;
        }
    }

    fn end_frame(&mut self) {
        let len = core::mem::take(&mut self.staged);
        if len > 0 {
            self.send_buffer(len);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::uprintf;
    use core::cell::{Cell, RefCell};
    use std::{boxed::Box, vec, vec::Vec};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Start { addr: usize, bytes: Vec<u8> },
        Poll(bool),
        Clear,
    }

    /// Software DMA channel that records every register access.
    struct MockDma {
        events: RefCell<Vec<Event>>,
        /// Polls after a start before the flag rises. `None` never completes.
        complete_after: Option<usize>,
        /// A transfer was started and has not raised the flag yet.
        pending: Cell<bool>,
        polls: Cell<usize>,
        flag: Cell<bool>,
    }

    impl MockDma {
        fn completing_after(polls: usize) -> Self {
            MockDma {
                events: RefCell::new(Vec::new()),
                complete_after: Some(polls),
                pending: Cell::new(false),
                polls: Cell::new(0),
                flag: Cell::new(false),
            }
        }

        fn never_completing() -> Self {
            MockDma {
                complete_after: None,
                ..Self::completing_after(0)
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.borrow().clone()
        }

        fn started(&self) -> Vec<Vec<u8>> {
            self.events
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    Event::Start { bytes, .. } => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        }

        fn poll_count(&self) -> usize {
            self.events
                .borrow()
                .iter()
                .filter(|e| matches!(e, Event::Poll(_)))
                .count()
        }
    }

    impl TxDma for MockDma {
        unsafe fn start_transfer(&mut self, source: *const u8, len: u16) {
            // SAFETY: The transport guarantees `source` is valid for `len` bytes.
            let bytes = unsafe { core::slice::from_raw_parts(source, len as usize) }.to_vec();
            self.events.borrow_mut().push(Event::Start {
                addr: source as usize,
                bytes,
            });
            self.pending.set(true);
            self.polls.set(0);
        }

        fn is_transfer_complete(&self) -> bool {
            if let Some(after) = self.complete_after {
                if self.pending.get() && self.polls.get() >= after {
                    self.pending.set(false);
                    self.flag.set(true);
                }
            }
            self.polls.set(self.polls.get() + 1);
            let flag = self.flag.get();
            self.events.borrow_mut().push(Event::Poll(flag));
            flag
        }

        fn clear_transfer_complete(&mut self) {
            self.flag.set(false);
            self.events.borrow_mut().push(Event::Clear);
        }
    }

    fn buffer<const N: usize>() -> &'static mut [u8; N] {
        Box::leak(Box::new([0xaa; N]))
    }

    #[test]
    fn first_call_skips_gate() {
        let mut trace: Trace<_> = Trace::new(MockDma::never_completing(), buffer());
        uprintf!(trace, "Second {}\n", 7);

        let events = trace.dma().events();
        assert_eq!(events.len(), 1);
        assert_eq!(trace.dma().started(), vec![b"Second 7\n".to_vec()]);
    }

    #[test]
    fn printf_sends_from_owned_buffer() {
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        uprintf!(trace, "Works great {}\r\n", 3);

        let addr = match &trace.dma().events()[0] {
            Event::Start { addr, .. } => *addr,
            e => panic!("unexpected event {e:?}"),
        };
        let (_, buf) = trace.free();
        assert_eq!(addr, buf.as_ptr() as usize);
        assert_eq!(&buf[..16], b"Works great 3\r\n\0");
    }

    #[test]
    fn puts_sends_text_without_terminator() {
        let text = "Hello ARM World!";
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        trace.puts(text);

        let events = trace.dma().events();
        assert_eq!(
            events,
            vec![Event::Start {
                addr: text.as_ptr() as usize,
                bytes: b"Hello ARM World!".to_vec(),
            }]
        );
        assert_eq!(trace.dma().started()[0].len(), 16);
    }

    #[test]
    fn puts_cstr_stops_at_terminator() {
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        trace.puts_cstr(c"Hello");
        assert_eq!(trace.dma().started(), vec![b"Hello".to_vec()]);
    }

    #[test]
    fn second_call_programs_after_gate() {
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(2), buffer());
        let addr = trace.buffer.as_ptr() as usize;
        uprintf!(trace, "Second {}\n", 7);
        uprintf!(trace, "Second {}\n", 10);

        assert_eq!(
            trace.dma().events(),
            vec![
                Event::Start {
                    addr,
                    bytes: b"Second 7\n".to_vec(),
                },
                Event::Poll(false),
                Event::Poll(false),
                Event::Poll(true),
                Event::Clear,
                Event::Start {
                    addr,
                    bytes: b"Second 10\n".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn timeout_spends_exact_budget() {
        let mut trace: Trace<_> =
            Trace::new(MockDma::never_completing(), buffer()).with_timeout(50);
        trace.puts("one");
        trace.puts("two");

        let events = trace.dma().events();
        assert_eq!(trace.dma().poll_count(), 51);
        assert_eq!(events[events.len() - 2], Event::Clear);
        assert!(matches!(events.last(), Some(Event::Start { .. })));
        assert_eq!(trace.dma().started(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn gate_reports_outcome() {
        let mut trace: Trace<_> = Trace::new(MockDma::never_completing(), buffer()).with_timeout(3);
        assert_eq!(trace.wait_for_buffer_empty(), WaitOutcome::Skipped);
        assert_eq!(trace.wait_for_buffer_empty(), WaitOutcome::TimedOut);

        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(1), buffer());
        assert_eq!(trace.wait_for_buffer_empty(), WaitOutcome::Skipped);
        trace.write(b"x");
        assert_eq!(trace.wait_for_buffer_empty(), WaitOutcome::Completed);
    }

    #[test]
    fn gate_without_transfer_times_out() {
        let mut trace: Trace<_> =
            Trace::new(MockDma::completing_after(0), buffer()).with_timeout(4);
        trace.puts("a");
        assert_eq!(trace.wait_for_buffer_empty(), WaitOutcome::Completed);
        // The completion was consumed above and nothing was started since.
        assert_eq!(trace.wait_for_buffer_empty(), WaitOutcome::TimedOut);
        assert_eq!(trace.dma().poll_count(), 1 + 5);
    }

    #[test]
    fn flag_is_cleared_after_every_wait() {
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        trace.puts("a");
        trace.puts("b");
        assert!(!trace.dma().flag.get());

        let mut trace: Trace<_> = Trace::new(MockDma::never_completing(), buffer()).with_timeout(5);
        trace.puts("a");
        trace.puts("b");
        assert!(!trace.dma().flag.get());
        assert_eq!(trace.dma().events().iter().filter(|e| **e == Event::Clear).count(), 1);
    }

    #[test]
    fn printf_up_to_capacity_minus_one_is_sent_whole() {
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        uprintf!(trace, "{:->255}", "");

        let sent = trace.dma().started();
        assert_eq!(sent[0].len(), 255);
        assert!(sent[0].iter().all(|&b| b == b'-'));
    }

    #[test]
    fn printf_truncates_to_capacity_minus_one() {
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        uprintf!(trace, "{:=>300}!", "");

        let sent = trace.dma().started();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), TRACE_BUFFER_SIZE - 1);
        assert!(sent[0].iter().all(|&b| b == b'='));

        let (_, buf) = trace.free();
        assert_eq!(buf[TRACE_BUFFER_SIZE - 1], 0);
    }

    #[test]
    fn empty_printf_sends_nothing() {
        let mut trace: Trace<_> =
            Trace::new(MockDma::completing_after(0), buffer()).with_timeout(10);
        uprintf!(trace, "{}", "");
        assert!(trace.dma().events().is_empty());

        // The gate was still passed, so the next call waits out its budget on a
        // transfer that was never started.
        uprintf!(trace, "x");
        assert_eq!(trace.dma().poll_count(), 11);
        assert_eq!(trace.dma().started(), vec![b"x".to_vec()]);
    }

    #[test]
    fn failing_format_sends_nothing() {
        struct Fails;
        impl fmt::Display for Fails {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("partial")?;
                Err(fmt::Error)
            }
        }

        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        uprintf!(trace, "value: {}", Fails);
        assert!(trace.dma().started().is_empty());
    }

    #[test]
    fn raw_write_does_not_wait() {
        let mut trace: Trace<_> = Trace::new(MockDma::never_completing(), buffer());
        trace.puts("first");
        trace.write(b"raw");
        assert_eq!(trace.dma().poll_count(), 0);
        assert_eq!(trace.dma().started(), vec![b"first".to_vec(), b"raw".to_vec()]);
    }

    #[test]
    fn oversized_write_is_cut_to_counter_width() {
        let big: &'static [u8] = Vec::leak(vec![b'a'; 70_000]);
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        trace.write(big);
        assert_eq!(trace.dma().started()[0].len(), MAX_TRANSFER_LEN);
    }

    #[test]
    fn empty_write_programs_nothing() {
        let mut trace: Trace<_> = Trace::new(MockDma::completing_after(0), buffer());
        trace.write(b"");
        trace.puts("");
        assert!(trace.dma().started().is_empty());
    }

    #[test]
    fn instances_are_independent() {
        let mut a: Trace<_> = Trace::new(MockDma::never_completing(), buffer());
        let mut b: Trace<_> = Trace::new(MockDma::never_completing(), buffer());
        a.puts("a");
        b.puts("b");
        assert_eq!(a.dma().poll_count(), 0);
        assert_eq!(b.dma().poll_count(), 0);
    }

    #[test]
    fn frame_larger_than_buffer_is_split() {
        let mut trace: Trace<_, 8> = Trace::new(MockDma::completing_after(0), buffer());
        trace.begin_frame();
        trace.extend_frame(b"hello");
        trace.extend_frame(b" world");
        trace.end_frame();

        assert_eq!(
            trace.dma().started(),
            vec![b"hello wo".to_vec(), b"rld".to_vec()]
        );
        // The second chunk was only programmed after the gate saw the first complete.
        let events = trace.dma().events();
        assert_eq!(events[1], Event::Poll(true));
        assert_eq!(events[2], Event::Clear);
    }

    #[test]
    fn frame_filling_buffer_exactly_sends_once() {
        let mut trace: Trace<_, 8> = Trace::new(MockDma::completing_after(0), buffer());
        trace.begin_frame();
        trace.extend_frame(b"12345678");
        trace.end_frame();

        assert_eq!(trace.dma().started(), vec![b"12345678".to_vec()]);
    }

    #[test]
    fn frame_of_whole_buffers_leaves_transfer_for_next_gate() {
        let mut trace: Trace<_, 8> =
            Trace::new(MockDma::completing_after(0), buffer()).with_timeout(1000);
        trace.begin_frame();
        trace.extend_frame(b"12345678");
        trace.extend_frame(b"abcdefgh");
        trace.end_frame();
        assert_eq!(
            trace.dma().started(),
            vec![b"12345678".to_vec(), b"abcdefgh".to_vec()]
        );
        let polls = trace.dma().poll_count();

        trace.begin_frame();
        assert_eq!(trace.dma().poll_count(), polls + 1);
        assert_eq!(trace.dma().events().last(), Some(&Event::Clear));
        trace.extend_frame(b"next");
        trace.end_frame();
        assert_eq!(trace.dma().started().last(), Some(&b"next".to_vec()));
    }

    #[test]
    fn consecutive_frames_pass_gate() {
        let mut trace: Trace<_, 16> = Trace::new(MockDma::completing_after(0), buffer());
        for frame in [&b"one"[..], b"two"] {
            trace.begin_frame();
            trace.extend_frame(frame);
            trace.end_frame();
        }

        assert_eq!(trace.dma().started(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(trace.dma().poll_count(), 1);
    }

    #[test]
    fn works_through_mutable_reference() {
        let mut dma = MockDma::completing_after(0);
        let mut trace: Trace<_> = Trace::new(&mut dma, buffer());
        trace.puts("by ref");
        drop(trace);
        assert_eq!(dma.started(), vec![b"by ref".to_vec()]);
    }
}
