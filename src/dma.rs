/// Largest transfer the 16-bit DMA item counter can describe.
pub const MAX_TRANSFER_LEN: usize = u16::MAX as usize;

/// Access to one memory-to-peripheral DMA channel feeding a UART transmitter.
///
/// This is the complete hardware surface the transport needs. Implementations
/// write the channel registers directly; test code substitutes a software model.
pub trait TxDma {
    /// Program the source address and item count, then enable the channel.
    ///
    /// Returns as soon as the channel is enabled.
    ///
    /// # Safety
    ///
    /// `source` must be valid for reads of `len` bytes until the hardware has
    /// finished the transfer, and must not be written to in the meantime.
    unsafe fn start_transfer(&mut self, source: *const u8, len: u16);

    /// Is the transfer-complete flag set?
    fn is_transfer_complete(&self) -> bool;

    /// Clear the transfer-complete flag.
    fn clear_transfer_complete(&mut self);
}

impl<T: TxDma + ?Sized> TxDma for &mut T {
    #[inline]
    unsafe fn start_transfer(&mut self, source: *const u8, len: u16) {
        // SAFETY: Forwarded, the caller upholds the contract.
        unsafe { (**self).start_transfer(source, len) }
    }

    #[inline]
    fn is_transfer_complete(&self) -> bool {
        (**self).is_transfer_complete()
    }

    #[inline]
    fn clear_transfer_complete(&mut self) {
        (**self).clear_transfer_complete()
    }
}
