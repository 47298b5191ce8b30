//! USART2 transmit over DMA1 stream 6 on STM32F401/F411.
//!
//! Pin PA2 carries USART2_TX (alternate function 7). The UART runs 8N1 at
//! [`BAUD_RATE`], transmit only, and raises a DMA request for every byte.
//! DMA1 stream 6 on channel 4 is the only stream wired to that request.
//!
//! Register access is raw and volatile; nothing else in the program may touch
//! GPIOA pin 2, USART2 or DMA1 stream 6 after [`init`].

use crate::InitError;
use crate::dma::TxDma;
use core::ptr::{with_exposed_provenance, with_exposed_provenance_mut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Line rate in bits per second.
pub const BAUD_RATE: u32 = 115_200;

/// APB1 clock feeding USART2. The reset clock tree runs everything from the 16 MHz HSI.
pub const PCLK1_HZ: u32 = 16_000_000;

const RCC_BASE: usize = 0x4002_3800;
const RCC_AHB1ENR: usize = RCC_BASE + 0x30;
const RCC_APB1ENR: usize = RCC_BASE + 0x40;
const RCC_AHB1ENR_GPIOAEN: u32 = 1 << 0;
const RCC_AHB1ENR_DMA1EN: u32 = 1 << 21;
const RCC_APB1ENR_USART2EN: u32 = 1 << 17;

const GPIOA_BASE: usize = 0x4002_0000;
const GPIO_MODER: usize = 0x00;
const GPIO_OTYPER: usize = 0x04;
const GPIO_OSPEEDR: usize = 0x08;
const GPIO_PUPDR: usize = 0x0C;
const GPIO_AFRL: usize = 0x20;

const TX_PIN: u32 = 2;
const TX_PIN_AF: u32 = 7;

const USART2_BASE: usize = 0x4000_4400;
const USART_DR: usize = USART2_BASE + 0x04;
const USART_BRR: usize = USART2_BASE + 0x08;
const USART_CR1: usize = USART2_BASE + 0x0C;
const USART_CR2: usize = USART2_BASE + 0x10;
const USART_CR3: usize = USART2_BASE + 0x14;
const USART_CR1_UE: u32 = 1 << 13;
const USART_CR1_TE: u32 = 1 << 3;
const USART_CR3_DMAT: u32 = 1 << 7;

const DMA1_BASE: usize = 0x4002_6000;
const DMA_HISR: usize = DMA1_BASE + 0x04;
const DMA_HIFCR: usize = DMA1_BASE + 0x0C;
const STREAM: usize = 6;
const DMA_SXCR: usize = DMA1_BASE + 0x10 + 0x18 * STREAM;
const DMA_SXNDTR: usize = DMA_SXCR + 0x04;
const DMA_SXPAR: usize = DMA_SXCR + 0x08;
const DMA_SXM0AR: usize = DMA_SXCR + 0x0C;
const DMA_SXM1AR: usize = DMA_SXCR + 0x10;
const DMA_SXFCR: usize = DMA_SXCR + 0x14;
const DMA_SXCR_EN: u32 = 1 << 0;
/// FIFO control reset value: direct mode, half-full threshold.
const DMA_SXFCR_RESET: u32 = 0x21;

/// Transfer-complete flag of stream 6 in `HISR`, and its clear bit in `HIFCR`.
const TCIF6: u32 = 1 << 21;
/// Every interrupt flag of stream 6: FEIF, DMEIF, TEIF, HTIF, TCIF.
const STREAM6_FLAGS: u32 = (1 << 16) | (0b1111 << 18);

/// Transfer direction of a DMA stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Direction {
    /// Peripheral register to memory.
    PeripheralToMemory = 0b00,
    /// Memory to peripheral register.
    MemoryToPeripheral = 0b01,
    /// Memory to memory.
    MemoryToMemory = 0b10,
}

/// Width of one DMA item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum DataSize {
    /// 8 bits.
    Byte = 0b00,
    /// 16 bits.
    HalfWord = 0b01,
    /// 32 bits.
    Word = 0b10,
}

/// Arbitration priority of a DMA stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Priority {
    /// Low.
    Low = 0b00,
    /// Medium.
    Medium = 0b01,
    /// High.
    High = 0b10,
    /// Very high.
    VeryHigh = 0b11,
}

/// Static part of a DMA stream configuration, written once by [`init`].
///
/// Source address and item count are written per transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct StreamConfig {
    /// Request channel, 0 to 7.
    pub channel: u8,
    /// Transfer direction.
    pub direction: Direction,
    /// Item width on both the memory and the peripheral side.
    pub data_size: DataSize,
    /// Advance the memory address after each item.
    pub memory_increment: bool,
    /// Advance the peripheral address after each item.
    pub peripheral_increment: bool,
    /// Restart automatically when the count reaches zero.
    pub circular: bool,
    /// Arbitration priority.
    pub priority: Priority,
}

impl StreamConfig {
    /// Value of the stream's `CR` register, without the enable bit.
    pub const fn cr_bits(&self) -> u32 {
        ((self.channel as u32 & 0b111) << 25)
            | ((self.priority as u32) << 16)
            | ((self.data_size as u32) << 13)
            | ((self.data_size as u32) << 11)
            | ((self.memory_increment as u32) << 10)
            | ((self.peripheral_increment as u32) << 9)
            | ((self.circular as u32) << 8)
            | ((self.direction as u32) << 6)
    }
}

/// One-shot byte transfers from memory into the USART2 data register.
pub const USART2_TX_STREAM: StreamConfig = StreamConfig {
    channel: 4,
    direction: Direction::MemoryToPeripheral,
    data_size: DataSize::Byte,
    memory_increment: true,
    peripheral_increment: false,
    circular: false,
    priority: Priority::Medium,
};

/// `BRR` value for `baud` with 16x oversampling, rounded to nearest.
pub const fn brr(pclk_hz: u32, baud: u32) -> u32 {
    (pclk_hz + baud / 2) / baud
}

#[inline]
fn read(addr: usize) -> u32 {
    // SAFETY: Only called with addresses of memory-mapped registers on this chip.
    unsafe { with_exposed_provenance::<u32>(addr).read_volatile() }
}

#[inline]
fn write(addr: usize, value: u32) {
    // SAFETY: Only called with addresses of memory-mapped registers on this chip.
    unsafe { with_exposed_provenance_mut::<u32>(addr).write_volatile(value) }
}

#[inline]
fn modify(addr: usize, f: impl FnOnce(u32) -> u32) {
    write(addr, f(read(addr)));
}

/// Replace the `width`-bit field of pin `pin` in a GPIO configuration register.
#[inline]
fn set_pin_field(addr: usize, pin: u32, width: u32, value: u32) {
    let shift = pin * width;
    let mask = ((1 << width) - 1) << shift;
    modify(addr, |r| (r & !mask) | (value << shift));
}

/// DMA1 stream 6 feeding USART2, as configured by [`init`].
pub struct Usart2TxDma {
    _private: (),
}

impl TxDma for Usart2TxDma {
    #[inline]
    unsafe fn start_transfer(&mut self, source: *const u8, len: u16) {
        write(DMA_SXM0AR, source.expose_provenance() as u32);
        write(DMA_SXNDTR, u32::from(len));
        modify(DMA_SXCR, |r| r | DMA_SXCR_EN);
    }

    #[inline]
    fn is_transfer_complete(&self) -> bool {
        read(DMA_HISR) & TCIF6 != 0
    }

    #[inline]
    fn clear_transfer_complete(&mut self) {
        write(DMA_HIFCR, TCIF6);
    }
}

/// Configure PA2, USART2 and DMA1 stream 6 for trace output.
///
/// # Errors
///
/// Returns [`InitError::AlreadyInitialized`] if called more than once.
pub fn init() -> Result<Usart2TxDma, InitError> {
    static INITIALIZED: AtomicBool = AtomicBool::new(false);

    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(InitError::AlreadyInitialized);
    }

    configure_pins();
    configure_uart();
    configure_dma();

    Ok(Usart2TxDma { _private: () })
}

fn configure_pins() {
    modify(RCC_AHB1ENR, |r| r | RCC_AHB1ENR_GPIOAEN);
    // Dummy read, the clock needs two cycles before the peripheral responds.
    let _ = read(RCC_AHB1ENR);

    let gpioa = GPIOA_BASE;
    set_pin_field(gpioa + GPIO_AFRL, TX_PIN, 4, TX_PIN_AF);
    // Push-pull, high speed, pull-up, alternate function.
    set_pin_field(gpioa + GPIO_OTYPER, TX_PIN, 1, 0);
    set_pin_field(gpioa + GPIO_OSPEEDR, TX_PIN, 2, 0b10);
    set_pin_field(gpioa + GPIO_PUPDR, TX_PIN, 2, 0b01);
    set_pin_field(gpioa + GPIO_MODER, TX_PIN, 2, 0b10);
}

fn configure_uart() {
    modify(RCC_APB1ENR, |r| r | RCC_APB1ENR_USART2EN);
    let _ = read(RCC_APB1ENR);

    write(USART_CR1, 0);
    // One stop bit, no flow control.
    write(USART_CR2, 0);
    write(USART_BRR, brr(PCLK1_HZ, BAUD_RATE));
    write(USART_CR3, USART_CR3_DMAT);
    // 8 data bits, no parity, transmitter only.
    write(USART_CR1, USART_CR1_TE | USART_CR1_UE);
}

fn configure_dma() {
    modify(RCC_AHB1ENR, |r| r | RCC_AHB1ENR_DMA1EN);
    let _ = read(RCC_AHB1ENR);

    // Back to reset state first. The stream only accepts configuration once EN reads 0.
    modify(DMA_SXCR, |r| r & !DMA_SXCR_EN);
    while read(DMA_SXCR) & DMA_SXCR_EN != 0 {}
    write(DMA_SXCR, 0);
    write(DMA_SXNDTR, 0);
    write(DMA_SXPAR, 0);
    write(DMA_SXM0AR, 0);
    write(DMA_SXM1AR, 0);
    write(DMA_SXFCR, DMA_SXFCR_RESET);
    write(DMA_HIFCR, STREAM6_FLAGS);

    write(DMA_SXPAR, USART_DR as u32);
    write(DMA_SXNDTR, 1);
    // Direct mode, FIFO off.
    write(DMA_SXFCR, 0);
    write(DMA_SXCR, USART2_TX_STREAM.cr_bits());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usart2_tx_stream_bits() {
        // CHSEL=4, PL=medium, MINC, DIR=memory-to-peripheral.
        assert_eq!(USART2_TX_STREAM.cr_bits(), 0x0801_0440);
    }

    #[test]
    fn cr_bits_fields() {
        let config = StreamConfig {
            channel: 7,
            direction: Direction::PeripheralToMemory,
            data_size: DataSize::Word,
            memory_increment: false,
            peripheral_increment: true,
            circular: true,
            priority: Priority::VeryHigh,
        };
        assert_eq!(
            config.cr_bits(),
            (7 << 25) | (0b11 << 16) | (0b10 << 13) | (0b10 << 11) | (1 << 9) | (1 << 8)
        );
    }

    #[test]
    fn baud_divisor() {
        assert_eq!(brr(PCLK1_HZ, BAUD_RATE), 139);
        // 42 MHz APB1 with the PLL at 84 MHz.
        assert_eq!(brr(42_000_000, 115_200), 365);
    }

    #[test]
    fn stream6_register_addresses() {
        assert_eq!(DMA_SXCR, 0x4002_60A0);
        assert_eq!(DMA_SXM0AR, 0x4002_60AC);
        assert_eq!(USART_DR, 0x4000_4404);
    }
}
