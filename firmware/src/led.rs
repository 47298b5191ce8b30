//! User LED LD2 on PA5, active high.

use core::ptr::{with_exposed_provenance, with_exposed_provenance_mut};

const RCC_AHB1ENR: usize = 0x4002_3830;
const RCC_AHB1ENR_GPIOAEN: u32 = 1 << 0;

const GPIOA_BASE: usize = 0x4002_0000;
const GPIO_MODER: usize = GPIOA_BASE;
const GPIO_OTYPER: usize = GPIOA_BASE + 0x04;
const GPIO_OSPEEDR: usize = GPIOA_BASE + 0x08;
const GPIO_PUPDR: usize = GPIOA_BASE + 0x0C;
const GPIO_ODR: usize = GPIOA_BASE + 0x14;

const PIN: u32 = 5;

fn read(addr: usize) -> u32 {
    // SAFETY: RCC and GPIOA registers exist on the STM32F401.
    unsafe { with_exposed_provenance::<u32>(addr).read_volatile() }
}

fn modify(addr: usize, f: impl FnOnce(u32) -> u32) {
    let value = f(read(addr));
    // SAFETY: As above, and only this module touches pin 5.
    unsafe { with_exposed_provenance_mut::<u32>(addr).write_volatile(value) }
}

fn set_field(addr: usize, width: u32, value: u32) {
    let shift = PIN * width;
    let mask = ((1 << width) - 1) << shift;
    modify(addr, |r| (r & !mask) | (value << shift));
}

pub struct Led {
    _private: (),
}

impl Led {
    /// Push-pull output, high speed, no pull.
    pub fn init() -> Self {
        modify(RCC_AHB1ENR, |r| r | RCC_AHB1ENR_GPIOAEN);
        // Dummy read, the clock needs two cycles before the port responds.
        let _ = read(RCC_AHB1ENR);

        set_field(GPIO_OTYPER, 1, 0);
        set_field(GPIO_OSPEEDR, 2, 0b10);
        set_field(GPIO_PUPDR, 2, 0b00);
        set_field(GPIO_MODER, 2, 0b01);

        Led { _private: () }
    }

    pub fn toggle(&mut self) {
        modify(GPIO_ODR, |r| r ^ (1 << PIN));
    }
}
