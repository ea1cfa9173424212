//! # STM32F4 Board Port
//!
//! Register-level setup of the two peripherals the firmware uses, both on
//! the reset clock (16 MHz HSI, APB1 undivided):
//!
//! - **LED**: PD12, push-pull output, no pulls, no interrupt
//! - **Log UART**: USART2 on PA2 (TX) / PA3 (RX), AF7, 9600 8N1, polled
//!
//! Registers are written directly; there is no PAC in the dependency set.

use core::ptr;

use crate::config::SYSTEM_CLOCK_HZ;
use crate::line::{Level, OutputLine};
use crate::serial::{FlowControl, Parity, SerialConfig, SerialPort, StopBits};

// ---------------------------------------------------------------------------
// Register map
// ---------------------------------------------------------------------------

const RCC: usize = 0x4002_3800;
const RCC_AHB1ENR: usize = RCC + 0x30;
const RCC_APB1ENR: usize = RCC + 0x40;

const GPIOA: usize = 0x4002_0000;
const GPIOD: usize = 0x4002_0C00;
const GPIO_MODER: usize = 0x00;
const GPIO_OTYPER: usize = 0x04;
const GPIO_PUPDR: usize = 0x0C;
const GPIO_BSRR: usize = 0x18;
const GPIO_AFRL: usize = 0x20;

const USART2: usize = 0x4000_4400;
const USART_SR: usize = USART2;
const USART_DR: usize = USART2 + 0x04;
const USART_BRR: usize = USART2 + 0x08;
const USART_CR1: usize = USART2 + 0x0C;
const USART_CR2: usize = USART2 + 0x10;
const USART_CR3: usize = USART2 + 0x14;

const SR_RXNE: u32 = 1 << 5;
const SR_TC: u32 = 1 << 6;
const SR_TXE: u32 = 1 << 7;

const LED_PIN: u32 = 12;

#[inline]
fn read(addr: usize) -> u32 {
    unsafe { ptr::read_volatile(addr as *const u32) }
}

#[inline]
fn write(addr: usize, value: u32) {
    unsafe { ptr::write_volatile(addr as *mut u32, value) }
}

#[inline]
fn modify(addr: usize, clear: u32, set: u32) {
    write(addr, (read(addr) & !clear) | set);
}

// ---------------------------------------------------------------------------
// LED
// ---------------------------------------------------------------------------

/// The output line, PD12.
#[derive(Debug)]
pub struct Led(());

impl OutputLine for Led {
    fn set_level(&self, level: Level) {
        // BSRR: low half sets, high half resets. Single write, no RMW.
        let bit = match level {
            Level::High => 1 << LED_PIN,
            Level::Low => 1 << (LED_PIN + 16),
        };
        write(GPIOD + GPIO_BSRR, bit);
    }
}

fn init_led() -> Led {
    modify(RCC_AHB1ENR, 0, 1 << 3);
    let shift = LED_PIN * 2;
    modify(GPIOD + GPIO_MODER, 0b11 << shift, 0b01 << shift);
    modify(GPIOD + GPIO_OTYPER, 1 << LED_PIN, 0);
    modify(GPIOD + GPIO_PUPDR, 0b11 << shift, 0);
    Led(())
}

// ---------------------------------------------------------------------------
// USART2
// ---------------------------------------------------------------------------

/// The log UART. Transmit blocks on TXE, receive is polled on RXNE.
/// The logger checks TXE first and never blocks.
#[derive(Debug)]
pub struct Usart2(());

impl SerialPort for Usart2 {
    fn write_byte(&mut self, byte: u8) {
        while read(USART_SR) & SR_TXE == 0 {}
        write(USART_DR, u32::from(byte));
    }

    fn read_byte(&mut self) -> Option<u8> {
        if read(USART_SR) & SR_RXNE == 0 {
            return None;
        }
        Some(read(USART_DR) as u8)
    }

    fn tx_ready(&mut self) -> bool {
        read(USART_SR) & SR_TXE != 0
    }

    fn flush(&mut self) {
        while read(USART_SR) & SR_TC == 0 {}
    }
}

fn init_usart2(config: &SerialConfig) -> Usart2 {
    modify(RCC_AHB1ENR, 0, 1 << 0);
    modify(RCC_APB1ENR, 0, 1 << 17);

    // PA2/PA3 alternate function 7.
    modify(GPIOA + GPIO_MODER, 0b1111 << 4, 0b1010 << 4);
    modify(GPIOA + GPIO_AFRL, 0xFF << 8, 0x77 << 8);

    write(USART_BRR, config.baud_divisor(SYSTEM_CLOCK_HZ));

    let stop = match config.stop_bits {
        StopBits::One => 0b00,
        StopBits::Two => 0b10,
    };
    modify(USART_CR2, 0b11 << 12, stop << 12);

    let flow = match config.flow_control {
        FlowControl::None => 0,
        FlowControl::RtsCts => (1 << 8) | (1 << 9),
    };
    modify(USART_CR3, (1 << 8) | (1 << 9), flow);

    // M=0 for 8 data bits, M=1 when a parity bit takes the ninth slot.
    let parity = match config.parity {
        Parity::None => 0,
        Parity::Even => (1 << 12) | (1 << 10),
        Parity::Odd => (1 << 12) | (1 << 10) | (1 << 9),
    };
    // UE | TE | RE
    write(USART_CR1, parity | (1 << 13) | (1 << 3) | (1 << 2));

    Usart2(())
}

/// Configure the output line and the log UART. Call once at boot.
pub fn init() -> (Led, Usart2) {
    (init_led(), init_usart2(&SerialConfig::LOG_CHANNEL))
}
