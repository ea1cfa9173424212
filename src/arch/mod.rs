//! # Architecture Abstraction Layer
//!
//! Hardware boundary of the crate: the Cortex-M4 tick source and the
//! STM32F4 pin and UART used by the firmware. Only built for bare-metal
//! ARM targets; hosted builds simulate time instead.

pub mod cortex_m4;
pub mod stm32f4;
