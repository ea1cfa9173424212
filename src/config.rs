//! # Configuration
//!
//! Compile-time constants governing the scheduler, the three application
//! tasks and the serial log channel. All limits are fixed at compile time,
//! there is no dynamic allocation.
//!
//! Durations are expressed in scheduler ticks. At `TICK_HZ = 1000` one tick
//! is one millisecond.

use crate::sync::TokenSemantics;

/// Maximum number of tasks the scheduler table can hold.
pub const MAX_TASKS: usize = 8;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 reset default, 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

// ---------------------------------------------------------------------------
// Task priorities (higher = scheduled preferentially)
// ---------------------------------------------------------------------------

/// Task A, drives the line high.
pub const DRIVE_HIGH_PRIORITY: u8 = 1;

/// Task B, drives the line low.
pub const DRIVE_LOW_PRIORITY: u8 = 2;

/// Task C, periodic status line.
pub const STATUS_PRIORITY: u8 = 3;

// ---------------------------------------------------------------------------
// Task timing
// ---------------------------------------------------------------------------

/// How long Task A and Task B wait for the token before giving up.
pub const TOKEN_WAIT_TICKS: u32 = 100;

/// How long Task A holds the token with the line high.
pub const DRIVE_HIGH_HOLD_TICKS: u32 = 500;

/// How long Task B holds the token with the line low.
pub const DRIVE_LOW_HOLD_TICKS: u32 = 1000;

/// Pause after every acquisition attempt, successful or not.
pub const COOLDOWN_TICKS: u32 = 100;

/// Period of the status report.
pub const STATUS_PERIOD_TICKS: u32 = 1000;

/// How the token treats the surplus release performed at boot.
///
/// `Binary` caps the token at one credit, so the surplus release is
/// refused. `Counting` accepts it, leaving two credits and letting both
/// drive tasks hold the token on their first pass.
pub const TOKEN_SEMANTICS: TokenSemantics = TokenSemantics::Binary;

// ---------------------------------------------------------------------------
// Serial log channel
// ---------------------------------------------------------------------------

/// Log channel baud rate.
pub const UART_BAUD: u32 = 9600;

/// Receive buffer size in bytes. The UART driver has no transmit buffer,
/// its writes block until the byte is accepted by the transmitter.
pub const UART_RX_BUFFER_SIZE: usize = 2048;

/// Bytes of formatted log output waiting for the UART. Lines that do not
/// fit are dropped whole.
pub const LOG_QUEUE_SIZE: usize = 1024;

/// Longest log line, in bytes. Longer lines are cut short.
pub const LOG_LINE_CAPACITY: usize = 128;
