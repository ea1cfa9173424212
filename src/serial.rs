//! # Serial Log Channel
//!
//! Line-oriented output over a UART plus a polled receive buffer, and the
//! `log` backend that renders records onto it.
//!
//! The UART driver has no transmit buffer: [`SerialChannel::write_line`]
//! hands every byte to the port, which blocks until the byte is accepted.
//! The logger never goes through that path from a task. It formats each
//! record into a fixed queue and [`SerialLogger::pump`] feeds the queue to
//! the port from the run loop, one byte whenever the transmitter is free,
//! so a task step never waits on the wire.
//!
//! Received bytes are drained into a fixed `heapless::Deque` from the run
//! loop; when it is full new bytes are counted and dropped.

use core::cell::RefCell;
use core::fmt::{self, Write};

use ::critical_section::Mutex;
use heapless::{Deque, String};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::config::{LOG_LINE_CAPACITY, LOG_QUEUE_SIZE, UART_BAUD, UART_RX_BUFFER_SIZE};
use crate::sync::critical_section;

// ---------------------------------------------------------------------------
// Line parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    RtsCts,
}

/// UART framing and speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl SerialConfig {
    /// The log channel: 9600 8N1, no flow control.
    pub const LOG_CHANNEL: Self = Self {
        baud: UART_BAUD,
        data_bits: 8,
        parity: Parity::None,
        stop_bits: StopBits::One,
        flow_control: FlowControl::None,
    };

    /// Baud rate register value for 16x oversampling from a peripheral
    /// clock of `pclk_hz`, rounded to nearest.
    pub const fn baud_divisor(&self, pclk_hz: u32) -> u32 {
        (pclk_hz + self.baud / 2) / self.baud
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Byte-level access to a UART.
pub trait SerialPort {
    /// Send one byte, blocking until the transmitter accepted it.
    fn write_byte(&mut self, byte: u8);

    /// A received byte, if one is waiting.
    fn read_byte(&mut self) -> Option<u8>;

    /// Whether `write_byte` would return without waiting.
    fn tx_ready(&mut self) -> bool {
        true
    }

    /// Block until everything written has left the port.
    fn flush(&mut self) {}
}

/// A UART with the receive buffer the log channel is configured with.
pub struct SerialChannel<P> {
    port: P,
    rx: Deque<u8, UART_RX_BUFFER_SIZE>,
    rx_dropped: u32,
}

impl<P: SerialPort> SerialChannel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            rx: Deque::new(),
            rx_dropped: 0,
        }
    }

    /// Write one line, terminated with CRLF.
    pub fn write_line(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        self.write_fmt(args)?;
        self.write_str("\n")
    }

    /// Move received bytes from the port into the receive buffer.
    ///
    /// Returns the number of bytes read from the port, dropped ones
    /// included.
    pub fn poll_rx(&mut self) -> usize {
        let mut read = 0;
        while let Some(byte) = self.port.read_byte() {
            read += 1;
            if self.rx.push_back(byte).is_err() {
                self.rx_dropped = self.rx_dropped.wrapping_add(1);
            }
        }
        read
    }

    /// Oldest buffered byte.
    pub fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// Bytes lost because the receive buffer was full.
    pub fn rx_dropped(&self) -> u32 {
        self.rx_dropped
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

impl<P: SerialPort> Write for SerialChannel<P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.port.write_byte(b'\r');
            }
            self.port.write_byte(byte);
        }
        self.port.flush();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Parse the `LOG` build-time setting. Unknown or missing values give
/// `Info`.
pub fn level_from_env(value: Option<&str>) -> LevelFilter {
    match value {
        Some("OFF") => LevelFilter::Off,
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Formatted log output waiting for the UART.
struct LogQueue {
    bytes: Deque<u8, LOG_QUEUE_SIZE>,
    dropped_lines: u32,
}

impl LogQueue {
    const fn new() -> Self {
        Self {
            bytes: Deque::new(),
            dropped_lines: 0,
        }
    }

    /// Append `line` with CRLF line endings, or drop it whole if it does
    /// not fit.
    fn push_line(&mut self, line: &str) -> bool {
        let needed = line.len() + line.bytes().filter(|&b| b == b'\n').count() + 2;
        if self.bytes.capacity() - self.bytes.len() < needed {
            self.dropped_lines = self.dropped_lines.wrapping_add(1);
            return false;
        }
        // Room was checked above.
        for byte in line.bytes() {
            if byte == b'\n' {
                let _ = self.bytes.push_back(b'\r');
            }
            let _ = self.bytes.push_back(byte);
        }
        let _ = self.bytes.push_back(b'\r');
        let _ = self.bytes.push_back(b'\n');
        true
    }
}

/// `log` backend that writes `[LEVEL target] message` lines to a serial
/// channel.
///
/// Logging only formats and queues the line. The bytes reach the port when
/// the run loop calls [`SerialLogger::pump`], or on [`Log::flush`].
///
/// The channel is moved out of its cell while it is being used instead of
/// holding a critical section, so a pump that finds it busy does nothing.
pub struct SerialLogger<P> {
    channel: Mutex<RefCell<Option<SerialChannel<P>>>>,
    queue: Mutex<RefCell<LogQueue>>,
    level: LevelFilter,
}

impl<P: SerialPort> SerialLogger<P> {
    pub const fn new(level: LevelFilter) -> Self {
        Self {
            channel: Mutex::new(RefCell::new(None)),
            queue: Mutex::new(RefCell::new(LogQueue::new())),
            level,
        }
    }

    /// Hand the channel to the logger. Returns the previous one, if any.
    pub fn attach(&self, channel: SerialChannel<P>) -> Option<SerialChannel<P>> {
        critical_section(|cs| self.channel.borrow_ref_mut(cs).replace(channel))
    }

    /// Run `f` on the channel, if one is attached and not busy.
    pub fn with_channel<R>(&self, f: impl FnOnce(&mut SerialChannel<P>) -> R) -> Option<R> {
        let mut channel = critical_section(|cs| self.channel.borrow_ref_mut(cs).take())?;
        let result = f(&mut channel);
        critical_section(|cs| *self.channel.borrow_ref_mut(cs) = Some(channel));
        Some(result)
    }

    /// Send queued bytes for as long as the transmitter takes them without
    /// waiting. Returns the number of bytes sent.
    pub fn pump(&self) -> usize {
        self.with_channel(|channel| {
            let mut sent = 0;
            while channel.port.tx_ready() {
                match self.pop_byte() {
                    Some(byte) => channel.port.write_byte(byte),
                    None => break,
                }
                sent += 1;
            }
            sent
        })
        .unwrap_or(0)
    }

    /// Bytes waiting to be sent.
    pub fn queued(&self) -> usize {
        critical_section(|cs| self.queue.borrow_ref(cs).bytes.len())
    }

    /// Lines lost because the queue was full.
    pub fn dropped_lines(&self) -> u32 {
        critical_section(|cs| self.queue.borrow_ref(cs).dropped_lines)
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    fn pop_byte(&self) -> Option<u8> {
        critical_section(|cs| self.queue.borrow_ref_mut(cs).bytes.pop_front())
    }
}

impl<P: SerialPort + Send> Log for SerialLogger<P> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line: String<LOG_LINE_CAPACITY> = String::new();
        // An overlong record is cut short.
        let _ = write!(
            line,
            "[{:>5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
        critical_section(|cs| self.queue.borrow_ref_mut(cs).push_line(&line));
    }

    /// Send everything queued, waiting on the transmitter as needed.
    fn flush(&self) {
        self.with_channel(|channel| {
            while let Some(byte) = self.pop_byte() {
                channel.port.write_byte(byte);
            }
            channel.port.flush();
        });
    }
}

/// Install `logger` as the global logger.
///
/// `max_level` filters at the call site, before the logger's own level.
pub fn init<P: SerialPort + Send>(
    logger: &'static SerialLogger<P>,
    max_level: LevelFilter,
) -> Result<(), SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(max_level);
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
