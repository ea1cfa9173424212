//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor: the
//! SysTick tick source and interrupt priority setup.
//!
//! ## Tick delivery
//!
//! The SysTick handler only counts ticks. The run loop in
//! [`crate::kernel::run`] collects the count with [`take_pending_ticks`]
//! and applies it to the scheduler from thread mode, so no scheduler state
//! is ever touched from interrupt context.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)

use core::cell::Cell;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_rt::exception;
use critical_section::Mutex;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::sync;

/// Ticks counted by SysTick and not yet applied to the scheduler.
static PENDING_TICKS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at `TICK_HZ` frequency using the processor
/// clock.
///
/// # Parameters
/// - `syst`: Mutable reference to the SysTick peripheral
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// Tick accounting
// ---------------------------------------------------------------------------

/// Return and clear the number of ticks since the last call.
pub fn take_pending_ticks() -> u32 {
    sync::critical_section(|cs| PENDING_TICKS.borrow(cs).replace(0))
}

/// Sleep until the next interrupt.
///
/// A tick that lands between the caller's last check and the `wfi` is
/// still counted; it is picked up one tick late.
#[inline]
pub fn wait_for_tick() {
    cortex_m::asm::wfi();
}

/// SysTick exception handler, called at `TICK_HZ`.
#[exception]
fn SysTick() {
    sync::critical_section(|cs| {
        let pending = PENDING_TICKS.borrow(cs);
        pending.set(pending.get().wrapping_add(1));
    });
}
