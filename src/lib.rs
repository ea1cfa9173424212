//! # semled
//!
//! Three prioritized tasks sharing one binary semaphore to drive a single
//! LED, with status logging over a serial line. Runs on ARM Cortex-M4
//! (STM32F4) and, with a simulated clock, on the host.
//!
//! ## Overview
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | drive-high | 1 | token → line High → hold 500 ticks → release |
//! | drive-low | 2 | token → line Low → hold 1000 ticks → release |
//! | status | 3 | "Task 3: Status message" every 1000 ticks |
//!
//! Both drive tasks wait at most 100 ticks for the token and cool down
//! 100 ticks after every attempt, successful or not.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                Application Tasks (app.rs)               │
//! │          DriveTask (high, low) · StatusTask             │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │     surplus_release() · spawn_tasks() · run()           │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Sync Primitives  │  Serial / Log     │
//! │  scheduler.rs│   sync.rs          │  serial.rs        │
//! │  ─ spawn()   │   ─ Semaphore      │  ─ SerialChannel  │
//! │  ─ schedule()│   ─ Permit         │  ─ SerialLogger   │
//! │  ─ run_until │   ─ Acquire        │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │        Task Model (task.rs) · Output Line (line.rs)     │
//! │    TCB · Suspend · Wait · TaskState · Level             │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch Port (arch/cortex_m4.rs, arch/stm32f4.rs)        │
//! │    SysTick · PD12 · USART2                              │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! Tasks are run-to-completion state machines. Each dispatch runs one
//! [`task::Task::step`], which returns how the task suspends (a timed
//! delay, a bounded wait on the token, or a yield). The scheduler
//! re-evaluates every wait at each decision point, so a release wakes a
//! higher-priority waiter before a lower-priority task steps again.
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically allocated
//! - **No `alloc`**: Pure `core` only
//! - **Fixed-size TCB array**: `[TaskControlBlock; MAX_TASKS]`
//! - **Critical sections**: `critical_section::with()` for shared state

#![no_std]

pub mod config;
pub mod task;
pub mod scheduler;
pub mod sync;
pub mod line;
pub mod serial;
pub mod app;
pub mod kernel;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arch;
