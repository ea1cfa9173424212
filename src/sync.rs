//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections and the semaphore that serves as the
//! mutual-exclusion token between the two drive tasks.
//!
//! ## Token protocol
//!
//! ```text
//!   ┌──────┐  try_acquire() / Acquire::poll()  ┌─────────────┐
//!   │ Free │ ─────────────────────────────────► │ Held(owner) │
//!   └──────┘                                    └─────────────┘
//!       ▲            drop(Permit)                      │
//!       └──────────────────────────────────────────────┘
//! ```
//!
//! A successful acquisition hands out a [`Permit`]. Dropping the permit is
//! the only way a holder returns its credit, so a task can never release a
//! token it does not hold. [`Semaphore::give`] exists for the single
//! surplus release performed at boot.

use core::cell::Cell;
use core::fmt;
use core::task::Poll;

use ::critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section (interrupts disabled on
/// Cortex-M, a global lock on hosted targets).
///
/// All state shared with interrupt handlers is accessed through this.
/// Keep the closure short: it delays every interrupt in the system.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    ::critical_section::with(f)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The token did not become available before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("token not available within timeout")
    }
}

/// Why a raw [`Semaphore::give`] was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveError {
    /// The semaphore already holds its maximum number of credits.
    Full,
}

impl fmt::Display for GiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveError::Full => f.write_str("semaphore already at its credit ceiling"),
        }
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// Credit semantics of the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSemantics {
    /// At most one credit. A release on a free token is refused.
    Binary,
    /// Releases accumulate credits without a practical ceiling.
    Counting,
}

#[derive(Debug, Clone, Copy)]
struct Counts {
    available: u32,
    outstanding: u32,
    peak_outstanding: u32,
}

/// A semaphore with a credit ceiling. With a ceiling of one it is the
/// binary mutual-exclusion token.
///
/// Waiting is not built in: [`Semaphore::acquire`] returns an [`Acquire`]
/// operation that the calling task polls each time the scheduler resumes
/// it. Waiters are not queued, whichever one the scheduler resumes first
/// after a release gets the credit.
pub struct Semaphore {
    counts: Mutex<Cell<Counts>>,
    ceiling: u32,
}

impl Semaphore {
    /// A binary semaphore, created Free.
    pub const fn binary() -> Self {
        Self::counting(1, 1)
    }

    /// A counting semaphore holding `initial` credits (clamped to
    /// `ceiling`).
    pub const fn counting(initial: u32, ceiling: u32) -> Self {
        let available = if initial > ceiling { ceiling } else { initial };
        Self {
            counts: Mutex::new(Cell::new(Counts {
                available,
                outstanding: 0,
                peak_outstanding: 0,
            })),
            ceiling,
        }
    }

    /// The token for the given semantics, created Free.
    pub const fn for_semantics(semantics: TokenSemantics) -> Self {
        match semantics {
            TokenSemantics::Binary => Self::binary(),
            TokenSemantics::Counting => Self::counting(1, u32::MAX),
        }
    }

    /// Maximum number of credits the semaphore will hold.
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Credits that can be taken right now.
    pub fn available(&self) -> u32 {
        self.counts().available
    }

    /// Permits currently held.
    pub fn outstanding(&self) -> u32 {
        self.counts().outstanding
    }

    /// Largest number of permits ever held at the same time. A binary
    /// token that preserved mutual exclusion reports at most 1.
    pub fn peak_outstanding(&self) -> u32 {
        self.counts().peak_outstanding
    }

    /// Takes a credit if one is available right now.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let taken = critical_section(|cs| {
            let cell = self.counts.borrow(cs);
            let mut counts = cell.get();
            if counts.available == 0 {
                return false;
            }
            counts.available -= 1;
            counts.outstanding += 1;
            counts.peak_outstanding = counts.peak_outstanding.max(counts.outstanding);
            cell.set(counts);
            true
        });
        if taken {
            Some(Permit { sem: self })
        } else {
            None
        }
    }

    /// Starts an acquisition at tick `now` that gives up `timeout` ticks
    /// later.
    pub fn acquire(&self, now: u64, timeout: u32) -> Acquire<'_> {
        Acquire {
            sem: self,
            deadline: now + u64::from(timeout),
        }
    }

    /// Adds a credit without holding a permit.
    ///
    /// This is the unchecked release: it does not care who, if anyone,
    /// holds the token. Only the boot sequence uses it.
    pub fn give(&self) -> Result<(), GiveError> {
        critical_section(|cs| {
            let cell = self.counts.borrow(cs);
            let mut counts = cell.get();
            if counts.available >= self.ceiling {
                return Err(GiveError::Full);
            }
            counts.available += 1;
            cell.set(counts);
            Ok(())
        })
    }

    fn restore(&self) {
        critical_section(|cs| {
            let cell = self.counts.borrow(cs);
            let mut counts = cell.get();
            counts.outstanding = counts.outstanding.saturating_sub(1);
            counts.available = counts.available.saturating_add(1).min(self.ceiling);
            cell.set(counts);
        });
    }

    fn counts(&self) -> Counts {
        critical_section(|cs| self.counts.borrow(cs).get())
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        f.debug_struct("Semaphore")
            .field("available", &counts.available)
            .field("outstanding", &counts.outstanding)
            .field("ceiling", &self.ceiling)
            .finish()
    }
}

/// Proof of holding one credit. Dropping it releases the credit.
#[derive(Debug)]
pub struct Permit<'a> {
    sem: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.sem.restore();
    }
}

/// An acquisition in progress, bounded by a deadline tick.
#[derive(Debug)]
pub struct Acquire<'a> {
    sem: &'a Semaphore,
    deadline: u64,
}

impl<'a> Acquire<'a> {
    /// Tick at which the acquisition fails.
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    /// True when a poll right now would take a credit.
    pub fn can_complete(&self) -> bool {
        self.sem.available() > 0
    }

    /// Tries to take the credit at tick `now`.
    ///
    /// Availability is checked before the deadline, so a credit released
    /// on the deadline tick is still taken.
    pub fn poll(&self, now: u64) -> Poll<Result<Permit<'a>, Timeout>> {
        if let Some(permit) = self.sem.try_acquire() {
            return Poll::Ready(Ok(permit));
        }
        if now >= self.deadline {
            Poll::Ready(Err(Timeout))
        } else {
            Poll::Pending
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_created_free() {
        let sem = Semaphore::binary();
        assert_eq!(sem.available(), 1);
        assert_eq!(sem.outstanding(), 0);
        assert_eq!(sem.ceiling(), 1);
    }

    #[test]
    fn test_binary_refuses_surplus_give() {
        let sem = Semaphore::binary();
        assert_eq!(sem.give(), Err(GiveError::Full));
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn test_counting_accepts_surplus_give() {
        let sem = Semaphore::for_semantics(TokenSemantics::Counting);
        assert_eq!(sem.give(), Ok(()));
        assert_eq!(sem.available(), 2);

        let first = sem.try_acquire();
        let second = sem.try_acquire();
        assert!(first.is_some() && second.is_some());
        assert_eq!(sem.peak_outstanding(), 2);
    }

    #[test]
    fn test_single_holder() {
        let sem = Semaphore::binary();
        let permit = sem.try_acquire().expect("token starts free");
        assert!(sem.try_acquire().is_none());
        assert_eq!(sem.outstanding(), 1);

        drop(permit);
        assert_eq!(sem.available(), 1);
        assert_eq!(sem.outstanding(), 0);
        assert_eq!(sem.peak_outstanding(), 1);
    }

    #[test]
    fn test_restore_respects_ceiling() {
        let sem = Semaphore::binary();
        let permit = sem.try_acquire().unwrap();
        // Unchecked release while a permit is out.
        assert_eq!(sem.give(), Ok(()));
        drop(permit);
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn test_acquire_pending_then_timeout() {
        let sem = Semaphore::binary();
        let _held = sem.try_acquire().unwrap();

        let acquire = sem.acquire(10, 100);
        assert_eq!(acquire.deadline(), 110);
        assert!(!acquire.can_complete());
        assert!(acquire.poll(10).is_pending());
        assert!(acquire.poll(109).is_pending());
        assert!(matches!(acquire.poll(110), Poll::Ready(Err(Timeout))));
    }

    #[test]
    fn test_acquire_prefers_credit_over_deadline() {
        let sem = Semaphore::binary();
        let held = sem.try_acquire().unwrap();
        let acquire = sem.acquire(0, 100);

        drop(held);
        assert!(acquire.can_complete());
        match acquire.poll(100) {
            Poll::Ready(Ok(_permit)) => assert_eq!(sem.outstanding(), 1),
            other => panic!("expected a permit, got {:?}", other.map(|r| r.is_ok())),
        }
        assert_eq!(sem.outstanding(), 0);
    }
}
