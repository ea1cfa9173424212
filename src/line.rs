//! # Digital Output Line
//!
//! The single output bit the drive tasks fight over. Nothing here enforces
//! mutual exclusion; the token protocol in [`crate::sync`] is what keeps
//! the two drive tasks from interleaving.

/// Logic level of the output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

/// A digital output that can be driven high or low.
///
/// Takes `&self` so both drive tasks can share one line; implementations
/// write a set/reset register or use interior mutability.
pub trait OutputLine {
    fn set_level(&self, level: Level);
}

impl<T: OutputLine + ?Sized> OutputLine for &T {
    fn set_level(&self, level: Level) {
        (**self).set_level(level)
    }
}
