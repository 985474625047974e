//! Mode predicates restricting an equation to part of the spectral space
use std::fmt;

/// Predicate over a wavenumber pair `(kx, ky)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Condition {
    /// Every mode
    #[default]
    All,
    /// Every mode except `(0, 0)`
    NonzeroMode,
    /// Only the mode `(0, 0)`
    ZeroMode,
}

/// Classes of modes the conditions distinguish. Every wavenumber pair
/// belongs to exactly one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeClass {
    /// `(0, 0)`
    Zero,
    /// Everything else
    Nonzero,
}

impl ModeClass {
    /// All classes
    pub const ALL: [ModeClass; 2] = [ModeClass::Zero, ModeClass::Nonzero];

    /// Class of a wavenumber pair
    pub fn of(k: [i64; 2]) -> Self {
        if k == [0, 0] {
            ModeClass::Zero
        } else {
            ModeClass::Nonzero
        }
    }
}

impl Condition {
    /// True if the condition holds for wavenumbers `k`
    pub fn matches(&self, k: [i64; 2]) -> bool {
        self.covers(ModeClass::of(k))
    }

    /// True if the condition holds for every mode of `class`
    pub fn covers(&self, class: ModeClass) -> bool {
        match self {
            Condition::All => true,
            Condition::NonzeroMode => class == ModeClass::Nonzero,
            Condition::ZeroMode => class == ModeClass::Zero,
        }
    }
}

impl fmt::Display for ModeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeClass::Zero => write!(f, "zero (kx = ky = 0)"),
            ModeClass::Nonzero => write!(f, "nonzero"),
        }
    }
}
