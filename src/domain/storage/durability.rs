//! Durability outcome of a mutating operation

use std::fmt;

/// Whether a completed mutation reached the durable store.
///
/// A failed operation is an `Err`; a successful one reports whether it will
/// survive a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    /// Flushed to the durable store
    Persisted,
    /// Applied in memory only; lost on restart
    InMemoryOnly { reason: String },
}

impl Durability {
    pub fn in_memory_only(reason: impl Into<String>) -> Self {
        Self::InMemoryOnly {
            reason: reason.into(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted)
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted => write!(f, "persisted"),
            Self::InMemoryOnly { reason } => write!(f, "in-memory only ({})", reason),
        }
    }
}

/// A value produced by a mutation together with its durability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Durable<T> {
    pub value: T,
    pub durability: Durability,
}

impl<T> Durable<T> {
    pub fn new(value: T, durability: Durability) -> Self {
        Self { value, durability }
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn is_persisted(&self) -> bool {
        self.durability.is_persisted()
    }
}
