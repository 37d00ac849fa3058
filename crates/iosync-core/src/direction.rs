//! Access direction of a lock scope.

use std::fmt;

/// Whether a scope coordinates a read or a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn is_read(self) -> bool {
        matches!(self, Direction::Read)
    }

    /// Suffix used in scope registry keys (`"{path}_{suffix}"`).
    pub fn scope_suffix(self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("reading"),
            Direction::Write => f.write_str("writing"),
        }
    }
}
