//! Per-resource ownership records.

use std::mem;

/// Whether the engine holds a resource and, if so, whether it must delete it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Ownership<T> {
    /// Not acquired yet, or already released by teardown.
    #[default]
    Unacquired,
    /// Created by the engine; teardown deletes it.
    Owned(T),
    /// Pre-existing; teardown leaves it alone.
    Reused(T),
}

impl<T> Ownership<T> {
    /// Returns the handle regardless of ownership.
    #[must_use]
    pub const fn handle(&self) -> Option<&T> {
        match self {
            Self::Owned(handle) | Self::Reused(handle) => Some(handle),
            Self::Unacquired => None,
        }
    }

    /// Returns `true` when teardown must delete the resource.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Returns `true` when the resource pre-existed.
    #[must_use]
    pub const fn is_reused(&self) -> bool {
        matches!(self, Self::Reused(_))
    }

    /// Resets the record to [`Ownership::Unacquired`], returning the old
    /// value.
    pub fn release(&mut self) -> Self {
        mem::take(self)
    }
}
