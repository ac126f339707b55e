//! Owning-or-borrowed hardware handle.

use core::ops::{Deref, DerefMut};

/// A peripheral that is either owned by its user or lent to it.
///
/// Board code that shares a bus between drivers passes `Borrowed`; a driver
/// that should tear its peripheral down with itself gets `Owned`.
#[derive(Debug)]
pub enum Handle<'a, T> {
    Owned(T),
    Borrowed(&'a mut T),
}

impl<T> Handle<'_, T> {
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Returns the peripheral if it was owned
    pub fn into_owned(self) -> Option<T> {
        match self {
            Self::Owned(value) => Some(value),
            Self::Borrowed(_) => None,
        }
    }
}

impl<T> Deref for Handle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Owned(value) => value,
            Self::Borrowed(value) => value,
        }
    }
}

impl<T> DerefMut for Handle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Self::Owned(value) => value,
            Self::Borrowed(value) => value,
        }
    }
}

impl<T> From<T> for Handle<'_, T> {
    fn from(value: T) -> Self {
        Self::Owned(value)
    }
}
