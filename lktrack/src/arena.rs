//! Scoped bump allocation for per-iteration temporaries.
//!
//! An [`Arena`] owns a fixed buffer. Temporaries are handed out by an
//! [`ArenaScope`], and everything a scope allocated is released when the scope
//! is dropped. A nested scope mutably borrows its parent, so scopes are
//! strictly LIFO and the parent cannot allocate while a child is alive.

use crate::error::{Result, TrackerError};

#[derive(Debug, Clone)]
pub struct Arena<T> {
    buf: Vec<T>,
}

impl<T: Copy + Default> Arena<T> {
    /// Create an arena able to hold `capacity` elements at once.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: vec![T::default(); capacity] }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Open the outermost allocation scope.
    pub fn scope(&mut self) -> ArenaScope<'_, T> {
        ArenaScope { rest: &mut self.buf }
    }
}

/// A LIFO region of an [`Arena`].
pub struct ArenaScope<'a, T> {
    rest: &'a mut [T],
}

impl<'a, T: Copy + Default> ArenaScope<'a, T> {
    /// Allocate `n` elements, reset to `T::default()`.
    ///
    /// The slice lives as long as the scope it came from.
    pub fn alloc(&mut self, n: usize) -> Result<&'a mut [T]> {
        let available = self.rest.len();
        if n > available {
            return Err(TrackerError::OutOfMemory { requested: n, available });
        }
        let rest = std::mem::take(&mut self.rest);
        let (head, tail) = rest.split_at_mut(n);
        self.rest = tail;
        head.fill(T::default());
        Ok(head)
    }

    /// Open a nested scope over the remaining space.
    ///
    /// Allocations made through the child are released when it is dropped.
    pub fn scope(&mut self) -> ArenaScope<'_, T> {
        ArenaScope { rest: &mut *self.rest }
    }

    /// Elements still available in this scope.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_hands_out_disjoint_zeroed_slices() {
        let mut arena = Arena::<f32>::with_capacity(10);
        let mut scope = arena.scope();
        let a = scope.alloc(4).unwrap();
        let b = scope.alloc(6).unwrap();
        a.fill(1.0);
        assert!(b.iter().all(|&v| v == 0.0));
        b[0] = 2.0;
        assert_eq!(a[3], 1.0);
        assert_eq!(scope.remaining(), 0);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut arena = Arena::<u8>::with_capacity(8);
        let mut scope = arena.scope();
        scope.alloc(5).unwrap();
        let err = scope.alloc(4).unwrap_err();
        assert_eq!(err, TrackerError::OutOfMemory { requested: 4, available: 3 });
    }

    #[test]
    fn nested_scope_releases_on_drop() {
        let mut arena = Arena::<i32>::with_capacity(16);
        let mut outer = arena.scope();
        let kept = outer.alloc(4).unwrap();
        kept[0] = 7;
        {
            let mut inner = outer.scope();
            let tmp = inner.alloc(12).unwrap();
            tmp.fill(-1);
            assert_eq!(inner.remaining(), 0);
        }
        assert_eq!(outer.remaining(), 12);
        let again = outer.alloc(12).unwrap();
        assert!(again.iter().all(|&v| v == 0));
        assert_eq!(kept[0], 7);
    }

    #[test]
    fn reopening_the_arena_starts_empty() {
        let mut arena = Arena::<f32>::with_capacity(3);
        {
            let mut scope = arena.scope();
            scope.alloc(3).unwrap();
        }
        let mut scope = arena.scope();
        assert_eq!(scope.remaining(), 3);
        assert!(scope.alloc(3).is_ok());
    }
}
