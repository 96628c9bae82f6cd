//! Prepared statement handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// A statement prepared lazily on first execute.
///
/// Preparing is local: the server handle stays 0 until the first execute
/// sends `sp_prepexec` and the server returns one. Clones share the handle.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    sql: String,
    handle: AtomicI32,
}

impl PreparedStatement {
    /// Create an unprepared statement.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sql: sql.into(),
                handle: AtomicI32::new(0),
            }),
        }
    }

    /// SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// Server handle, 0 if not prepared on the server.
    #[must_use]
    pub fn handle(&self) -> i32 {
        self.inner.handle.load(Ordering::Acquire)
    }

    /// Whether the server holds a plan for this statement.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.handle() != 0
    }

    pub(crate) fn set_handle(&self, handle: i32) {
        self.inner.handle.store(handle, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_handle() {
        let stmt = PreparedStatement::new("SELECT @P1");
        let clone = stmt.clone();
        assert!(!stmt.is_prepared());
        clone.set_handle(3);
        assert_eq!(stmt.handle(), 3);
        assert_eq!(stmt.sql(), "SELECT @P1");
    }
}
