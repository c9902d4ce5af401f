use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// cancellation signal passed to every operation that touches storage
///
/// clones share the same flag, so one handle can be given to a worker
/// while another stays with the caller.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// a token that never fires unless `cancel` is called
    pub fn new() -> Self {
        Self::default()
    }

    /// a token that fires once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// a token that fires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// returns a context error if the token has fired
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled { operation });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded { operation });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_never_fires() {
        let token = Cancellation::new();
        assert!(token.check("read").is_ok());
    }

    #[test]
    fn test_cancel_shared_between_clones() {
        let token = Cancellation::new();
        let other = token.clone();
        other.cancel();

        let err = token.check("write").unwrap_err();
        assert!(matches!(err, Error::Cancelled { operation: "write" }));
        assert_eq!(err.kind(), ErrorKind::Context);
    }

    #[test]
    fn test_expired_deadline() {
        let token = Cancellation::with_deadline(Instant::now());
        let err = token.check("open").unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }
}
