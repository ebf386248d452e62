use crate::error::TransportError;

pub const DEFAULT_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub transient: bool,
}

/// Network-layer failures are retried; anything the server definitively
/// answered is not.
pub fn classify(error: &TransportError) -> Classification {
    let transient = match error {
        TransportError::Network(_) | TransportError::Timeout(_) => true,
        TransportError::Http { status, code, .. } => {
            code.is_none() && matches!(status, 408 | 429 | 502 | 503 | 504)
        }
        TransportError::Decode(_) | TransportError::Client(_) => false,
    };
    Classification { transient }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep polling; `attempts` consecutive transient failures so far.
    Retry { attempts: u32 },
    /// Transient failures used up the budget.
    Exhausted { attempts: u32 },
    /// The failure is definitive.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// `attempts` is the consecutive transient failure count including this
    /// one; it is only consulted for transient errors.
    pub fn decide(&self, error: &TransportError, attempts: u32) -> RetryDecision {
        if !classify(error).transient {
            return RetryDecision::Abort;
        }
        if attempts >= self.limit {
            RetryDecision::Exhausted { attempts }
        } else {
            RetryDecision::Retry { attempts }
        }
    }
}
