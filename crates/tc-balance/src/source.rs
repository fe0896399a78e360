//! Exchange-side balance seam.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tc_core::{Balance, BoxFuture};

use crate::error::{BalanceError, BalanceResult};

/// Source of truth for an account's balance (an exchange client).
///
/// Implementations must be cancellation-safe: a pending `get_balance`
/// future may be dropped at any await point.
pub trait BalanceSource: Send + Sync {
    fn get_balance(&self) -> BoxFuture<'_, BalanceResult<Balance>>;
}

/// Arc wrapper for BalanceSource trait objects.
pub type DynBalanceSource = Arc<dyn BalanceSource>;

/// Mock balance source for testing.
#[derive(Debug)]
pub struct MockBalanceSource {
    balance: Mutex<Balance>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockBalanceSource {
    pub fn new(balance: Balance) -> Self {
        Self {
            balance: Mutex::new(balance),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the balance returned by subsequent calls.
    pub fn set_balance(&self, balance: Balance) {
        *self.balance.lock() = balance;
    }

    /// Make subsequent calls fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of `get_balance` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BalanceSource for MockBalanceSource {
    fn get_balance(&self) -> BoxFuture<'_, BalanceResult<Balance>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(BalanceError::Source("mock source unavailable".to_string()));
            }
            Ok(*self.balance.lock())
        })
    }
}
