//! Per-repository operation executors.
//!
//! Each executor performs one idempotent operation on one repository:
//! re-running with unchanged inputs produces the same post-state, and the
//! second run emits a skip event instead of a mutation event. Executors emit
//! through the [`Reporter`](crate::report::Reporter), gate destructive
//! actions through [`Gate`](crate::confirm::Gate), and wrap failures as
//! [`OperationError`](crate::errors::OperationError).

use chrono::{DateTime, Utc};

use crate::cancel::CancelToken;
use crate::confirm::Gate;
use crate::report::Reporter;

pub mod audit;
pub mod protocol;
pub mod purge;
pub mod release;
pub mod remote;
pub mod rename;

/// Runtime knobs shared by every executor in a run.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub dry_run: bool,
    pub assume_yes: bool,
    pub workers: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            assume_yes: false,
            workers: 4,
        }
    }
}

/// Injected time source so release and rename behaviour is deterministic in
/// tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Dependencies handed to every executor invocation.
pub struct ExecutorContext<'a> {
    pub reporter: &'a Reporter,
    pub gate: &'a Gate,
    pub runtime: &'a RuntimeOptions,
    pub cancel: &'a CancelToken,
    pub clock: &'a dyn Clock,
}
