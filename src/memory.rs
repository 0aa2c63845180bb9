//! Memory accounting.
//!
//! Every buffer the merge machinery allocates (stream blocks, run buffers, selection heaps) is registered with
//! a [`MemoryRegistry`] before it is created. The engine consults the same registry to decide how many streams
//! it can afford to merge at once.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log;

/// Default memory limit in bytes.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Action taken when an allocation exceeds the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceededPolicy {
    /// Log the breach and terminate the process.
    Abort,
    /// Log the breach and allow the overshoot.
    Warn,
    /// Do not track allocations at all.
    Ignore,
}

/// Memory accounting error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Allocation pushed the used memory over the limit.
    LimitExceeded { requested: usize, used: usize, limit: usize },
    /// Deallocation of more memory than is in use.
    Underflow { requested: usize, used: usize },
}

impl Error for MemoryError {}

impl Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::LimitExceeded { requested, used, limit } => write!(
                f,
                "allocation of {} bytes exceeds memory limit (used: {}, limit: {})",
                requested, used, limit
            ),
            MemoryError::Underflow { requested, used } => {
                write!(f, "deallocation of {} bytes exceeds used memory {}", requested, used)
            }
        }
    }
}

/// Process-wide memory ledger. Shared between components as an `Arc<MemoryRegistry>`.
#[derive(Debug)]
pub struct MemoryRegistry {
    limit: AtomicUsize,
    used: AtomicUsize,
    policy: ExceededPolicy,
}

impl MemoryRegistry {
    /// Creates a registry with the given limit (bytes) and breach policy.
    pub fn new(limit: usize, policy: ExceededPolicy) -> Self {
        MemoryRegistry {
            limit: AtomicUsize::new(limit),
            used: AtomicUsize::new(0),
            policy,
        }
    }

    pub fn set_limit(&self, bytes: usize) {
        log::debug!("memory limit set to {} bytes", bytes);
        self.limit.store(bytes, Ordering::SeqCst);
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Returns the number of bytes that can still be allocated without exceeding the limit.
    pub fn available(&self) -> usize {
        self.limit().saturating_sub(self.used())
    }

    pub fn policy(&self) -> ExceededPolicy {
        self.policy
    }

    /// Records an allocation. The allocation is recorded even if it exceeds the limit,
    /// in which case [`MemoryError::LimitExceeded`] is returned. Nothing is recorded under
    /// [`ExceededPolicy::Ignore`].
    pub fn register_allocation(&self, bytes: usize) -> Result<(), MemoryError> {
        if self.policy == ExceededPolicy::Ignore {
            return Ok(());
        }
        let used = self.used.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let limit = self.limit();
        if used > limit {
            return Err(MemoryError::LimitExceeded {
                requested: bytes,
                used,
                limit,
            });
        }

        return Ok(());
    }

    /// Records a deallocation. Releasing more than is in use clamps the counter to zero
    /// and returns [`MemoryError::Underflow`].
    pub fn register_deallocation(&self, bytes: usize) -> Result<(), MemoryError> {
        if self.policy == ExceededPolicy::Ignore {
            return Ok(());
        }
        let result = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| Some(used.saturating_sub(bytes)));

        match result {
            Ok(used) if used < bytes => Err(MemoryError::Underflow { requested: bytes, used }),
            _ => Ok(()),
        }
    }

    /// Registers an allocation according to the breach policy and returns a lease that
    /// deregisters it when dropped.
    pub fn allocate(self: &Arc<Self>, bytes: usize) -> MemoryLease {
        if self.policy == ExceededPolicy::Ignore {
            return MemoryLease {
                registry: Arc::clone(self),
                bytes: 0,
            };
        }

        if let Err(err) = self.register_allocation(bytes) {
            match self.policy {
                ExceededPolicy::Abort => {
                    log::error!("memory manager: {}", err);
                    process::exit(1);
                }
                ExceededPolicy::Warn => log::warn!("memory manager: {}", err),
                ExceededPolicy::Ignore => {}
            }
        }

        return MemoryLease {
            registry: Arc::clone(self),
            bytes,
        };
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        MemoryRegistry::new(DEFAULT_MEMORY_LIMIT, ExceededPolicy::Warn)
    }
}

/// Registered allocation. Returns its bytes to the registry on drop.
#[derive(Debug)]
pub struct MemoryLease {
    registry: Arc<MemoryRegistry>,
    bytes: usize,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if self.bytes == 0 {
            return;
        }
        if let Err(err) = self.registry.register_deallocation(self.bytes) {
            log::warn!("memory manager: {}", err);
        }
    }
}
