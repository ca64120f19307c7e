//! Thread policy for the event loop.
//!
//! Events are always read from their source one at a time, in order. The policy only decides
//! where the per-event flow calculation and histogram filling run:
//! - [`ThreadPolicy::Single`]: on the caller thread, in event order.
//! - [`ThreadPolicy::GlobalPool`]: on the global Rayon pool.
//! - [`ThreadPolicy::Dedicated`]: on a private Rayon pool; building the pool has a cost, so
//!   reuse the context across runs.

use crate::{PicoFlowError, PicoFlowResult};

/// Thread-policy options for [`ExecutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPolicy {
    /// Run work on the current thread.
    #[default]
    Single,
    /// Use the global Rayon pool.
    GlobalPool,
    /// Use a dedicated Rayon pool with `n_threads`.
    Dedicated(usize),
}

impl ThreadPolicy {
    /// Map a thread count to a policy: `0` is [`ThreadPolicy::Single`], anything else a
    /// dedicated pool of that size.
    pub fn from_threads(n_threads: usize) -> Self {
        match n_threads {
            0 => Self::Single,
            n => Self::Dedicated(n),
        }
    }
}

/// Execution context owning the thread policy (and a dedicated pool, if requested).
#[derive(Debug)]
pub struct ExecutionContext {
    thread_policy: ThreadPolicy,
    #[cfg(feature = "rayon")]
    dedicated_pool: Option<rayon::ThreadPool>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            thread_policy: ThreadPolicy::Single,
            #[cfg(feature = "rayon")]
            dedicated_pool: None,
        }
    }
}

impl ExecutionContext {
    /// Create a new context with the requested thread policy.
    ///
    /// Returns an error when the requested policy is incompatible with the current feature set
    /// (a parallel policy without `rayon`) or when a dedicated pool size is invalid.
    pub fn new(thread_policy: ThreadPolicy) -> PicoFlowResult<Self> {
        #[cfg(not(feature = "rayon"))]
        {
            if thread_policy != ThreadPolicy::Single {
                return Err(PicoFlowError::ExecutionContextError {
                    reason: "Rayon feature is required for non-single thread policies".into(),
                });
            }
        }

        #[cfg(feature = "rayon")]
        let dedicated_pool = match thread_policy {
            ThreadPolicy::Dedicated(n_threads) => {
                if n_threads == 0 {
                    return Err(PicoFlowError::ExecutionContextError {
                        reason: "Dedicated thread pool size must be >= 1".into(),
                    });
                }
                Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(n_threads)
                        .build()?,
                )
            }
            ThreadPolicy::Single | ThreadPolicy::GlobalPool => None,
        };

        Ok(Self {
            thread_policy,
            #[cfg(feature = "rayon")]
            dedicated_pool,
        })
    }

    /// Return the configured thread policy.
    pub fn thread_policy(&self) -> ThreadPolicy {
        self.thread_policy
    }

    /// Whether work should be split across threads.
    pub fn is_parallel(&self) -> bool {
        self.thread_policy != ThreadPolicy::Single
    }

    /// Execute work under this context's thread policy.
    ///
    /// `Dedicated` runs inside the dedicated pool. Other policies run the closure directly.
    #[cfg(feature = "rayon")]
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.dedicated_pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Execute work under this context's thread policy.
    #[cfg(not(feature = "rayon"))]
    pub fn install<R>(&self, op: impl FnOnce() -> R) -> R {
        op()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_threads() {
        assert_eq!(ThreadPolicy::from_threads(0), ThreadPolicy::Single);
        assert_eq!(ThreadPolicy::from_threads(3), ThreadPolicy::Dedicated(3));
    }

    #[test]
    fn test_single_context() {
        let ctx = ExecutionContext::new(ThreadPolicy::Single).unwrap();
        assert!(!ctx.is_parallel());
        assert_eq!(ctx.install(|| 2 + 2), 4);
        assert_eq!(ExecutionContext::default().thread_policy(), ThreadPolicy::Single);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_dedicated_context() {
        let ctx = ExecutionContext::new(ThreadPolicy::Dedicated(2)).unwrap();
        assert!(ctx.is_parallel());
        assert_eq!(ctx.install(rayon::current_num_threads), 2);
        assert!(matches!(
            ExecutionContext::new(ThreadPolicy::Dedicated(0)),
            Err(PicoFlowError::ExecutionContextError { .. })
        ));
    }
}
