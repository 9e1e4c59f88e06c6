//! Crash supervision for consumer sessions.
//!
//! [`supervise`] runs a session factory in a loop. A session that fails or
//! panics is logged, followed by a fixed cool-down and a fresh session, until
//! shutdown is initiated or the policy's restart budget runs out. The fault
//! boundary is one topic: a flapping topic never takes its siblings down.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Once;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::shutdown::ShutdownListener;

/// Default pause between a failed session and its replacement.
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(5);

/// When and how often to restart a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub cooldown: Duration,
    /// `None` restarts forever.
    pub max_restarts: Option<u32>,
}

impl RestartPolicy {
    #[must_use]
    pub const fn fixed(cooldown: Duration) -> Self {
        Self {
            cooldown,
            max_restarts: None,
        }
    }

    #[must_use]
    pub const fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    const fn exhausted(&self, restarts: u32) -> bool {
        match self.max_restarts {
            Some(max) => restarts >= max,
            None => false,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RESTART_COOLDOWN)
    }
}

/// How a supervised task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Shutdown was initiated.
    Shutdown { restarts: u32 },
    /// The session returned cleanly without a shutdown.
    Completed { restarts: u32 },
    /// The restart budget ran out; carries the last failure.
    GaveUp {
        restarts: u32,
        last_error: PipelineError,
    },
}

impl SupervisorExit {
    #[must_use]
    pub const fn restarts(&self) -> u32 {
        match self {
            Self::Shutdown { restarts }
            | Self::Completed { restarts }
            | Self::GaveUp { restarts, .. } => *restarts,
        }
    }
}

thread_local! {
    static LAST_PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

/// Chain a panic hook that stashes the backtrace of the panicking thread.
///
/// `catch_unwind` runs on the thread that panicked, so the supervisor can
/// pick the backtrace up right after the unwind is caught.
fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            LAST_PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> String {
    LAST_PANIC_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| "<no backtrace captured>".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Run sessions produced by `session` until shutdown.
pub async fn supervise<F, Fut>(
    name: String,
    policy: RestartPolicy,
    mut shutdown: ShutdownListener,
    mut session: F,
) -> SupervisorExit
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), PipelineError>>,
{
    install_backtrace_hook();
    let mut restarts = 0_u32;

    loop {
        if shutdown.is_triggered() {
            return SupervisorExit::Shutdown { restarts };
        }

        let failure = match AssertUnwindSafe(session()).catch_unwind().await {
            Ok(Ok(())) if shutdown.is_triggered() => {
                return SupervisorExit::Shutdown { restarts };
            }
            Ok(Ok(())) => {
                info!(task = %name, restarts, "session completed");
                return SupervisorExit::Completed { restarts };
            }
            Ok(Err(err)) => {
                error!(task = %name, restarts, error = %err, "session failed");
                err
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let backtrace = take_panic_backtrace();
                error!(
                    task = %name,
                    restarts,
                    panic = %message,
                    backtrace = %backtrace,
                    "session panicked"
                );
                PipelineError::UnexpectedFault(message)
            }
        };

        if policy.exhausted(restarts) {
            warn!(task = %name, restarts, "restart budget exhausted, giving up");
            return SupervisorExit::GaveUp {
                restarts,
                last_error: failure,
            };
        }

        restarts = restarts.saturating_add(1);
        info!(
            task = %name,
            restart = restarts,
            cooldown_ms = u64::try_from(policy.cooldown.as_millis()).unwrap_or(u64::MAX),
            "restarting session after cool-down"
        );

        tokio::select! {
            biased;
            () = shutdown.wait() => return SupervisorExit::Shutdown { restarts },
            () = tokio::time::sleep(policy.cooldown) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RestartPolicy = RestartPolicy::fixed(Duration::from_millis(5));

    #[tokio::test]
    async fn test_restarts_after_error_then_completes() {
        let coordinator = ShutdownCoordinator::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let exit = supervise("status".into(), FAST, coordinator.listener(), || {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::Bus(BusError::Transport("down".into())))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(exit, SupervisorExit::Completed { restarts: 2 });
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let coordinator = ShutdownCoordinator::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let exit = supervise("zip".into(), FAST, coordinator.listener(), || {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("boom");
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(exit.restarts(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let coordinator = ShutdownCoordinator::new();

        let exit = supervise(
            "deploy".into(),
            FAST.with_max_restarts(2),
            coordinator.listener(),
            || async { Err(PipelineError::UnexpectedFault("always".into())) },
        )
        .await;

        assert_eq!(
            exit,
            SupervisorExit::GaveUp {
                restarts: 2,
                last_error: PipelineError::UnexpectedFault("always".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_cooldown() {
        let coordinator = ShutdownCoordinator::new();
        let listener = coordinator.listener();

        let task = tokio::spawn(supervise(
            "status".into(),
            RestartPolicy::fixed(Duration::from_secs(60)),
            listener,
            || async { Err(PipelineError::UnexpectedFault("flap".into())) },
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.initiate(ShutdownSignal::Programmatic);

        let exit = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("shutdown should cut the cool-down short")
            .unwrap();
        assert_eq!(exit, SupervisorExit::Shutdown { restarts: 1 });
    }

    #[test]
    fn test_panic_backtrace_is_captured_once() {
        install_backtrace_hook();

        let result = std::panic::catch_unwind(|| panic!("kaboom"));
        assert!(result.is_err());

        assert_ne!(take_panic_backtrace(), "<no backtrace captured>");
        assert_eq!(take_panic_backtrace(), "<no backtrace captured>");
    }

    #[test]
    fn test_default_policy_is_unbounded() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.cooldown, Duration::from_secs(5));
        assert!(!policy.exhausted(u32::MAX));
    }
}
