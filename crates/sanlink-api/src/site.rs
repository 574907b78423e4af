// Site awareness guard
//
// Dual-site arrays can move the active management port to the other
// controller without the session noticing. The guard records the logical
// interface identity observed after authentication and compares it with the
// identity reported by the latest system refresh. While a refresh is
// running, ordinary requests fail fast instead of queueing behind it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::error::Error;

/// Refresh state of the guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SiteMode {
    #[default]
    Stable,
    Refreshing,
}

/// Snapshot of the guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteState {
    /// Identity captured after the last explicit authentication.
    pub observed: Option<String>,
    /// Identity reported by the most recent system refresh.
    pub current: Option<String>,
    pub mode: SiteMode,
    /// Refreshes still in flight; `mode` is `Refreshing` while non-zero.
    pub refreshes: usize,
}

/// Lock-free state machine shared by every request path of one session.
#[derive(Debug, Default)]
pub struct SiteGuard {
    state: ArcSwap<SiteState>,
}

impl SiteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: SiteState) -> Self {
        Self {
            state: ArcSwap::from_pointee(SiteState {
                mode: SiteMode::Stable,
                refreshes: 0,
                ..state
            }),
        }
    }

    pub fn snapshot(&self) -> SiteState {
        SiteState::clone(&self.state.load())
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.load().mode == SiteMode::Refreshing
    }

    /// Check whether an ordinary request may be sent.
    pub fn check(&self) -> Result<(), Error> {
        let state = self.state.load();
        if state.mode == SiteMode::Refreshing {
            return Err(Error::SiteRefreshing);
        }
        match (&state.observed, &state.current) {
            (Some(observed), Some(current)) if observed != current => {
                warn!(%observed, %current, "logical interface is not running on its own site");
                Err(Error::SiteMismatch {
                    observed: observed.clone(),
                    current: current.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Enter `Refreshing`. The returned guard leaves it when dropped,
    /// whether or not the refresh succeeded. Overlapping refreshes keep
    /// the guard `Refreshing` until the last one ends.
    pub fn begin_refresh(&self) -> RefreshGuard<'_> {
        self.update(|s| {
            s.refreshes += 1;
            s.mode = SiteMode::Refreshing;
        });
        RefreshGuard {
            guard: self,
            current: None,
        }
    }

    /// Forget the observed identity so the next refresh captures a new one.
    pub fn reset_observed(&self) {
        self.update(|s| s.observed = None);
    }

    /// Record the identity observed at authentication.
    pub fn set_observed(&self, identity: impl Into<String>) {
        let identity = identity.into();
        self.update(|s| s.observed = Some(identity.clone()));
    }

    fn update(&self, f: impl Fn(&mut SiteState)) {
        self.state.rcu(|old| {
            let mut next = SiteState::clone(old);
            f(&mut next);
            Arc::new(next)
        });
    }
}

/// Scope of one system/site refresh.
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    guard: &'a SiteGuard,
    current: Option<String>,
}

impl RefreshGuard<'_> {
    /// Report the identity found by the refresh. Applied when the guard
    /// is dropped, together with the transition back to `Stable`.
    pub fn complete(&mut self, current: Option<String>) {
        self.current = current;
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let current = self.current.take();
        self.guard.update(|s| {
            s.refreshes = s.refreshes.saturating_sub(1);
            if s.refreshes == 0 {
                s.mode = SiteMode::Stable;
            }
            if let Some(ref id) = current {
                s.current = Some(id.clone());
                if s.observed.is_none() {
                    s.observed = Some(id.clone());
                }
            }
        });
        info!("system info refreshed");
    }
}
