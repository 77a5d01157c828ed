//! The currently active upstream and its pinned per-upstream state.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::UpstreamCandidate;

/// An upstream together with the state built for it.
///
/// Connections hold their own `Arc<Pinned<T>>`; a later switch replaces the
/// active value without touching snapshots already handed out.
#[derive(Debug)]
pub struct Pinned<T> {
    pub candidate: UpstreamCandidate,
    pub state: T,
}

/// Single owner of "which upstream are new connections pinned to".
///
/// [`apply`](Self::apply) compares and switches under one lock, so concurrent
/// connections observe at most one switch per distinct candidate change.
pub struct ActiveUpstream<T> {
    current: Mutex<Option<Arc<Pinned<T>>>>,
}

impl<T> Default for ActiveUpstream<T> {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }
}

impl<T> ActiveUpstream<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin new connections to `candidate`.
    ///
    /// When `candidate` is already active the existing state is returned and
    /// `build` is not called. Otherwise `build` produces fresh state, which
    /// replaces the previous pin. The returned flag is `true` on a switch.
    pub fn apply<E>(
        &self,
        candidate: &UpstreamCandidate,
        build: impl FnOnce(&UpstreamCandidate) -> Result<T, E>,
    ) -> Result<(Arc<Pinned<T>>, bool), E> {
        let mut current = self.current.lock();
        if let Some(pinned) = current.as_ref()
            && pinned.candidate == *candidate
        {
            return Ok((pinned.clone(), false));
        }

        let pinned = Arc::new(Pinned {
            candidate: candidate.clone(),
            state: build(candidate)?,
        });
        info!(upstream = %candidate, "balancer use");
        *current = Some(pinned.clone());
        Ok((pinned, true))
    }

    /// The currently pinned upstream, if any.
    pub fn current(&self) -> Option<Arc<Pinned<T>>> {
        self.current.lock().clone()
    }
}

impl<T> std::fmt::Debug for ActiveUpstream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.lock();
        f.debug_struct("ActiveUpstream")
            .field("candidate", &current.as_ref().map(|p| p.candidate.clone()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn candidate(i: usize) -> UpstreamCandidate {
        UpstreamCandidate::new(i, format!("node-{i}.example"), 443)
    }

    #[test]
    fn first_apply_switches() {
        let active: ActiveUpstream<u32> = ActiveUpstream::new();
        let (pinned, switched) = active.apply(&candidate(0), |_| Ok::<_, Infallible>(7)).unwrap();
        assert!(switched);
        assert_eq!(pinned.state, 7);
    }

    #[test]
    fn same_candidate_reuses_state() {
        let active: ActiveUpstream<u32> = ActiveUpstream::new();
        let (first, _) = active.apply(&candidate(0), |_| Ok::<_, Infallible>(1)).unwrap();
        let (second, switched) = active
            .apply(&candidate(0), |_| -> Result<u32, Infallible> {
                panic!("must not rebuild")
            })
            .unwrap();
        assert!(!switched);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn switch_leaves_existing_snapshots_alone() {
        let active: ActiveUpstream<String> = ActiveUpstream::new();
        let (old, _) = active
            .apply(&candidate(0), |c| Ok::<_, Infallible>(c.host.clone()))
            .unwrap();
        let (new, switched) = active
            .apply(&candidate(1), |c| Ok::<_, Infallible>(c.host.clone()))
            .unwrap();

        assert!(switched);
        assert_eq!(old.state, "node-0.example");
        assert_eq!(new.state, "node-1.example");
        assert_eq!(active.current().unwrap().candidate.index, 1);
    }

    #[test]
    fn build_error_keeps_previous_pin() {
        let active: ActiveUpstream<u32> = ActiveUpstream::new();
        active.apply(&candidate(0), |_| Ok::<_, &str>(1)).unwrap();
        active.apply(&candidate(1), |_| Err("bad key")).unwrap_err();
        assert_eq!(active.current().unwrap().candidate.index, 0);
    }
}
