//! Backpressure governor for downstream fulfillment load.
//!
//! The downstream queue depth (items waiting for fulfillment) drives a
//! four-state throttle. Each state boundary has a rising `enter` threshold
//! and a strictly lower falling `exit` threshold, so a sample sitting
//! exactly on a boundary can never flip the state back and forth.
//!
//! The governor only tracks state; the scheduler acts on the returned
//! transitions (releasing idle counterparties on pause, cancelling all
//! open transactions on critical).

use serde::{Deserialize, Serialize};

use crate::config::BackpressureConfig;

/// Throttle state derived from the most recent queue-depth sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleState {
    /// Queue is manageable; trade normally.
    Normal,
    /// Queue is getting busy; skip a fraction of cycles.
    Slowdown,
    /// Queue is overwhelmed; no new transactions, keep existing ones.
    Paused,
    /// Queue is critically deep; cancel everything and release all state.
    Critical,
}

impl ThrottleState {
    /// Whether new transactions may be created in this state.
    pub fn allows_new_transactions(&self) -> bool {
        matches!(self, ThrottleState::Normal | ThrottleState::Slowdown)
    }
}

/// A state change reported by [`BackpressureGovernor::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ThrottleState,
    pub to: ThrottleState,
}

impl Transition {
    /// Rising transition into `Paused`.
    pub fn entered_pause(&self) -> bool {
        self.to == ThrottleState::Paused && self.from < ThrottleState::Paused
    }

    /// Rising transition into `Critical`.
    pub fn entered_critical(&self) -> bool {
        self.to == ThrottleState::Critical && self.from < ThrottleState::Critical
    }

    /// Falling transition back into a state that allows trading.
    pub fn resumed(&self) -> bool {
        self.to.allows_new_transactions() && !self.from.allows_new_transactions()
    }
}

/// Hysteresis state machine over the downstream queue depth.
#[derive(Debug)]
pub struct BackpressureGovernor {
    config: BackpressureConfig,
    state: ThrottleState,
    last_depth: usize,
}

impl BackpressureGovernor {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            state: ThrottleState::Normal,
            last_depth: 0,
        }
    }

    pub fn state(&self) -> ThrottleState {
        self.state
    }

    pub fn last_depth(&self) -> usize {
        self.last_depth
    }

    /// Feed a queue-depth sample. Returns the transition if the state
    /// changed.
    pub fn observe(&mut self, depth: usize) -> Option<Transition> {
        self.last_depth = depth;
        let next = self.next_state(depth);
        if next == self.state {
            return None;
        }
        let transition = Transition { from: self.state, to: next };
        self.state = next;
        tracing::warn!(
            depth,
            from = ?transition.from,
            to = ?transition.to,
            "backpressure state changed"
        );
        Some(transition)
    }

    fn next_state(&self, depth: usize) -> ThrottleState {
        let c = &self.config;
        match self.state {
            ThrottleState::Normal => Self::rising(c, depth),
            ThrottleState::Slowdown => {
                if depth >= c.pause_enter {
                    Self::rising(c, depth)
                } else if depth < c.slowdown_exit {
                    ThrottleState::Normal
                } else {
                    ThrottleState::Slowdown
                }
            }
            ThrottleState::Paused => {
                if depth >= c.critical_enter {
                    ThrottleState::Critical
                } else if depth < c.slowdown_exit {
                    ThrottleState::Normal
                } else if depth < c.pause_exit {
                    ThrottleState::Slowdown
                } else {
                    ThrottleState::Paused
                }
            }
            ThrottleState::Critical => {
                if depth < c.slowdown_exit {
                    ThrottleState::Normal
                } else if depth < c.pause_exit {
                    ThrottleState::Slowdown
                } else if depth < c.critical_exit {
                    ThrottleState::Paused
                } else {
                    ThrottleState::Critical
                }
            }
        }
    }

    /// State a depth maps to when pressure is rising.
    fn rising(c: &BackpressureConfig, depth: usize) -> ThrottleState {
        if depth >= c.critical_enter {
            ThrottleState::Critical
        } else if depth >= c.pause_enter {
            ThrottleState::Paused
        } else if depth >= c.slowdown_enter {
            ThrottleState::Slowdown
        } else {
            ThrottleState::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> BackpressureGovernor {
        BackpressureGovernor::new(BackpressureConfig::default())
    }

    #[test]
    fn test_starts_normal() {
        let g = governor();
        assert_eq!(g.state(), ThrottleState::Normal);
        assert!(g.state().allows_new_transactions());
    }

    #[test]
    fn test_enter_slowdown_at_rising_threshold() {
        let mut g = governor();
        assert!(g.observe(19).is_none());
        let t = g.observe(20).unwrap();
        assert_eq!(t.from, ThrottleState::Normal);
        assert_eq!(t.to, ThrottleState::Slowdown);
    }

    #[test]
    fn test_boundary_sample_does_not_oscillate() {
        let mut g = governor();
        g.observe(20);
        assert_eq!(g.state(), ThrottleState::Slowdown);
        // The same boundary value repeated must not produce transitions
        for _ in 0..5 {
            assert!(g.observe(20).is_none());
            assert_eq!(g.state(), ThrottleState::Slowdown);
        }
    }

    #[test]
    fn test_exit_slowdown_below_falling_threshold() {
        let mut g = governor();
        g.observe(25);
        // Between exit (14) and enter (20): still slowed
        assert!(g.observe(15).is_none());
        assert_eq!(g.state(), ThrottleState::Slowdown);
        // Below exit: back to normal
        let t = g.observe(13).unwrap();
        assert_eq!(t.to, ThrottleState::Normal);
        // Slowdown already allowed transactions, so this is not a resume
        assert!(!t.resumed());
    }

    #[test]
    fn test_pause_and_resume_hysteresis() {
        let mut g = governor();
        let t = g.observe(40).unwrap();
        assert_eq!(t.to, ThrottleState::Paused);
        assert!(t.entered_pause());
        assert!(!g.state().allows_new_transactions());

        // Falling but still above pause_exit: stays paused
        assert!(g.observe(35).is_none());

        // Below pause_exit (30): drops to slowdown, trading resumes
        let t = g.observe(25).unwrap();
        assert_eq!(t.to, ThrottleState::Slowdown);
        assert!(t.resumed());
    }

    #[test]
    fn test_enter_critical() {
        let mut g = governor();
        let t = g.observe(60).unwrap();
        assert_eq!(t.to, ThrottleState::Critical);
        assert!(t.entered_critical());
        assert!(!t.entered_pause());
    }

    #[test]
    fn test_skip_levels_on_spike() {
        let mut g = governor();
        let t = g.observe(100).unwrap();
        assert_eq!(t.from, ThrottleState::Normal);
        assert_eq!(t.to, ThrottleState::Critical);
        assert!(t.entered_critical());
    }

    #[test]
    fn test_critical_recovery_steps() {
        let mut g = governor();
        g.observe(80);
        assert_eq!(g.state(), ThrottleState::Critical);

        // Just under critical_exit (50): down to paused
        let t = g.observe(49).unwrap();
        assert_eq!(t.to, ThrottleState::Paused);

        // Straight to normal when the queue drains fully
        let t = g.observe(0).unwrap();
        assert_eq!(t.to, ThrottleState::Normal);
        assert!(t.resumed());
    }

    #[test]
    fn test_critical_boundary_holds() {
        let mut g = governor();
        g.observe(60);
        // Sitting between critical_exit (50) and critical_enter (60): holds
        assert!(g.observe(55).is_none());
        assert_eq!(g.state(), ThrottleState::Critical);
    }

    #[test]
    fn test_entered_critical_from_paused() {
        let mut g = governor();
        g.observe(45);
        assert_eq!(g.state(), ThrottleState::Paused);
        let t = g.observe(60).unwrap();
        assert!(t.entered_critical());
    }

    #[test]
    fn test_last_depth_tracked() {
        let mut g = governor();
        g.observe(7);
        assert_eq!(g.last_depth(), 7);
    }
}
