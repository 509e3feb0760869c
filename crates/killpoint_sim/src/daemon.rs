//! Simulated metadata daemons.

use killpoint_core::{DaemonInfo, DaemonName, Rank};
use tokio::time::Instant;

/// Process and role state of a simulated daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimDaemonState {
    /// Running, no rank
    Standby,
    /// Taking over or creating a rank; becomes active at `until`
    Transitioning {
        /// Rank being taken over
        rank: Rank,
        /// Monitor state shown meanwhile (`up:replay`, `up:creating`)
        phase: &'static str,
        /// When the daemon turns active
        until: Instant,
    },
    /// Serving a rank
    Active {
        /// Rank held
        rank: Rank,
    },
    /// Process is dead. The monitor keeps showing the old rank until it
    /// misses beacons for the grace period.
    Crashed {
        /// Rank the monitor still attributes to the daemon
        rank: Option<Rank>,
        /// When the monitor declares the rank failed
        noticed_at: Instant,
        /// Whether a standby may take the rank over
        handover: bool,
    },
    /// Process restarting; joins as standby at `until`
    Starting {
        /// When the daemon registers as standby
        until: Instant,
    },
    /// Process will never come back
    Gone,
}

/// State change produced by advancing a daemon's clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonEvent {
    /// Finished taking over a rank
    Activated {
        /// Rank now served
        rank: Rank,
    },
    /// Registered as standby after a restart
    Rejoined,
    /// Monitor gave up on the daemon's rank
    RankFailed {
        /// Rank left without a holder
        rank: Rank,
        /// When the monitor noticed
        at: Instant,
        /// Whether a standby may take it over
        handover: bool,
    },
}

/// A simulated metadata daemon
#[derive(Debug, Clone)]
pub struct SimDaemon {
    name: DaemonName,
    state: SimDaemonState,
    kill_at: Option<u32>,
    restarts: u32,
}

impl SimDaemon {
    /// Create a standby daemon
    #[must_use]
    pub fn new(name: DaemonName) -> Self {
        Self {
            name,
            state: SimDaemonState::Standby,
            kill_at: None,
            restarts: 0,
        }
    }

    /// Daemon name
    #[must_use]
    pub fn name(&self) -> &DaemonName {
        &self.name
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SimDaemonState {
        self.state
    }

    /// Number of restarts so far
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Rank served or being taken over
    #[must_use]
    pub fn rank(&self) -> Option<Rank> {
        match self.state {
            SimDaemonState::Active { rank } | SimDaemonState::Transitioning { rank, .. } => {
                Some(rank)
            }
            _ => None,
        }
    }

    /// Whether the daemon answers commands
    #[must_use]
    pub fn is_responsive(&self) -> bool {
        matches!(
            self.state,
            SimDaemonState::Standby
                | SimDaemonState::Transitioning { .. }
                | SimDaemonState::Active { .. }
        )
    }

    /// Whether a process exists for the daemon
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.is_responsive() || matches!(self.state, SimDaemonState::Starting { .. })
    }

    /// Arm a kill point
    pub fn arm(&mut self, checkpoint: u32) {
        self.kill_at = Some(checkpoint);
    }

    /// Armed kill point, if any
    #[must_use]
    pub fn armed(&self) -> Option<u32> {
        self.kill_at
    }

    /// Start taking over `rank`
    pub fn promote(&mut self, rank: Rank, phase: &'static str, until: Instant) {
        self.state = SimDaemonState::Transitioning { rank, phase, until };
    }

    /// Step down to standby
    pub fn demote(&mut self) {
        self.state = SimDaemonState::Standby;
    }

    /// Kill the process; the monitor notices at `noticed_at`
    pub fn crash(&mut self, noticed_at: Instant, handover: bool) {
        self.state = SimDaemonState::Crashed {
            rank: self.rank(),
            noticed_at,
            handover,
        };
        self.kill_at = None;
    }

    /// Restart the process. Returns the rank the monitor must now fail over,
    /// if the daemon still held one.
    pub fn restart(&mut self, until: Option<Instant>) -> Option<Rank> {
        let orphaned = match self.state {
            SimDaemonState::Crashed { rank, .. } => rank,
            _ => self.rank(),
        };
        self.state = match until {
            Some(until) => SimDaemonState::Starting { until },
            None => SimDaemonState::Gone,
        };
        self.kill_at = None;
        self.restarts += 1;
        orphaned
    }

    /// Apply any transition due at `now`
    pub fn advance(&mut self, now: Instant) -> Option<DaemonEvent> {
        match self.state {
            SimDaemonState::Transitioning { rank, until, .. } if now >= until => {
                self.state = SimDaemonState::Active { rank };
                Some(DaemonEvent::Activated { rank })
            }
            SimDaemonState::Starting { until } if now >= until => {
                self.state = SimDaemonState::Standby;
                Some(DaemonEvent::Rejoined)
            }
            SimDaemonState::Crashed {
                rank: Some(rank),
                noticed_at,
                handover,
            } if now >= noticed_at => {
                self.state = SimDaemonState::Crashed {
                    rank: None,
                    noticed_at,
                    handover,
                };
                Some(DaemonEvent::RankFailed {
                    rank,
                    at: noticed_at,
                    handover,
                })
            }
            _ => None,
        }
    }

    /// What the monitor reports for this daemon, if it is in the map at all
    #[must_use]
    pub fn info(&self) -> Option<DaemonInfo> {
        let name = self.name.clone();
        match self.state {
            SimDaemonState::Standby => Some(DaemonInfo::standby(name)),
            SimDaemonState::Transitioning { rank, phase, .. } => {
                Some(DaemonInfo::transitional(name, rank.as_u32(), phase))
            }
            SimDaemonState::Active { rank }
            | SimDaemonState::Crashed {
                rank: Some(rank), ..
            } => Some(DaemonInfo::active(name, rank.as_u32())),
            SimDaemonState::Crashed { rank: None, .. }
            | SimDaemonState::Starting { .. }
            | SimDaemonState::Gone => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killpoint_core::DaemonState;
    use std::time::Duration;

    fn daemon() -> SimDaemon {
        SimDaemon::new(DaemonName::new("a"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_through_replay() {
        let mut d = daemon();
        let now = Instant::now();
        d.promote(Rank::new(0), "up:replay", now + Duration::from_secs(2));

        let info = d.info().unwrap();
        assert_eq!(info.state, DaemonState::Transitional("up:replay".to_string()));
        assert_eq!(d.advance(now), None);

        let event = d.advance(now + Duration::from_secs(2));
        assert_eq!(event, Some(DaemonEvent::Activated { rank: Rank::new(0) }));
        assert!(d.info().unwrap().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_stays_in_map_until_noticed() {
        let mut d = daemon();
        let now = Instant::now();
        d.promote(Rank::new(0), "up:creating", now);
        d.advance(now);
        d.arm(3);

        let noticed = now + Duration::from_secs(15);
        d.crash(noticed, true);
        assert!(!d.is_alive());
        assert_eq!(d.armed(), None);
        assert!(d.info().unwrap().is_active());

        let event = d.advance(noticed);
        assert_eq!(
            event,
            Some(DaemonEvent::RankFailed {
                rank: Rank::new(0),
                at: noticed,
                handover: true
            })
        );
        assert!(d.info().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_rejoins_as_standby() {
        let mut d = daemon();
        let now = Instant::now();
        d.crash(now, true);
        assert_eq!(d.restart(Some(now + Duration::from_secs(5))), None);
        assert!(d.is_alive());
        assert!(!d.is_responsive());
        assert!(d.info().is_none());

        assert_eq!(d.advance(now + Duration::from_secs(5)), Some(DaemonEvent::Rejoined));
        assert!(d.info().unwrap().is_standby());
        assert_eq!(d.restarts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_of_ranked_daemon_orphans_rank() {
        let mut d = daemon();
        let now = Instant::now();
        d.promote(Rank::new(1), "up:creating", now);
        d.advance(now);
        assert_eq!(d.restart(None), Some(Rank::new(1)));
        assert_eq!(d.state(), SimDaemonState::Gone);
        assert!(!d.is_alive());
    }
}
