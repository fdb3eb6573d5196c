// ── Redundancy coordination ──
//
// A small explicit state machine deciding which link, if any, is the sole
// legal destination for mutating commands. Driven only by link-state
// transitions and EngineStatus reports; recomputed from the latest report
// per core so the split-brain tie-break (most recent Active report wins)
// falls out of one comparison.

use std::time::Instant;

use corelink_proto::{EngineState, EngineStatus, LinkId, LinkState};

/// Methods that may target any connected link regardless of its reported
/// engine state. Required to bootstrap status discovery itself.
const EXEMPT_METHODS: &[&str] = &["StatusGet", "NoOp", "Logon"];

/// Session topology, fixed at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Single,
    Redundant,
}

/// Current routing choice for mutating commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// No core is authoritative; mutating sends fail fast.
    #[default]
    None,
    Primary,
    Secondary,
}

impl Selection {
    pub fn link_id(self) -> Option<LinkId> {
        match self {
            Self::None => None,
            Self::Primary => Some(LinkId::Primary),
            Self::Secondary => Some(LinkId::Secondary),
        }
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Debug, Default)]
struct LinkSlot {
    state: LinkState,
    status: EngineStatus,
    /// Timestamp of the most recent report claiming Active. Cleared when a
    /// later report claims otherwise or the link drops.
    last_active_report: Option<Instant>,
}

impl LinkSlot {
    /// A link is a routing candidate while it is connected and its latest
    /// report says Active.
    fn candidacy(&self) -> Option<Instant> {
        if self.state.is_connected() && self.status.state == EngineState::Active {
            self.last_active_report
        } else {
            None
        }
    }
}

/// Tracks both links' engine status and owns the selection.
#[derive(Debug)]
pub(crate) struct Coordinator {
    topology: Topology,
    primary: LinkSlot,
    secondary: LinkSlot,
    selection: Selection,
}

impl Coordinator {
    pub(crate) fn new(topology: Topology) -> Self {
        Self {
            topology,
            primary: LinkSlot::default(),
            secondary: LinkSlot::default(),
            selection: Selection::None,
        }
    }

    pub(crate) fn selection(&self) -> Selection {
        self.selection
    }

    pub(crate) fn status(&self, link: LinkId) -> &EngineStatus {
        &self.slot(link).status
    }

    /// Returns `true` when `method` may bypass the active-core rule.
    pub(crate) fn is_exempt(method: &str) -> bool {
        EXEMPT_METHODS.contains(&method)
    }

    /// Feed a link-state transition. A link that leaves `Connected` loses
    /// its engine status; whatever it reported no longer counts.
    /// Returns the new selection when it changed.
    pub(crate) fn link_state(&mut self, link: LinkId, state: LinkState) -> Option<Selection> {
        let slot = self.slot_mut(link);
        slot.state = state;
        if !state.is_connected() {
            slot.status = EngineStatus::default();
            slot.last_active_report = None;
        }
        self.recompute()
    }

    /// Feed an engine-status report (periodic poll or unsolicited push).
    /// Returns the new selection when it changed.
    pub(crate) fn status_report(
        &mut self,
        link: LinkId,
        status: EngineStatus,
        at: Instant,
    ) -> Option<Selection> {
        let slot = self.slot_mut(link);
        if status.state == EngineState::Active {
            slot.last_active_report = Some(at);
        } else {
            slot.last_active_report = None;
        }
        slot.status = status;
        self.recompute()
    }

    fn slot(&self, link: LinkId) -> &LinkSlot {
        match link {
            LinkId::Primary => &self.primary,
            LinkId::Secondary => &self.secondary,
        }
    }

    fn slot_mut(&mut self, link: LinkId) -> &mut LinkSlot {
        match link {
            LinkId::Primary => &mut self.primary,
            LinkId::Secondary => &mut self.secondary,
        }
    }

    fn recompute(&mut self) -> Option<Selection> {
        let next = match self.topology {
            // Single core: selected whenever connected, no status logic.
            Topology::Single => {
                if self.primary.state.is_connected() {
                    Selection::Primary
                } else {
                    Selection::None
                }
            }
            Topology::Redundant => match (self.primary.candidacy(), self.secondary.candidacy()) {
                // Split brain: the most recent Active report wins and
                // revokes the previous selection.
                (Some(primary_at), Some(secondary_at)) => {
                    if secondary_at > primary_at {
                        Selection::Secondary
                    } else {
                        Selection::Primary
                    }
                }
                (Some(_), None) => Selection::Primary,
                (None, Some(_)) => Selection::Secondary,
                (None, None) => Selection::None,
            },
        };

        if next == self.selection {
            None
        } else {
            self.selection = next;
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn active() -> EngineStatus {
        EngineStatus { state: EngineState::Active, ..EngineStatus::default() }
    }

    fn standby() -> EngineStatus {
        EngineStatus { state: EngineState::Standby, ..EngineStatus::default() }
    }

    #[test]
    fn single_core_selects_whenever_connected() {
        let mut coordinator = Coordinator::new(Topology::Single);
        assert_eq!(coordinator.selection(), Selection::None);

        assert_eq!(
            coordinator.link_state(LinkId::Primary, LinkState::Connected),
            Some(Selection::Primary)
        );
        // Engine state is irrelevant in single topology.
        assert_eq!(coordinator.status_report(LinkId::Primary, standby(), Instant::now()), None);

        assert_eq!(
            coordinator.link_state(LinkId::Primary, LinkState::Disconnected),
            Some(Selection::None)
        );
    }

    #[test]
    fn redundant_selects_the_active_reporter() {
        let mut coordinator = Coordinator::new(Topology::Redundant);
        coordinator.link_state(LinkId::Primary, LinkState::Connected);
        coordinator.link_state(LinkId::Secondary, LinkState::Connected);
        assert_eq!(coordinator.selection(), Selection::None);

        let now = Instant::now();
        assert_eq!(coordinator.status_report(LinkId::Primary, standby(), now), None);
        assert_eq!(
            coordinator.status_report(LinkId::Secondary, active(), now),
            Some(Selection::Secondary)
        );
    }

    #[test]
    fn split_brain_most_recent_report_wins() {
        let mut coordinator = Coordinator::new(Topology::Redundant);
        coordinator.link_state(LinkId::Primary, LinkState::Connected);
        coordinator.link_state(LinkId::Secondary, LinkState::Connected);

        let t1 = Instant::now();
        let t2 = t1 + Duration::from_millis(100);

        assert_eq!(coordinator.status_report(LinkId::Primary, active(), t1), Some(Selection::Primary));
        // A later Active claim from the other core revokes the selection.
        assert_eq!(
            coordinator.status_report(LinkId::Secondary, active(), t2),
            Some(Selection::Secondary)
        );
        // An even later claim flips it back.
        let t3 = t2 + Duration::from_millis(100);
        assert_eq!(coordinator.status_report(LinkId::Primary, active(), t3), Some(Selection::Primary));
    }

    #[test]
    fn selection_drops_when_the_active_core_reports_standby() {
        let mut coordinator = Coordinator::new(Topology::Redundant);
        coordinator.link_state(LinkId::Primary, LinkState::Connected);

        let now = Instant::now();
        coordinator.status_report(LinkId::Primary, active(), now);
        assert_eq!(coordinator.selection(), Selection::Primary);

        assert_eq!(
            coordinator.status_report(LinkId::Primary, standby(), now + Duration::from_millis(50)),
            Some(Selection::None)
        );
    }

    #[test]
    fn disconnect_clears_candidacy_and_status() {
        let mut coordinator = Coordinator::new(Topology::Redundant);
        coordinator.link_state(LinkId::Primary, LinkState::Connected);
        coordinator.status_report(LinkId::Primary, active(), Instant::now());
        assert_eq!(coordinator.selection(), Selection::Primary);

        assert_eq!(
            coordinator.link_state(LinkId::Primary, LinkState::Disconnected),
            Some(Selection::None)
        );
        assert_eq!(coordinator.status(LinkId::Primary).state, EngineState::Unknown);
    }

    #[test]
    fn stale_active_report_does_not_survive_reconnect() {
        let mut coordinator = Coordinator::new(Topology::Redundant);
        coordinator.link_state(LinkId::Primary, LinkState::Connected);
        coordinator.status_report(LinkId::Primary, active(), Instant::now());

        coordinator.link_state(LinkId::Primary, LinkState::Disconnected);
        // Reconnected but not yet reported: no candidacy.
        assert_eq!(coordinator.link_state(LinkId::Primary, LinkState::Connected), None);
        assert_eq!(coordinator.selection(), Selection::None);
    }

    #[test]
    fn exempt_methods() {
        assert!(Coordinator::is_exempt("StatusGet"));
        assert!(Coordinator::is_exempt("NoOp"));
        assert!(Coordinator::is_exempt("Logon"));
        assert!(!Coordinator::is_exempt("Control.Set"));
        assert!(!Coordinator::is_exempt("ChangeGroup.Poll"));
    }
}
