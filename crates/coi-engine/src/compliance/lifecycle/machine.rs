use crate::compliance::domain::CoiStatus;

/// Edges of the COI state machine. REJECTED and EXPIRED have no outgoing edges;
/// a renewal is a new submission.
const TRANSITIONS: &[(CoiStatus, CoiStatus)] = &[
    (CoiStatus::Pending, CoiStatus::Approved),
    (CoiStatus::Pending, CoiStatus::Rejected),
    (CoiStatus::Pending, CoiStatus::Expired),
    (CoiStatus::Approved, CoiStatus::Expired),
];

impl CoiStatus {
    pub fn can_transition_to(self, next: CoiStatus) -> bool {
        TRANSITIONS.contains(&(self, next))
    }

    pub fn is_terminal(self) -> bool {
        !TRANSITIONS.iter().any(|(from, _)| *from == self)
    }
}

/// Rejected move between two statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move certificate from {from} to {to}")]
pub struct IllegalTransition {
    pub from: CoiStatus,
    pub to: CoiStatus,
}

pub(crate) fn check_transition(from: CoiStatus, to: CoiStatus) -> Result<(), IllegalTransition> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}
