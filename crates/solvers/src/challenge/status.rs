//! The status module holds the [ChallengeStatus] machine and the [Action] a participant takes in
//! each status.
//!
//! The ledger owns the status and advances it; participants only read it and submit the action it
//! implies. [ChallengeStatus::apply] mirrors the ledger's rules so they can be reasoned about and
//! tested locally.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The [ChallengeStatus] enum mirrors the status values reported by the Colosseum contract.
/// `None` is both the initial status (no dispute) and the terminal one (dispute resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChallengeStatus {
    None = 0,
    ChallengerTurn = 1,
    AsserterTurn = 2,
    ChallengerTimeout = 3,
    AsserterTimeout = 4,
    ReadyToProve = 5,
}

impl TryFrom<u8> for ChallengeStatus {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::ChallengerTurn),
            2 => Ok(Self::AsserterTurn),
            3 => Ok(Self::ChallengerTimeout),
            4 => Ok(Self::AsserterTimeout),
            5 => Ok(Self::ReadyToProve),
            _ => Err(anyhow!("Invalid challenge status: {}", value)),
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An event that moves a challenge from one status to another on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A challenger created the challenge, supplying the first segments.
    Created,
    /// The party whose turn it was submitted a bisection. `remaining_size` is the size of the
    /// child segment that is now under dispute.
    Bisected { remaining_size: u64 },
    /// The turn deadline passed without a submission.
    DeadlineElapsed,
    /// The challenger's validity proof for the single disputed block was accepted.
    FaultProven,
    /// The asserter (or a guardian) claimed the challenger's timeout.
    TimeoutClaimed,
    /// The challenger cancelled the challenge because the output had already been deleted.
    Cancelled,
}

impl ChallengeStatus {
    /// Returns true while a dispute is in progress.
    pub const fn is_in_progress(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns true if the status is waiting on a bisection from either party.
    pub const fn is_turn(&self) -> bool {
        matches!(self, Self::ChallengerTurn | Self::AsserterTurn)
    }

    /// Returns true if a new challenge may be created by a challenger whose own challenge is in
    /// this status.
    pub const fn allows_creation(&self) -> bool {
        matches!(self, Self::None | Self::ChallengerTimeout)
    }

    /// Applies a [Transition] following the ledger's rules.
    ///
    /// ### Returns
    /// - `Ok(ChallengeStatus)`: The status after the transition.
    /// - `Err(anyhow::Error)`: The ledger would reject the transition in this status.
    pub fn apply(self, transition: Transition) -> Result<Self> {
        use ChallengeStatus::*;

        let next = match (self, transition) {
            (None | ChallengerTimeout, Transition::Created) => AsserterTurn,
            (ChallengerTurn, Transition::Bisected { .. }) => AsserterTurn,
            (AsserterTurn, Transition::Bisected { remaining_size }) => {
                if remaining_size == 1 {
                    ReadyToProve
                } else {
                    ChallengerTurn
                }
            }
            (ChallengerTurn | ReadyToProve, Transition::DeadlineElapsed) => ChallengerTimeout,
            (AsserterTurn, Transition::DeadlineElapsed) => AsserterTimeout,
            (ReadyToProve | AsserterTimeout, Transition::FaultProven) => None,
            (ChallengerTimeout, Transition::TimeoutClaimed) => None,
            (ChallengerTurn | AsserterTurn | AsserterTimeout | ReadyToProve, Transition::Cancelled) => {
                None
            }
            (status, transition) => bail!("{:?} is not allowed in status {}", transition, status),
        };

        Ok(next)
    }

    /// Decides the [Action] a participant should take in this status.
    ///
    /// ### Takes
    /// - `role`: The role of the participant in the challenge.
    /// - `output_deleted`: Whether the disputed output has already been deleted.
    /// - `output_finalized`: Whether the disputed output has already been finalized.
    pub const fn action_for(&self, role: Role, output_deleted: bool, output_finalized: bool) -> Action {
        use ChallengeStatus::*;

        if matches!(self, None) {
            return Action::Stop;
        }

        match role {
            Role::Asserter => {
                // Once the output is gone the asserter has nothing left to defend.
                if output_deleted {
                    return Action::Stop;
                }
                if output_finalized && !matches!(self, ChallengerTimeout) {
                    return Action::Stop;
                }
                match self {
                    AsserterTurn => Action::Bisect,
                    ChallengerTimeout => Action::ClaimChallengerTimeout,
                    _ => Action::Wait,
                }
            }
            Role::Challenger => {
                if output_deleted && !matches!(self, ChallengerTimeout) {
                    return Action::Cancel;
                }
                if output_finalized {
                    return Action::Stop;
                }
                match self {
                    ChallengerTurn => Action::Bisect,
                    AsserterTimeout => Action::ProveFault {
                        skip_fault_position_selection: true,
                    },
                    ReadyToProve => Action::ProveFault {
                        skip_fault_position_selection: false,
                    },
                    _ => Action::Wait,
                }
            }
        }
    }
}

/// The [Role] a participant plays within a single challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The submitter of the disputed output.
    Asserter,
    /// The party disputing the output.
    Challenger,
}

/// An [Action] is what a participant does in response to the current [ChallengeStatus].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop handling the challenge; nothing more can be gained.
    Stop,
    /// Nothing to do this tick; poll again later.
    Wait,
    /// Select the diverging child and submit our checkpoint hashes for it.
    Bisect,
    /// Submit a validity proof for the single disputed block transition.
    ProveFault {
        /// When the asserter timed out, the disputed position is already fixed by the ledger.
        skip_fault_position_selection: bool,
    },
    /// Claim the challenger's timeout to take its bond.
    ClaimChallengerTimeout,
    /// Cancel our own challenge to recover the bond.
    Cancel,
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL: [ChallengeStatus; 6] = [
        ChallengeStatus::None,
        ChallengeStatus::ChallengerTurn,
        ChallengeStatus::AsserterTurn,
        ChallengeStatus::ChallengerTimeout,
        ChallengeStatus::AsserterTimeout,
        ChallengeStatus::ReadyToProve,
    ];

    #[test]
    fn status_round_trips_through_u8() {
        for status in ALL {
            assert_eq!(ChallengeStatus::try_from(status as u8).unwrap(), status);
        }
        assert!(ChallengeStatus::try_from(6).is_err());
    }

    #[test]
    fn none_only_leaves_through_creation() {
        let none = ChallengeStatus::None;
        assert_eq!(
            none.apply(Transition::Created).unwrap(),
            ChallengeStatus::AsserterTurn
        );
        for t in [
            Transition::Bisected { remaining_size: 4 },
            Transition::DeadlineElapsed,
            Transition::FaultProven,
            Transition::TimeoutClaimed,
            Transition::Cancelled,
        ] {
            assert!(none.apply(t).is_err(), "{:?} should be rejected", t);
        }
    }

    #[test]
    fn turn_states_advance_by_bisection_or_deadline() {
        for status in ALL.into_iter().filter(|s| s.is_in_progress()) {
            let by_action = [
                Transition::Bisected { remaining_size: 2 },
                Transition::FaultProven,
                Transition::TimeoutClaimed,
            ]
            .into_iter()
            .filter(|t| status.apply(*t).is_ok())
            .count();
            let by_deadline = status.apply(Transition::DeadlineElapsed).is_ok();

            // Timeout states are settled by a claim, never by another deadline.
            if status.is_turn() || status == ChallengeStatus::ReadyToProve {
                assert!(by_deadline);
            } else {
                assert!(!by_deadline);
            }
            assert_eq!(by_action, 1, "{} must have exactly one advancing action", status);
        }
    }

    #[test]
    fn full_bisection_game() {
        let mut status = ChallengeStatus::None.apply(Transition::Created).unwrap();
        assert_eq!(status, ChallengeStatus::AsserterTurn);

        status = status.apply(Transition::Bisected { remaining_size: 300 }).unwrap();
        assert_eq!(status, ChallengeStatus::ChallengerTurn);
        status = status.apply(Transition::Bisected { remaining_size: 30 }).unwrap();
        assert_eq!(status, ChallengeStatus::AsserterTurn);
        status = status.apply(Transition::Bisected { remaining_size: 1 }).unwrap();
        assert_eq!(status, ChallengeStatus::ReadyToProve);

        status = status.apply(Transition::FaultProven).unwrap();
        assert_eq!(status, ChallengeStatus::None);
    }

    #[test]
    fn missed_turns_time_out() {
        assert_eq!(
            ChallengeStatus::ChallengerTurn.apply(Transition::DeadlineElapsed).unwrap(),
            ChallengeStatus::ChallengerTimeout
        );
        assert_eq!(
            ChallengeStatus::AsserterTurn.apply(Transition::DeadlineElapsed).unwrap(),
            ChallengeStatus::AsserterTimeout
        );
        assert_eq!(
            ChallengeStatus::ReadyToProve.apply(Transition::DeadlineElapsed).unwrap(),
            ChallengeStatus::ChallengerTimeout
        );
        assert_eq!(
            ChallengeStatus::ChallengerTimeout.apply(Transition::TimeoutClaimed).unwrap(),
            ChallengeStatus::None
        );
    }

    #[test]
    fn asserter_actions() {
        let role = Role::Asserter;
        assert_eq!(ChallengeStatus::AsserterTurn.action_for(role, false, false), Action::Bisect);
        assert_eq!(
            ChallengeStatus::ChallengerTimeout.action_for(role, false, true),
            Action::ClaimChallengerTimeout
        );
        assert_eq!(ChallengeStatus::AsserterTurn.action_for(role, true, false), Action::Stop);
        assert_eq!(ChallengeStatus::AsserterTurn.action_for(role, false, true), Action::Stop);
        assert_eq!(ChallengeStatus::ChallengerTurn.action_for(role, false, false), Action::Wait);
        assert_eq!(ChallengeStatus::None.action_for(role, false, false), Action::Stop);
    }

    #[test]
    fn challenger_actions() {
        let role = Role::Challenger;
        assert_eq!(ChallengeStatus::ChallengerTurn.action_for(role, false, false), Action::Bisect);
        assert_eq!(
            ChallengeStatus::ReadyToProve.action_for(role, false, false),
            Action::ProveFault {
                skip_fault_position_selection: false
            }
        );
        assert_eq!(
            ChallengeStatus::AsserterTimeout.action_for(role, false, false),
            Action::ProveFault {
                skip_fault_position_selection: true
            }
        );
        assert_eq!(ChallengeStatus::ChallengerTurn.action_for(role, true, false), Action::Cancel);
        assert_eq!(ChallengeStatus::ChallengerTimeout.action_for(role, true, false), Action::Wait);
        assert_eq!(ChallengeStatus::ReadyToProve.action_for(role, false, true), Action::Stop);
        assert_eq!(ChallengeStatus::AsserterTurn.action_for(role, false, false), Action::Wait);
    }
}
