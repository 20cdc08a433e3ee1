//! Game Events
//!
//! Events are the only source of truth: the projection is whatever replaying
//! them produces. Non-automatic events come from players and the moderator
//! and are persisted; automatic events are generated by the engine while
//! applying others and can always be derived again.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::roles::RoleKind;
use crate::game::ruleset::Ruleset;
use crate::game::state::{Aura, PlayerId, Team};
use crate::game::turn::{Phase, TurnKey};

/// Player command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Record a night power. A missing target withdraws the action.
    UsePower {
        /// Acting player.
        player: PlayerId,
        /// First target.
        target: Option<PlayerId>,
        /// Second target.
        target2: Option<PlayerId>,
        /// Single role parameter.
        role_class: Option<RoleKind>,
        /// Role set parameter.
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        role_set: BTreeSet<RoleKind>,
    },
    /// Stake ballot.
    Vote {
        /// Voter.
        player: PlayerId,
        /// Choice; `None` abstains.
        target: Option<PlayerId>,
    },
    /// Mayor ballot.
    Elect {
        /// Voter.
        player: PlayerId,
        /// Choice; `None` abstains.
        target: Option<PlayerId>,
    },
    /// Mayor chooses a successor.
    Appoint {
        /// Mayor.
        player: PlayerId,
        /// Successor; `None` withdraws the appointment.
        target: Option<PlayerId>,
    },
}

impl Command {
    /// Issuing player.
    pub fn player(&self) -> PlayerId {
        match self {
            Command::UsePower { player, .. }
            | Command::Vote { player, .. }
            | Command::Elect { player, .. }
            | Command::Appoint { player, .. } => *player,
        }
    }
}

/// Cause of a mayor change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MayorCause {
    /// Drawn at game start.
    Beginning,
    /// Elected at sunset.
    Elect,
    /// Drawn after the mayor died.
    SuccessionRandom,
    /// Deputy took over.
    SuccessionChosen,
}

/// Which ballot an announcement refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BallotKind {
    /// Stake.
    Vote,
    /// Mayor election.
    Elect,
}

/// Cause of a death.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathCause {
    /// Burned at sunset.
    Stake,
    /// Shot by the Hunter.
    Hunter,
    /// Eaten by the wolves.
    Wolves,
    /// Killed by the Assassin.
    Assassin,
    /// Killed by the Ghost of Death.
    DeathGhost,
}

impl DeathCause {
    /// Phase in which this death can happen.
    pub fn phase(self) -> Phase {
        match self {
            DeathCause::Stake => Phase::Sunset,
            _ => Phase::Dawn,
        }
    }
}

/// Why a stake did not happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeFailedCause {
    /// Not enough ballots.
    MissingQuorum,
    /// Vetoed by an Advocate.
    Advocate,
}

/// Source of a knowledge event.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnowledgeCause {
    Soothsayer,
    Expansive,
    KnowledgeClass,
    Ghost,
    Phantom,
    Devil,
    Vision,
    Medium,
    Corruption,
    Necrophiliac,
    Seer,
    Detective,
    Mage,
    Stalker,
    Voyeur,
    Keeper,
    Guard,
    SpectralSequence,
}

/// Role whose power produced a transformation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformationCause {
    /// Transformist.
    Transformist,
    /// Necrophiliac.
    Necrophiliac,
}

/// How a player became a ghost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GhostificationCause {
    /// Raised by the necromancers.
    Necromancer,
    /// A Phantom died.
    Phantom,
    /// A villager died while the spectral sequence said so.
    SpectralSequence,
}

/// Why a player left the game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExileCause {
    /// Disqualified by the moderator.
    Disqualification,
    /// Their team was defeated.
    TeamDefeat,
}

/// How the game ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VictoryCause {
    /// One team survived.
    Natural,
    /// Declared by the moderator.
    Forced,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventData {
    // -- injected --------------------------------------------------------
    /// Player command.
    Command(Command),
    /// Seed of the game's random stream.
    Seed {
        /// Seed value.
        seed: u64,
    },
    /// Ruleset choice.
    SetRules {
        /// Chosen rules.
        ruleset: Ruleset,
    },
    /// One role of the deck; the last one deals the roles.
    AvailableRole {
        /// Role added to the deck.
        role: RoleKind,
    },
    /// Draws deciding which dead villagers become ghosts.
    SpectralSequence {
        /// One draw per death, consumed in ruleset order.
        sequence: Vec<bool>,
    },
    /// Proposition given to a Soothsayer.
    SoothsayerModel {
        /// Receiving Soothsayer.
        soothsayer: PlayerId,
        /// Subject of the proposition.
        target: PlayerId,
        /// Claimed role.
        advertised_role: RoleKind,
    },
    /// Moderator disqualifies a player.
    Disqualification {
        /// Disqualified player.
        player: PlayerId,
        /// Message for the player.
        private_message: String,
        /// Message for everybody.
        public_message: Option<String>,
    },
    /// Moderator ends the game.
    ForceVictory {
        /// Winning teams.
        winners: Vec<Team>,
    },
    /// Moderator announcement.
    FreeText {
        /// Text.
        text: String,
    },

    // -- generated -------------------------------------------------------
    /// Role dealt at start.
    SetRole {
        /// Receiving player.
        player: PlayerId,
        /// Dealt role.
        role: RoleKind,
    },
    /// Mayor change.
    SetMayor {
        /// New mayor; `None` once nobody is left.
        player: Option<PlayerId>,
        /// Cause.
        cause: MayorCause,
    },
    /// One ballot, as announced at sunset.
    VoteAnnounced {
        /// Voter.
        voter: PlayerId,
        /// Effective choice.
        voted: PlayerId,
        /// Ballot kind.
        kind: BallotKind,
    },
    /// Ballot count for one player.
    TallyAnnounced {
        /// Voted player.
        voted: PlayerId,
        /// Number of ballots.
        votes: u32,
        /// Ballot kind.
        kind: BallotKind,
    },
    /// A dead player returns.
    PlayerResurrects {
        /// Resurrected player.
        player: PlayerId,
    },
    /// A player takes a dead player's role.
    Transformation {
        /// Transforming player.
        player: PlayerId,
        /// Dead player copied.
        target: PlayerId,
        /// New role.
        role: RoleKind,
        /// Cause.
        cause: TransformationCause,
    },
    /// A player turns Necromancer.
    Corruption {
        /// Corrupted player.
        player: PlayerId,
    },
    /// Nobody burns today.
    StakeFailed {
        /// Cause.
        cause: StakeFailedCause,
    },
    /// A player is killed; the death is applied at bookkeeping.
    PlayerDies {
        /// Victim.
        player: PlayerId,
        /// Cause.
        cause: DeathCause,
    },
    /// `player` learns the role of `target`.
    RoleKnowledge {
        /// Learner.
        player: PlayerId,
        /// Subject.
        target: PlayerId,
        /// Role learned.
        role: RoleKind,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// `player` learns that `target` is not `role`.
    NegativeRoleKnowledge {
        /// Learner.
        player: PlayerId,
        /// Subject.
        target: PlayerId,
        /// Role excluded.
        role: RoleKind,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// `player` learns whether the role of `target` is among `roles`.
    MultipleRoleKnowledge {
        /// Learner.
        player: PlayerId,
        /// Subject.
        target: PlayerId,
        /// Roles asked about.
        roles: BTreeSet<RoleKind>,
        /// Whether the role is one of them.
        response: bool,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// `player` learns the aura of `target`.
    AuraKnowledge {
        /// Learner.
        player: PlayerId,
        /// Subject.
        target: PlayerId,
        /// Aura learned.
        aura: Aura,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// `player` learns whether `target` is mystic.
    MysticityKnowledge {
        /// Learner.
        player: PlayerId,
        /// Subject.
        target: PlayerId,
        /// Mysticity learned.
        is_mystic: bool,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// A movement between `target` and `target2` was seen.
    MovementKnowledge {
        /// Watcher.
        player: PlayerId,
        /// Watched player.
        target: PlayerId,
        /// Destination (Stalker) or visitor (Voyeur).
        target2: PlayerId,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// No movement was seen.
    NoMovementKnowledge {
        /// Watcher.
        player: PlayerId,
        /// Watched player.
        target: PlayerId,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// Number of visitors of `target`.
    QuantitativeMovementKnowledge {
        /// Watcher.
        player: PlayerId,
        /// Watched player.
        target: PlayerId,
        /// Visitor count.
        visitors: u32,
        /// Cause.
        cause: KnowledgeCause,
    },
    /// `player` now votes like `hypnotist`.
    Hypnotization {
        /// Hypnotized player.
        player: PlayerId,
        /// Hypnotist.
        hypnotist: PlayerId,
    },
    /// A dead player becomes a ghost.
    Ghostification {
        /// New ghost.
        player: PlayerId,
        /// Ghost power.
        ghost: RoleKind,
        /// Cause.
        cause: GhostificationCause,
    },
    /// A ghost receives another power.
    GhostSwitch {
        /// Ghost.
        player: PlayerId,
        /// New power.
        ghost: RoleKind,
        /// Cause.
        cause: GhostificationCause,
    },
    /// A Phantom found no power left.
    GhostificationFailed {
        /// Phantom.
        player: PlayerId,
    },
    /// Result of a recorded power.
    PowerOutcome {
        /// Acting player.
        player: PlayerId,
        /// Recorded target.
        target: PlayerId,
        /// The effect was applied.
        success: bool,
        /// The player was sequestrated.
        sequestrated: bool,
    },
    /// A player leaves the game.
    Exile {
        /// Exiled player.
        player: PlayerId,
        /// Cause.
        cause: ExileCause,
    },
    /// The game ends.
    Victory {
        /// Winning teams.
        winners: Vec<Team>,
        /// Cause.
        cause: VictoryCause,
    },
}

impl EventData {
    /// Generated by the engine and derivable by replay.
    pub fn is_automatic(&self) -> bool {
        !matches!(
            self,
            EventData::Command(_)
                | EventData::Seed { .. }
                | EventData::SetRules { .. }
                | EventData::AvailableRole { .. }
                | EventData::SpectralSequence { .. }
                | EventData::SoothsayerModel { .. }
                | EventData::Disqualification { .. }
                | EventData::ForceVictory { .. }
                | EventData::FreeText { .. }
        )
    }

    /// Safe to apply inside a speculative simulation.
    pub fn can_be_simulated(&self) -> bool {
        !matches!(self, EventData::SetMayor { .. })
    }

    /// Phases in which the event may occur.
    pub fn relevant_phases(&self) -> &'static [Phase] {
        use Phase::*;
        match self {
            EventData::Command(Command::UsePower { .. }) => &[Night],
            EventData::Command(Command::Vote { .. } | Command::Elect { .. }) => &[Day],
            EventData::Command(Command::Appoint { .. }) => &[Day, Night],
            EventData::Seed { .. }
            | EventData::SetRules { .. }
            | EventData::AvailableRole { .. }
            | EventData::SpectralSequence { .. }
            | EventData::SoothsayerModel { .. }
            | EventData::SetRole { .. } => &[Creation],
            EventData::Disqualification { .. } => &[Day, Night],
            EventData::ForceVictory { .. } => &[Dawn, Sunset],
            EventData::FreeText { .. } => &[Creation, Night, Dawn, Day, Sunset],
            EventData::SetMayor { cause, .. } => match cause {
                MayorCause::Beginning => &[Creation],
                MayorCause::Elect => &[Sunset],
                MayorCause::SuccessionRandom | MayorCause::SuccessionChosen => &[Dawn, Sunset],
            },
            EventData::VoteAnnounced { .. }
            | EventData::TallyAnnounced { .. }
            | EventData::StakeFailed { .. } => &[Sunset],
            EventData::PlayerDies { cause, .. } => match cause {
                DeathCause::Stake => &[Sunset],
                _ => &[Dawn],
            },
            EventData::RoleKnowledge { cause, .. } => match cause {
                KnowledgeCause::KnowledgeClass => &[Creation],
                KnowledgeCause::Soothsayer => &[Creation, Dawn],
                KnowledgeCause::Ghost | KnowledgeCause::Phantom | KnowledgeCause::SpectralSequence => {
                    &[Dawn, Sunset]
                }
                _ => &[Dawn],
            },
            EventData::PlayerResurrects { .. }
            | EventData::Transformation { .. }
            | EventData::Corruption { .. }
            | EventData::NegativeRoleKnowledge { .. }
            | EventData::MultipleRoleKnowledge { .. }
            | EventData::GhostSwitch { .. }
            | EventData::AuraKnowledge { .. }
            | EventData::MysticityKnowledge { .. }
            | EventData::MovementKnowledge { .. }
            | EventData::NoMovementKnowledge { .. }
            | EventData::QuantitativeMovementKnowledge { .. }
            | EventData::Hypnotization { .. }
            | EventData::PowerOutcome { .. } => &[Dawn],
            EventData::Ghostification { .. }
            | EventData::GhostificationFailed { .. }
            | EventData::Exile { .. }
            | EventData::Victory { .. } => &[Dawn, Sunset],
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            EventData::Command(Command::UsePower { .. }) => "UsePower",
            EventData::Command(Command::Vote { .. }) => "Vote",
            EventData::Command(Command::Elect { .. }) => "Elect",
            EventData::Command(Command::Appoint { .. }) => "Appoint",
            EventData::Seed { .. } => "Seed",
            EventData::SetRules { .. } => "SetRules",
            EventData::AvailableRole { .. } => "AvailableRole",
            EventData::SpectralSequence { .. } => "SpectralSequence",
            EventData::SoothsayerModel { .. } => "SoothsayerModel",
            EventData::Disqualification { .. } => "Disqualification",
            EventData::ForceVictory { .. } => "ForceVictory",
            EventData::FreeText { .. } => "FreeText",
            EventData::SetRole { .. } => "SetRole",
            EventData::SetMayor { .. } => "SetMayor",
            EventData::VoteAnnounced { .. } => "VoteAnnounced",
            EventData::TallyAnnounced { .. } => "TallyAnnounced",
            EventData::PlayerResurrects { .. } => "PlayerResurrects",
            EventData::Transformation { .. } => "Transformation",
            EventData::Corruption { .. } => "Corruption",
            EventData::StakeFailed { .. } => "StakeFailed",
            EventData::PlayerDies { .. } => "PlayerDies",
            EventData::RoleKnowledge { .. } => "RoleKnowledge",
            EventData::NegativeRoleKnowledge { .. } => "NegativeRoleKnowledge",
            EventData::MultipleRoleKnowledge { .. } => "MultipleRoleKnowledge",
            EventData::AuraKnowledge { .. } => "AuraKnowledge",
            EventData::MysticityKnowledge { .. } => "MysticityKnowledge",
            EventData::MovementKnowledge { .. } => "MovementKnowledge",
            EventData::NoMovementKnowledge { .. } => "NoMovementKnowledge",
            EventData::QuantitativeMovementKnowledge { .. } => "QuantitativeMovementKnowledge",
            EventData::Hypnotization { .. } => "Hypnotization",
            EventData::Ghostification { .. } => "Ghostification",
            EventData::GhostSwitch { .. } => "GhostSwitch",
            EventData::GhostificationFailed { .. } => "GhostificationFailed",
            EventData::PowerOutcome { .. } => "PowerOutcome",
            EventData::Exile { .. } => "Exile",
            EventData::Victory { .. } => "Victory",
        }
    }
}

/// An event placed in game time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Turn the event belongs to.
    pub turn: TurnKey,
    /// Game time of the event.
    pub timestamp: DateTime<Utc>,
    /// Per-turn sequence assigned by the log; `None` for events that were
    /// never persisted.
    pub sequence: Option<u64>,
    /// Payload.
    pub data: EventData,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automatic_flags() {
        let vote = EventData::Command(Command::Vote { player: PlayerId(0), target: None });
        assert!(!vote.is_automatic());
        assert!(EventData::PlayerDies { player: PlayerId(1), cause: DeathCause::Wolves }.is_automatic());
        assert!(!EventData::FreeText { text: "hi".into() }.is_automatic());
    }

    #[test]
    fn test_only_mayor_changes_are_not_simulated() {
        let mayor = EventData::SetMayor { player: Some(PlayerId(0)), cause: MayorCause::Elect };
        assert!(!mayor.can_be_simulated());
        assert!(EventData::StakeFailed { cause: StakeFailedCause::MissingQuorum }.can_be_simulated());
    }

    #[test]
    fn test_relevant_phases() {
        let power = EventData::Command(Command::UsePower {
            player: PlayerId(0),
            target: Some(PlayerId(1)),
            target2: None,
            role_class: None,
            role_set: BTreeSet::new(),
        });
        assert_eq!(power.relevant_phases(), &[Phase::Night]);
        assert!(!EventData::SpectralSequence { sequence: vec![true] }.is_automatic());

        let told = EventData::RoleKnowledge {
            player: PlayerId(0),
            target: PlayerId(1),
            role: RoleKind::Delusion,
            cause: KnowledgeCause::SpectralSequence,
        };
        assert_eq!(told.relevant_phases(), &[Phase::Dawn, Phase::Sunset]);

        let stake = EventData::PlayerDies { player: PlayerId(0), cause: DeathCause::Stake };
        assert_eq!(stake.relevant_phases(), &[Phase::Sunset]);
        assert_eq!(DeathCause::Hunter.phase(), Phase::Dawn);
    }

    #[test]
    fn test_json_shape() {
        let data = EventData::Command(Command::Vote { player: PlayerId(2), target: Some(PlayerId(5)) });
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"Command":{"Vote":{"player":2,"target":5}}}"#);
        let back: EventData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);

        // Role sets are omitted when empty and default when missing.
        let json = r#"{"Command":{"UsePower":{"player":1,"target":2,"target2":null,"role_class":null}}}"#;
        let power: EventData = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&power).unwrap(), json);
    }
}
