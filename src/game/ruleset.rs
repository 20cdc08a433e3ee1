//! Rulesets.
//!
//! A ruleset is chosen with `SetRules` during Creation and never changes.
//! It fixes the teams in play, which roles may be dealt, which must be, and
//! the few switches that alter night and sunset resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::game::roles::{Frequency, Priority, RoleKind, RoleParameter, RoleTraits, TargetScope};
use crate::game::state::Team;

/// Quorum required for a stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quorum {
    /// Ballots cast are at least half the living.
    Simple,
    /// The leader's ballots are more than half the living.
    Strict,
}

/// Which end of the spectral sequence a death consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpectralDraw {
    /// Oldest draw first.
    First,
    /// Newest draw first.
    Last,
}

/// Available rule variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ruleset {
    /// Villagers against wolves.
    Classic,
    /// Three teams with necromancers and ghosts.
    Negromanti,
    /// Three teams, strict quorum, permanent amnesia, spectral sequence.
    V2,
    /// Negromanti with the spectral sequence and ghost switching.
    #[serde(rename = "negromanti_lupus_8")]
    NegromantiLupus8,
}

impl Default for Ruleset {
    fn default() -> Self {
        Ruleset::Negromanti
    }
}

impl Ruleset {
    /// Teams taking part.
    pub fn teams(self) -> &'static [Team] {
        match self {
            Ruleset::Classic => &[Team::Villagers, Team::Wolves],
            Ruleset::Negromanti | Ruleset::V2 | Ruleset::NegromantiLupus8 => {
                &[Team::Villagers, Team::Wolves, Team::Necromancers]
            }
        }
    }

    /// Whether `kind` may appear in a game.
    pub fn includes(self, kind: RoleKind) -> bool {
        use RoleKind::*;
        match self {
            Ruleset::Classic => {
                kind.traits().team != Team::Necromancers
                    && !matches!(kind, Keeper | Exorcist | Shaman | Alcoholic)
            }
            Ruleset::Negromanti => !matches!(kind, Alcoholic | Delusion),
            Ruleset::V2 => !matches!(kind, Keeper | Renegade | Hypnotist | Medium | Scrutineer | Corruption),
            Ruleset::NegromantiLupus8 => {
                !matches!(kind, Keeper | Alcoholic | Hypnotist | Medium | Scrutineer | Amnesia | Hypnosis)
            }
        }
    }

    /// Every role tag that may appear in a game, ghosts included.
    pub fn valid_roles(self) -> Vec<RoleKind> {
        RoleKind::ALL.into_iter().filter(|kind| self.includes(*kind)).collect()
    }

    /// Roles that may be dealt at game start.
    pub fn starting_roles(self) -> Vec<RoleKind> {
        self.valid_roles().into_iter().filter(|kind| !kind.is_ghost()).collect()
    }

    /// Ghost powers of this ruleset.
    pub fn ghost_powers(self) -> Vec<RoleKind> {
        self.valid_roles().into_iter().filter(|kind| kind.is_ghost()).collect()
    }

    /// Ghost powers the necromancers may hand out.
    pub fn necromancer_powers(self) -> Vec<RoleKind> {
        use RoleKind::*;
        match self {
            Ruleset::Classic => Vec::new(),
            Ruleset::Negromanti => self.ghost_powers(),
            Ruleset::V2 | Ruleset::NegromantiLupus8 => [Amnesia, Confusion, Illusion, Death, Occultation, Vision]
                .into_iter()
                .filter(|kind| self.includes(*kind))
                .collect(),
        }
    }

    /// Ghost powers a dying Phantom may draw, in draw order.
    pub fn phantom_powers(self) -> Vec<RoleKind> {
        RoleKind::PHANTOM_POWERS.into_iter().filter(|kind| self.includes(*kind)).collect()
    }

    /// Roles that must be dealt for the game to start.
    pub fn required_roles(self) -> &'static [RoleKind] {
        match self {
            Ruleset::Classic => &[RoleKind::Wolf],
            Ruleset::Negromanti | Ruleset::V2 | Ruleset::NegromantiLupus8 => {
                &[RoleKind::Wolf, RoleKind::Necromancer]
            }
        }
    }

    /// Stake quorum.
    pub fn quorum(self) -> Quorum {
        match self {
            Ruleset::V2 => Quorum::Strict,
            Ruleset::Classic | Ruleset::Negromanti | Ruleset::NegromantiLupus8 => Quorum::Simple,
        }
    }

    /// Traits of `kind` in games played under these rules.
    pub fn traits(self, kind: RoleKind) -> RoleTraits {
        let mut traits = kind.traits();
        match (self, kind) {
            (Ruleset::V2, RoleKind::Soothsayer) => {
                traits.priority = Priority::QUERY;
                traits.frequency = Frequency::EveryOtherNight;
                traits.targets = Some(TargetScope::Alive);
                traits.parameter = Some(RoleParameter::Role);
            }
            (Ruleset::V2, RoleKind::Witch) => traits.parameter = Some(RoleParameter::Role),
            (Ruleset::V2, RoleKind::Confusion) => {
                traits.targets2 = None;
                traits.parameter = Some(RoleParameter::Role);
            }
            (Ruleset::V2, RoleKind::Amnesia) => {
                traits.priority = Priority::MODIFY;
                traits.frequency = Frequency::EveryOtherNight;
            }
            (Ruleset::V2, RoleKind::Necromancer) => {
                traits.priority = Priority::MODIFY;
                traits.acts_when_dead = true;
            }
            (Ruleset::NegromantiLupus8, RoleKind::Necromancer) => traits.priority = Priority::MODIFY,
            (Ruleset::V2 | Ruleset::NegromantiLupus8, RoleKind::Devil | RoleKind::Vision) => {
                traits.parameter = Some(RoleParameter::RoleSet);
            }
            _ => {}
        }
        traits
    }

    /// End of the spectral sequence consumed by deaths, if the rules have one.
    pub fn spectral_draw(self) -> Option<SpectralDraw> {
        match self {
            Ruleset::V2 => Some(SpectralDraw::First),
            Ruleset::NegromantiLupus8 => Some(SpectralDraw::Last),
            Ruleset::Classic | Ruleset::Negromanti => None,
        }
    }

    /// Necromancers move ghost powers between ghosts instead of raising the
    /// dead.
    pub fn necromancers_switch_ghosts(self) -> bool {
        matches!(self, Ruleset::V2 | Ruleset::NegromantiLupus8)
    }

    /// Role set questions are answered on the true role, not the apparent one.
    pub fn role_set_reads_true_role(self) -> bool {
        self == Ruleset::NegromantiLupus8
    }

    /// Whether `truths` true propositions out of `total` is an acceptable
    /// Soothsayer model.
    pub fn soothsayer_truths_valid(self, truths: usize, total: usize) -> bool {
        match self {
            Ruleset::V2 => truths > 0 && truths < total,
            Ruleset::Classic | Ruleset::Negromanti | Ruleset::NegromantiLupus8 => truths == 2,
        }
    }

    /// Amnesia silences its target for the rest of the game.
    pub fn permanent_amnesia(self) -> bool {
        self == Ruleset::V2
    }

    /// Wolves may kill any unguarded target, not only villagers.
    pub fn wolves_kill_anyone(self) -> bool {
        self == Ruleset::V2
    }

    /// Ghost powers that only take hold on mystic targets.
    pub fn mystic_only(self, power: RoleKind) -> bool {
        match self {
            Ruleset::Negromanti | Ruleset::NegromantiLupus8 => {
                matches!(power, RoleKind::Corruption | RoleKind::Death)
            }
            Ruleset::Classic | Ruleset::V2 => false,
        }
    }

    /// Identifier used in dumps and environment variables.
    pub fn name(self) -> &'static str {
        match self {
            Ruleset::Classic => "classic",
            Ruleset::Negromanti => "negromanti",
            Ruleset::V2 => "v2",
            Ruleset::NegromantiLupus8 => "negromanti_lupus_8",
        }
    }
}

impl fmt::Display for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Ruleset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" => Ok(Ruleset::Classic),
            "negromanti" | "v1" => Ok(Ruleset::Negromanti),
            "v2" => Ok(Ruleset::V2),
            "negromanti_lupus_8" => Ok(Ruleset::NegromantiLupus8),
            other => Err(format!("unknown ruleset {other}")),
        }
    }
}
