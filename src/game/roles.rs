//! Role Catalog
//!
//! Every role is a tag of the closed [`RoleKind`] enum. The static
//! properties of a tag live in one [`RoleTraits`] table; the per-assignment
//! state (recorded targets, last usage) lives in [`Role`]. Night effects are
//! dispatched on the tag in [`crate::game::powers`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Deserialize};

use crate::game::state::{Aura, PlayerId, Team};
use crate::game::turn::{TurnKey, FIRST_DATE};

// =============================================================================
// PRIORITY
// =============================================================================

/// Application order at dawn. Lower acts first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    /// Powers that block other powers.
    pub const BLOCK: Priority = Priority(0);
    /// Powers that alter what query powers see.
    pub const QUERY_INFLUENCE: Priority = Priority(10);
    /// Powers that alter what modify powers can do.
    pub const MODIFY_INFLUENCE: Priority = Priority(20);
    /// Powers that read the state.
    pub const QUERY: Priority = Priority(30);
    /// Powers that change the state.
    pub const MODIFY: Priority = Priority(40);
    /// Powers that kill.
    pub const KILLER: Priority = Priority(50);
    /// Powers that act after killers.
    pub const POST_MORTEM: Priority = Priority(60);
    /// Roles without a power.
    pub const USELESS: Priority = Priority(70);

    /// Sub-tier acting right after `self`.
    pub const fn after(self) -> Priority {
        Priority(self.0 + 1)
    }
}

/// How often a power can be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    /// No power.
    Never,
    /// Every night.
    EveryNight,
    /// At least two days between uses.
    EveryOtherNight,
    /// Once per game.
    OnceAGame,
}

/// Argument a power takes besides its targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleParameter {
    /// A ghost power still available to the necromancers.
    GhostPower,
    /// One role that can be dealt under the ruleset.
    Role,
    /// A non-empty set of roles that can be dealt under the ruleset.
    RoleSet,
}

/// Set of players a power may target. The actor is always excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetScope {
    /// Active living players.
    Alive,
    /// Active dead players.
    Dead,
    /// Every active player.
    Everybody,
}

// =============================================================================
// ROLE KIND
// =============================================================================

/// Closed set of role tags.
///
/// Variant order is the canonical catalog order; it is used wherever the
/// engine iterates over roles (ghost power draws, used power sets).
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    // Villagers
    Villager,
    Hunter,
    Keeper,
    Soothsayer,
    Exorcist,
    Expansive,
    Guard,
    Detective,
    Mage,
    Mason,
    Messiah,
    Shaman,
    Stalker,
    Transformist,
    Seer,
    Voyeur,
    // Wolves
    Wolf,
    Assassin,
    Advocate,
    Devil,
    Witch,
    Necrophiliac,
    Renegade,
    Alcoholic,
    Sequestrator,
    Sorcerer,
    // Necromancers
    Necromancer,
    Phantom,
    Hypnotist,
    Medium,
    Scrutineer,
    // Ghost powers
    Amnesia,
    Confusion,
    Corruption,
    Illusion,
    Hypnosis,
    Death,
    Occultation,
    Vision,
    Delusion,
}

/// Static properties of a role tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleTraits {
    /// Starting team.
    pub team: Team,
    /// Aura; ghosts keep the aura of their previous role.
    pub aura: Option<Aura>,
    /// Mysticity; ghosts keep the previous value.
    pub is_mystic: Option<bool>,
    /// Dawn application order.
    pub priority: Priority,
    /// Usage frequency.
    pub frequency: Frequency,
    /// First target scope, `None` for roles without a power.
    pub targets: Option<TargetScope>,
    /// Second target scope.
    pub targets2: Option<TargetScope>,
    /// Members of the same class learn each other's role at start.
    pub knowledge_class: Option<u8>,
    /// Whether the power works on the first night.
    pub can_act_first_night: bool,
    /// Blocks powers that can themselves block.
    pub critical_blocker: bool,
    /// Blocked players are sequestrated (do not move).
    pub sequester: bool,
    /// Ghost power, held by a dead player.
    pub ghost: bool,
    /// Extra argument of the power.
    pub parameter: Option<RoleParameter>,
    /// The power stays usable after death, once.
    pub acts_when_dead: bool,
}

impl RoleTraits {
    const fn plain(team: Team, aura: Aura, is_mystic: bool) -> Self {
        Self {
            team,
            aura: Some(aura),
            is_mystic: Some(is_mystic),
            priority: Priority::USELESS,
            frequency: Frequency::Never,
            targets: None,
            targets2: None,
            knowledge_class: None,
            can_act_first_night: true,
            critical_blocker: false,
            sequester: false,
            ghost: false,
            parameter: None,
            acts_when_dead: false,
        }
    }

    const fn ghost(priority: Priority, frequency: Frequency, targets: TargetScope) -> Self {
        Self {
            team: Team::Necromancers,
            aura: None,
            is_mystic: None,
            priority,
            frequency,
            targets: Some(targets),
            targets2: None,
            knowledge_class: None,
            can_act_first_night: true,
            critical_blocker: false,
            sequester: false,
            ghost: true,
            parameter: None,
            acts_when_dead: false,
        }
    }

    /// Ghost without a power.
    const fn spectre() -> Self {
        let mut traits = Self::ghost(Priority::USELESS, Frequency::Never, TargetScope::Dead);
        traits.targets = None;
        traits
    }

    const fn power(mut self, priority: Priority, frequency: Frequency, targets: TargetScope) -> Self {
        self.priority = priority;
        self.frequency = frequency;
        self.targets = Some(targets);
        self
    }

    const fn class(mut self, knowledge_class: u8) -> Self {
        self.knowledge_class = Some(knowledge_class);
        self
    }

    const fn second(mut self, targets2: TargetScope) -> Self {
        self.targets2 = Some(targets2);
        self
    }

    const fn not_first_night(mut self) -> Self {
        self.can_act_first_night = false;
        self
    }

    const fn critical(mut self) -> Self {
        self.critical_blocker = true;
        self
    }

    const fn param(mut self, parameter: RoleParameter) -> Self {
        self.parameter = Some(parameter);
        self
    }
}

impl RoleKind {
    /// Every tag in catalog order.
    pub const ALL: [RoleKind; 40] = [
        RoleKind::Villager, RoleKind::Hunter, RoleKind::Keeper, RoleKind::Soothsayer,
        RoleKind::Exorcist, RoleKind::Expansive, RoleKind::Guard, RoleKind::Detective,
        RoleKind::Mage, RoleKind::Mason, RoleKind::Messiah, RoleKind::Shaman,
        RoleKind::Stalker, RoleKind::Transformist, RoleKind::Seer, RoleKind::Voyeur,
        RoleKind::Wolf, RoleKind::Assassin, RoleKind::Advocate, RoleKind::Devil,
        RoleKind::Witch, RoleKind::Necrophiliac, RoleKind::Renegade, RoleKind::Alcoholic,
        RoleKind::Sequestrator, RoleKind::Sorcerer, RoleKind::Necromancer, RoleKind::Phantom,
        RoleKind::Hypnotist, RoleKind::Medium, RoleKind::Scrutineer, RoleKind::Amnesia,
        RoleKind::Confusion, RoleKind::Corruption, RoleKind::Illusion, RoleKind::Hypnosis,
        RoleKind::Death, RoleKind::Occultation, RoleKind::Vision, RoleKind::Delusion,
    ];

    /// Powers a dying Phantom may draw, in draw order.
    pub const PHANTOM_POWERS: [RoleKind; 6] = [
        RoleKind::Amnesia,
        RoleKind::Confusion,
        RoleKind::Illusion,
        RoleKind::Hypnosis,
        RoleKind::Occultation,
        RoleKind::Vision,
    ];

    /// Static properties of this tag.
    pub const fn traits(self) -> RoleTraits {
        use Aura::{Black, White};
        use Frequency::*;
        use TargetScope::*;
        use Team::*;

        match self {
            RoleKind::Villager => RoleTraits::plain(Villagers, White, false),
            RoleKind::Hunter => RoleTraits::plain(Villagers, Black, false)
                .power(Priority::KILLER, OnceAGame, Alive)
                .not_first_night(),
            RoleKind::Keeper => RoleTraits::plain(Villagers, White, false)
                .power(Priority::MODIFY_INFLUENCE, EveryOtherNight, Dead),
            RoleKind::Soothsayer => RoleTraits::plain(Villagers, White, true),
            RoleKind::Exorcist => RoleTraits::plain(Villagers, White, true)
                .power(Priority::BLOCK, EveryOtherNight, Everybody)
                .critical(),
            RoleKind::Expansive => RoleTraits::plain(Villagers, White, false)
                .power(Priority::QUERY, EveryOtherNight, Alive),
            RoleKind::Guard => RoleTraits::plain(Villagers, White, false)
                .power(Priority::MODIFY_INFLUENCE, EveryNight, Alive),
            RoleKind::Detective => RoleTraits::plain(Villagers, White, false)
                .power(Priority::QUERY, EveryNight, Dead),
            RoleKind::Mage => RoleTraits::plain(Villagers, White, true)
                .power(Priority::QUERY, EveryNight, Everybody),
            RoleKind::Mason => RoleTraits::plain(Villagers, White, false).class(0),
            RoleKind::Messiah => RoleTraits::plain(Villagers, White, true)
                .power(Priority::MODIFY, OnceAGame, Dead),
            RoleKind::Shaman => RoleTraits::plain(Villagers, Black, true)
                .power(Priority::BLOCK, EveryOtherNight, Dead)
                .critical(),
            RoleKind::Stalker => RoleTraits::plain(Villagers, White, false)
                .power(Priority::QUERY, EveryOtherNight, Alive),
            RoleKind::Transformist => RoleTraits::plain(Villagers, Black, false)
                .power(Priority::MODIFY, OnceAGame, Dead),
            RoleKind::Seer => RoleTraits::plain(Villagers, White, true)
                .power(Priority::QUERY, EveryNight, Alive),
            RoleKind::Voyeur => RoleTraits::plain(Villagers, White, false)
                .power(Priority::QUERY, EveryOtherNight, Alive),

            RoleKind::Wolf => RoleTraits::plain(Wolves, Black, false)
                .power(Priority::KILLER, EveryNight, Alive)
                .class(1)
                .not_first_night(),
            RoleKind::Assassin => RoleTraits::plain(Wolves, Black, false)
                .power(Priority::KILLER, EveryOtherNight, Alive)
                .class(2)
                .not_first_night(),
            RoleKind::Advocate => RoleTraits::plain(Wolves, Black, false)
                .power(Priority::MODIFY, EveryOtherNight, Alive)
                .class(2),
            RoleKind::Devil => RoleTraits::plain(Wolves, Black, true)
                .power(Priority::QUERY, EveryNight, Alive)
                .class(3),
            RoleKind::Witch => RoleTraits::plain(Wolves, White, true)
                .power(Priority::QUERY_INFLUENCE.after(), EveryNight, Everybody)
                .class(3),
            RoleKind::Necrophiliac => RoleTraits::plain(Wolves, Black, false)
                .power(Priority::MODIFY, OnceAGame, Dead)
                .class(2),
            RoleKind::Renegade => RoleTraits::plain(Wolves, White, false).class(2),
            // Always fails.
            RoleKind::Alcoholic => RoleTraits::plain(Wolves, White, false)
                .power(Priority::QUERY_INFLUENCE, EveryNight, Everybody)
                .class(2),
            RoleKind::Sequestrator => {
                let mut traits = RoleTraits::plain(Wolves, Black, false)
                    .power(Priority::BLOCK, EveryNight, Alive)
                    .class(2)
                    .critical();
                traits.sequester = true;
                traits
            }
            RoleKind::Sorcerer => RoleTraits::plain(Wolves, Black, true)
                .power(Priority::BLOCK, EveryNight, Alive)
                .class(3)
                .critical(),

            RoleKind::Necromancer => RoleTraits::plain(Necromancers, White, true)
                .power(Priority::MODIFY.after(), EveryNight, Dead)
                .class(4)
                .param(RoleParameter::GhostPower),
            RoleKind::Phantom => RoleTraits::plain(Necromancers, Black, false),
            RoleKind::Hypnotist => RoleTraits::plain(Necromancers, White, false)
                .power(Priority::MODIFY, EveryOtherNight, Alive)
                .class(5),
            RoleKind::Medium => RoleTraits::plain(Necromancers, White, true)
                .power(Priority::QUERY, EveryNight, Dead)
                .class(5),
            RoleKind::Scrutineer => RoleTraits::plain(Necromancers, White, false)
                .power(Priority::MODIFY, EveryOtherNight, Alive)
                .class(5),

            RoleKind::Amnesia => RoleTraits::ghost(Priority::MODIFY.after(), EveryNight, Alive),
            RoleKind::Confusion => RoleTraits::ghost(Priority::QUERY_INFLUENCE, EveryNight, Everybody)
                .second(Everybody),
            RoleKind::Corruption => RoleTraits::ghost(Priority::POST_MORTEM, OnceAGame, Alive),
            RoleKind::Illusion => RoleTraits::ghost(Priority::QUERY_INFLUENCE, EveryOtherNight, Everybody)
                .second(Alive),
            RoleKind::Hypnosis => RoleTraits::ghost(Priority::MODIFY, EveryOtherNight, Everybody)
                .second(Everybody),
            RoleKind::Death => RoleTraits::ghost(Priority::KILLER, EveryOtherNight, Alive)
                .not_first_night(),
            RoleKind::Occultation => RoleTraits::ghost(Priority::BLOCK, EveryNight, Everybody)
                .critical(),
            RoleKind::Vision => RoleTraits::ghost(Priority::QUERY, EveryNight, Alive),
            RoleKind::Delusion => RoleTraits::spectre(),
        }
    }

    /// Whether this tag is a ghost power.
    pub const fn is_ghost(self) -> bool {
        self.traits().ghost
    }

    /// Ghost that several players may hold at once.
    pub const fn allows_duplicates(self) -> bool {
        matches!(self, RoleKind::Delusion)
    }

    /// Whether a player dealt this tag may act as a critical blocker at
    /// some dawn, directly or after copying a role.
    pub const fn may_block_critically(self) -> bool {
        self.traits().critical_blocker || matches!(self, RoleKind::Transformist | RoleKind::Necrophiliac)
    }

    /// English display name.
    pub fn name(self) -> &'static str {
        match self {
            RoleKind::Villager => "Villager",
            RoleKind::Hunter => "Hunter",
            RoleKind::Keeper => "Keeper",
            RoleKind::Soothsayer => "Soothsayer",
            RoleKind::Exorcist => "Exorcist",
            RoleKind::Expansive => "Expansive",
            RoleKind::Guard => "Guard",
            RoleKind::Detective => "Detective",
            RoleKind::Mage => "Mage",
            RoleKind::Mason => "Mason",
            RoleKind::Messiah => "Messiah",
            RoleKind::Shaman => "Shaman",
            RoleKind::Stalker => "Stalker",
            RoleKind::Transformist => "Transformist",
            RoleKind::Seer => "Seer",
            RoleKind::Voyeur => "Voyeur",
            RoleKind::Wolf => "Wolf",
            RoleKind::Assassin => "Assassin",
            RoleKind::Advocate => "Advocate",
            RoleKind::Devil => "Devil",
            RoleKind::Witch => "Witch",
            RoleKind::Necrophiliac => "Necrophiliac",
            RoleKind::Renegade => "Renegade",
            RoleKind::Alcoholic => "Alcoholic",
            RoleKind::Sequestrator => "Sequestrator",
            RoleKind::Sorcerer => "Sorcerer",
            RoleKind::Necromancer => "Necromancer",
            RoleKind::Phantom => "Phantom",
            RoleKind::Hypnotist => "Hypnotist",
            RoleKind::Medium => "Medium",
            RoleKind::Scrutineer => "Scrutineer",
            RoleKind::Amnesia => "Ghost of Amnesia",
            RoleKind::Confusion => "Ghost of Confusion",
            RoleKind::Corruption => "Ghost of Corruption",
            RoleKind::Illusion => "Ghost of Illusion",
            RoleKind::Hypnosis => "Ghost of Hypnosis",
            RoleKind::Death => "Ghost of Death",
            RoleKind::Occultation => "Ghost of Occultation",
            RoleKind::Vision => "Ghost of Vision",
            RoleKind::Delusion => "Ghost of Delusion",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Most critical blockers a deck may hold. Dawn resolution enumerates
/// every subset of them.
pub const MAX_CRITICAL_BLOCKERS: usize = 16;

// =============================================================================
// ASSIGNMENT
// =============================================================================

/// Targets recorded by a `UsePower` command for the coming dawn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAction {
    /// First target.
    pub target: PlayerId,
    /// Second target, for two-target powers.
    pub target2: Option<PlayerId>,
    /// Single role parameter.
    pub role_class: Option<RoleKind>,
    /// Role set parameter.
    pub role_set: BTreeSet<RoleKind>,
}

impl RecordedAction {
    /// Action with a single target and no parameter.
    pub fn on(target: PlayerId) -> Self {
        Self { target, target2: None, role_class: None, role_set: BTreeSet::new() }
    }
}

/// One live role assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role tag.
    pub kind: RoleKind,
    /// Label telling apart duplicated roles ("Wolf A", "Wolf B").
    pub label: Option<char>,
    /// Night of the last resolved use.
    pub last_usage: Option<TurnKey>,
    /// Target of the last resolved use.
    pub last_target: Option<PlayerId>,
    /// Action recorded for the coming dawn.
    pub recorded: Option<RecordedAction>,
    /// Ghosts lose their power when resurrected; roles acting after death
    /// lose it once used.
    pub has_power: bool,
}

impl Role {
    /// Fresh assignment.
    pub fn new(kind: RoleKind) -> Self {
        Self {
            kind,
            label: None,
            last_usage: None,
            last_target: None,
            recorded: None,
            has_power: true,
        }
    }

    /// Static properties.
    #[inline]
    pub fn traits(&self) -> RoleTraits {
        self.kind.traits()
    }

    /// Name including the duplicate label.
    pub fn disambiguated_name(&self) -> String {
        match self.label {
            Some(label) => format!("{} {}", self.kind, label),
            None => self.kind.to_string(),
        }
    }

    /// First recorded target.
    pub fn recorded_target(&self) -> Option<PlayerId> {
        self.recorded.as_ref().map(|action| action.target)
    }

    /// Whether the power is usable during the night of `date`, given the
    /// traits of the role under the game's ruleset.
    pub fn can_use_power(&self, traits: &RoleTraits, alive: bool, date: i32) -> bool {
        if !traits.ghost && !alive && !traits.acts_when_dead {
            return false;
        }
        if (traits.ghost || !alive) && !self.has_power {
            return false;
        }
        if !traits.can_act_first_night && date == FIRST_DATE {
            return false;
        }
        match traits.frequency {
            Frequency::Never => false,
            Frequency::EveryNight => true,
            Frequency::EveryOtherNight => self
                .last_usage
                .map_or(true, |last| date - last.date >= 2),
            Frequency::OnceAGame => self.last_usage.is_none(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
