//! Game State Definitions
//!
//! The projection owned by one engine: players, mayor, the shared PRNG and
//! the per-dawn scratch state. Everything here is plain data so the whole
//! projection can be cloned for speculative simulation and hashed for
//! determinism checks.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::error::EngineError;
use crate::game::events::{DeathCause, EventData};
use crate::game::log::LogPosition;
use crate::game::roles::{Role, RoleKind, RoleTraits};
use crate::game::ruleset::Ruleset;
use crate::game::turn::{Turn, TurnKey};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Player identifier: the index in the engine's canonical order.
///
/// Implements Ord so iteration over ids follows the canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// Position in the canonical order.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// TEAM & AURA
// =============================================================================

/// Faction. Variant order is the order winners are listed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Team {
    /// Villagers.
    Villagers,
    /// Wolves.
    Wolves,
    /// Necromancers and their ghosts.
    Necromancers,
}

impl Team {
    /// Single letter code, as used in archived dumps.
    pub fn code(self) -> char {
        match self {
            Team::Villagers => 'P',
            Team::Wolves => 'L',
            Team::Necromancers => 'N',
        }
    }
}

/// Aura seen by Seers and Detectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aura {
    /// White aura.
    White,
    /// Black aura.
    Black,
}

impl Aura {
    /// The other aura.
    pub fn flipped(self) -> Aura {
        match self {
            Aura::White => Aura::Black,
            Aura::Black => Aura::White,
        }
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// Projection of one participant.
///
/// `team`, `aura` and `is_mystic` are meaningful once a role is assigned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Canonical id.
    pub id: PlayerId,
    /// Stable external name.
    pub username: String,
    /// Current role.
    pub role: Option<Role>,
    /// Role held before becoming a ghost.
    pub role_before_ghost: Option<RoleKind>,
    /// Current team.
    pub team: Team,
    /// True aura.
    pub aura: Aura,
    /// True mysticity.
    pub is_mystic: bool,
    /// Alive or dead.
    pub alive: bool,
    /// False once exiled.
    pub active: bool,
    /// Exiled by the moderator.
    pub disqualified: bool,

    /// Last stake ballot.
    pub recorded_vote: Option<PlayerId>,
    /// Last mayor ballot.
    pub recorded_elect: Option<PlayerId>,
    /// Whose ballot this player copies.
    pub hypnotist: Option<PlayerId>,
    /// Ballot permanently nullified.
    pub has_permanent_amnesia: bool,

    /// Aura as seen by query powers tonight.
    pub apparent_aura: Aura,
    /// Mysticity as seen tonight.
    pub apparent_mystic: bool,
    /// Role as seen tonight.
    pub apparent_role: Option<RoleKind>,
    /// Team as seen tonight.
    pub apparent_team: Team,

    /// Killed this phase, death pending.
    pub just_dead: bool,
    /// Resurrected tonight.
    pub just_resurrected: bool,
    /// Ghostified tonight.
    pub just_ghostified: bool,
    /// Transformed tonight.
    pub just_transformed: bool,
    /// Protected from wolves tonight.
    pub protected_by_guard: bool,
    /// Protected from necromancers tonight.
    pub protected_by_keeper: bool,
    /// Blocked by a sequestering role.
    pub sequestrated: bool,
    /// Hypnosis released for the next sunset.
    pub temp_dehypnotized: bool,
    /// Apparent attributes copied from someone else.
    pub has_confusion: bool,
    /// Where the player went tonight.
    pub visiting: Vec<PlayerId>,
    /// Who visited the player tonight.
    pub visitors: Vec<PlayerId>,
}

impl Player {
    /// Player without a role.
    pub fn new(id: PlayerId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            role: None,
            role_before_ghost: None,
            team: Team::Villagers,
            aura: Aura::White,
            is_mystic: false,
            alive: true,
            active: true,
            disqualified: false,
            recorded_vote: None,
            recorded_elect: None,
            hypnotist: None,
            has_permanent_amnesia: false,
            apparent_aura: Aura::White,
            apparent_mystic: false,
            apparent_role: None,
            apparent_team: Team::Villagers,
            just_dead: false,
            just_resurrected: false,
            just_ghostified: false,
            just_transformed: false,
            protected_by_guard: false,
            protected_by_keeper: false,
            sequestrated: false,
            temp_dehypnotized: false,
            has_confusion: false,
            visiting: Vec::new(),
            visitors: Vec::new(),
        }
    }

    /// Current role tag.
    #[inline]
    pub fn role_kind(&self) -> Option<RoleKind> {
        self.role.as_ref().map(|role| role.kind)
    }

    /// Whether the player currently holds a ghost power.
    pub fn is_ghost(&self) -> bool {
        self.role_kind().map_or(false, RoleKind::is_ghost)
    }

    /// Alive and not exiled.
    #[inline]
    pub fn is_alive_and_active(&self) -> bool {
        self.alive && self.active
    }

    /// Reset apparent attributes to the true ones.
    pub fn snapshot_apparent(&mut self) {
        self.apparent_aura = self.aura;
        self.apparent_mystic = self.is_mystic;
        self.apparent_role = self.role_kind();
        self.apparent_team = self.team;
    }

    /// Clear the per-dawn flags.
    ///
    /// While simulating only the flags read by the dawn computation itself
    /// are reset; hypnosis release survives until the real sunset.
    pub fn clear_dawn_flags(&mut self, simulating: bool) {
        self.just_resurrected = false;
        self.just_ghostified = false;
        self.just_transformed = false;
        self.protected_by_guard = false;
        self.protected_by_keeper = false;
        self.sequestrated = false;
        self.has_confusion = false;
        self.visiting.clear();
        self.visitors.clear();
        if !simulating {
            self.snapshot_apparent();
        }
    }
}

// =============================================================================
// VOTE HOOKS
// =============================================================================

/// Ballot rewrite installed at dawn, evaluated at the next sunset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteInfluence {
    /// Amnesia: the target's ballot is dropped.
    Nullify {
        /// Silenced voter.
        target: PlayerId,
    },
    /// Hypnosis ghost: the target's ballot is forced.
    Redirect {
        /// Forced voter.
        target: PlayerId,
        /// Forced choice.
        to: PlayerId,
    },
}

/// Scrutineer fraud: ballots for `target` count for the scrutineer's choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectoralFraud {
    /// Scrutineer.
    pub scrutineer: PlayerId,
    /// Player whose ballots are stolen.
    pub target: PlayerId,
}

/// Advocate veto on the stake of `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceModification {
    /// Advocate.
    pub advocate: PlayerId,
    /// Protected player.
    pub target: PlayerId,
}

/// Scratch state of the dawn being resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DawnScratch {
    /// Wolves agreed on a target; computed on first use.
    pub wolves_agree: Option<bool>,
    /// Necromancers agreed on a target; computed on first use.
    pub necromancers_agree: Option<bool>,
    /// Faked movement: (mover, destination).
    pub illusion: Option<(PlayerId, PlayerId)>,
}

/// A proposition given to a Soothsayer at game creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoothsayerProposition {
    /// Receiving Soothsayer.
    pub soothsayer: PlayerId,
    /// Player the proposition talks about.
    pub target: PlayerId,
    /// Role claimed for the target.
    pub advertised_role: RoleKind,
}

// =============================================================================
// ENGINE STATE
// =============================================================================

/// Complete mutable projection of one game.
///
/// Cloned wholesale before a speculative simulation and restored afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineState {
    /// Players in canonical order; `players[i].id == PlayerId(i)`.
    pub players: Vec<Player>,
    /// The single random stream of the game.
    pub rng: DeterministicRng,
    /// Rules, fixed during Creation.
    pub ruleset: Option<Ruleset>,
    /// Turn being replayed.
    pub current_turn: Option<Turn>,
    /// Turn before the current one.
    pub prev_turn: Option<Turn>,
    /// Last persisted event consumed in the current turn.
    pub position: Option<LogPosition>,
    /// Automatic events generated so far in the current turn.
    pub automatic_in_turn: u64,
    /// Timestamp given to generated events.
    pub stamp: Option<DateTime<Utc>>,
    /// Inside a speculative simulation.
    pub simulating: bool,
    /// Generated events waiting to be applied.
    pub queue: VecDeque<EventData>,

    /// Roles announced during Creation.
    pub available_roles: Vec<RoleKind>,
    /// Assignments made so far per role, for duplicate labels.
    pub assignments_per_role: BTreeMap<RoleKind, u32>,
    /// Soothsayer propositions.
    pub soothsayer_propositions: Vec<SoothsayerProposition>,
    /// Remaining spectral draws, once injected.
    pub spectral_sequence: Option<VecDeque<bool>>,

    /// Current mayor.
    pub mayor: Option<PlayerId>,
    /// Successor appointed by the mayor.
    pub deputy: Option<PlayerId>,
    /// Ghost powers already handed out.
    pub used_ghost_powers: BTreeSet<RoleKind>,

    /// Dawn scratch.
    pub dawn: DawnScratch,
    /// Ballot rewrites for the next sunset.
    pub vote_influences: Vec<VoteInfluence>,
    /// Frauds for the next sunset.
    pub electoral_frauds: Vec<ElectoralFraud>,
    /// Stake vetoes for the next sunset.
    pub sentence_modifications: Vec<SentenceModification>,

    /// Deaths queued for bookkeeping.
    pub upcoming_deaths: Vec<(PlayerId, DeathCause)>,
    /// Disqualifications queued for bookkeeping.
    pub pending_disqualifications: Vec<PlayerId>,
    /// Teams whose key role is extinct.
    pub dying_teams: BTreeSet<Team>,
    /// Teams already exiled.
    pub defeated_teams: BTreeSet<Team>,
    /// Teams alive at the last victory check.
    pub last_living_teams: Vec<Team>,
    /// Winning teams.
    pub winners: Option<Vec<Team>>,
    /// The game has ended.
    pub over: bool,
}

impl EngineState {
    /// Fresh projection for the given usernames, in canonical order.
    pub fn new<S: Into<String>>(usernames: impl IntoIterator<Item = S>) -> Self {
        let players = usernames
            .into_iter()
            .enumerate()
            .map(|(index, name)| Player::new(PlayerId(index as u32), name))
            .collect();

        Self {
            players,
            rng: DeterministicRng::default(),
            ruleset: None,
            current_turn: None,
            prev_turn: None,
            position: None,
            automatic_in_turn: 0,
            stamp: None,
            simulating: false,
            queue: VecDeque::new(),
            available_roles: Vec::new(),
            assignments_per_role: BTreeMap::new(),
            soothsayer_propositions: Vec::new(),
            spectral_sequence: None,
            mayor: None,
            deputy: None,
            used_ghost_powers: BTreeSet::new(),
            dawn: DawnScratch::default(),
            vote_influences: Vec::new(),
            electoral_frauds: Vec::new(),
            sentence_modifications: Vec::new(),
            upcoming_deaths: Vec::new(),
            pending_disqualifications: Vec::new(),
            dying_teams: BTreeSet::new(),
            defeated_teams: BTreeSet::new(),
            last_living_teams: Vec::new(),
            winners: None,
            over: false,
        }
    }

    /// Look up a player.
    #[inline]
    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id.index())
    }

    /// Look up a player that must exist.
    pub fn player(&self, id: PlayerId) -> Result<&Player, EngineError> {
        self.players
            .get(id.index())
            .ok_or_else(|| EngineError::Invariant(format!("unknown player {id}")))
    }

    /// Mutable lookup of a player that must exist.
    pub fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player, EngineError> {
        self.players
            .get_mut(id.index())
            .ok_or_else(|| EngineError::Invariant(format!("unknown player {id}")))
    }

    /// Role of a player that must have one.
    pub fn role(&self, id: PlayerId) -> Result<&Role, EngineError> {
        self.player(id)?
            .role
            .as_ref()
            .ok_or_else(|| EngineError::Invariant(format!("player {id} has no role")))
    }

    /// Mutable role of a player that must have one.
    pub fn role_mut(&mut self, id: PlayerId) -> Result<&mut Role, EngineError> {
        self.player_mut(id)?
            .role
            .as_mut()
            .ok_or_else(|| EngineError::Invariant(format!("player {id} has no role")))
    }

    /// Traits of `kind` under the game's ruleset.
    pub fn traits(&self, kind: RoleKind) -> RoleTraits {
        self.ruleset.unwrap_or_default().traits(kind)
    }

    /// Traits of the role a player holds.
    pub fn role_traits(&self, id: PlayerId) -> Result<RoleTraits, EngineError> {
        Ok(self.traits(self.role(id)?.kind))
    }

    /// Resolve a player by username.
    pub fn canonicalize(&self, username: &str) -> Option<PlayerId> {
        self.players.iter().find(|p| p.username == username).map(|p| p.id)
    }

    /// Active players, canonical order.
    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.active)
    }

    /// Active living players, canonical order.
    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_alive_and_active())
    }

    /// Active dead players, canonical order.
    pub fn dead_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.active && !p.alive)
    }

    /// Active living players holding `kind`.
    pub fn alive_with_role(&self, kind: RoleKind) -> Vec<PlayerId> {
        self.alive_players()
            .filter(|p| p.role_kind() == Some(kind))
            .map(|p| p.id)
            .collect()
    }

    /// Key of the current turn.
    pub fn current_key(&self) -> Result<TurnKey, EngineError> {
        self.current_turn
            .as_ref()
            .map(|turn| turn.key)
            .ok_or_else(|| EngineError::Invariant("no current turn".into()))
    }

    /// Queue an automatic event.
    #[inline]
    pub fn generate(&mut self, data: EventData) {
        self.queue.push_back(data);
    }

    /// Whether every living player of `ids` that recorded a target recorded
    /// the same one.
    pub fn check_common_target(&self, ids: &[PlayerId]) -> bool {
        let mut common = None;
        for id in ids {
            let target = self.get(*id).and_then(|p| p.role.as_ref()).and_then(|r| r.recorded_target());
            if let Some(target) = target {
                match common {
                    None => common = Some(target),
                    Some(existing) if existing != target => return false,
                    Some(_) => {}
                }
            }
        }
        true
    }

    /// Compute hash of the projection for determinism checks.
    pub fn compute_hash(&self) -> Result<StateHash, bincode::Error> {
        let mut hasher = StateHasher::for_projection();
        hasher.update_u32(self.players.len() as u32);
        hasher.update_encoded(self)?;
        Ok(hasher.finalize())
    }
}

// =============================================================================
// TESTS
// =============================================================================
