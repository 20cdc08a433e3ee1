//! Test harness driving a whole game through the public engine API.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::config::EngineConfig;
use crate::core::clock::ManualClock;
use crate::game::dynamics::Dynamics;
use crate::game::events::{Command, EventData};
use crate::game::log::MemoryLog;
use crate::game::roles::RoleKind;
use crate::game::ruleset::Ruleset;
use crate::game::state::PlayerId;
use crate::game::turn::Phase;
use crate::registry::GameId;

/// A game on a manual clock and an in-memory log.
pub struct TestGame {
    pub clock: ManualClock,
    pub log: MemoryLog,
    pub config: EngineConfig,
    pub usernames: Vec<String>,
    pub dynamics: Dynamics,
}

impl TestGame {
    /// Empty game with `players` players, still in Creation.
    pub fn new(players: usize, config: EngineConfig) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap());
        let log = MemoryLog::new();
        let usernames: Vec<String> = (0..players).map(|i| format!("player{i}")).collect();
        let mut dynamics = Dynamics::new(
            GameId::new(),
            usernames.clone(),
            Arc::new(log.clone()),
            Arc::new(clock.clone()),
            config.clone(),
        );
        dynamics.update().unwrap();
        Self { clock, log, config, usernames, dynamics }
    }

    /// Game with seed, ruleset and deck injected; roles are dealt but the
    /// game is still in Creation.
    pub fn started(ruleset: Ruleset, roles: &[RoleKind], seed: u64) -> Self {
        Self::started_with(ruleset, roles, seed, false)
    }

    /// Like [`TestGame::started`], optionally mirroring automatic events.
    pub fn started_with(ruleset: Ruleset, roles: &[RoleKind], seed: u64, store_automatic: bool) -> Self {
        let config = EngineConfig { store_automatic_events: store_automatic, ..EngineConfig::default() };
        let mut game = Self::new(roles.len(), config);
        game.inject(EventData::Seed { seed });
        game.inject(EventData::SetRules { ruleset });
        for role in roles {
            game.inject(EventData::AvailableRole { role: *role });
        }
        game
    }

    pub fn inject(&mut self, data: EventData) {
        self.dynamics.inject_event(data, None).unwrap();
    }

    pub fn phase(&self) -> Phase {
        self.dynamics.current_turn().unwrap().key.phase
    }

    pub fn close_creation(&mut self) {
        assert_eq!(self.phase(), Phase::Creation);
        self.dynamics.close_current_turn(None).unwrap();
    }

    /// Let time run until `phase` is the current phase.
    pub fn advance_to(&mut self, phase: Phase) {
        for _ in 0..8 {
            if self.phase() == phase {
                return;
            }
            let end = self.dynamics.current_turn().unwrap().end.expect("open turn");
            self.clock.set(end);
            self.dynamics.update().unwrap();
        }
        panic!("never reached {phase}");
    }

    /// Player `i` votes for `targets[i]`.
    pub fn vote(&mut self, targets: &[Option<u32>]) {
        for (voter, target) in targets.iter().enumerate() {
            self.inject(EventData::Command(Command::Vote {
                player: PlayerId(voter as u32),
                target: target.map(PlayerId),
            }));
        }
    }

    /// Player `i` proposes `targets[i]` as mayor.
    pub fn elect(&mut self, targets: &[Option<u32>]) {
        for (voter, target) in targets.iter().enumerate() {
            self.inject(EventData::Command(Command::Elect {
                player: PlayerId(voter as u32),
                target: target.map(PlayerId),
            }));
        }
    }

    pub fn power(&mut self, player: PlayerId, target: PlayerId) {
        self.power_with(player, target, None, &[]);
    }

    /// Power with a role or role set parameter.
    pub fn power_with(&mut self, player: PlayerId, target: PlayerId, role_class: Option<RoleKind>, role_set: &[RoleKind]) {
        self.inject(EventData::Command(Command::UsePower {
            player,
            target: Some(target),
            target2: None,
            role_class,
            role_set: role_set.iter().copied().collect(),
        }));
    }

    /// Players dealt `kind`, canonical order.
    pub fn players_with(&self, kind: RoleKind) -> Vec<PlayerId> {
        self.dynamics
            .players()
            .iter()
            .filter(|p| p.role_kind() == Some(kind))
            .map(|p| p.id)
            .collect()
    }

    pub fn has_event(&self, data: &EventData) -> bool {
        self.dynamics.history().iter().any(|e| &e.data == data)
    }

    /// Fresh engine replaying the same log at the same time.
    pub fn replay(&self) -> Dynamics {
        let mut dynamics = Dynamics::new(
            self.dynamics.game_id(),
            self.usernames.clone(),
            Arc::new(self.log.clone()),
            Arc::new(self.clock.clone()),
            self.config.clone(),
        );
        dynamics.update().unwrap();
        dynamics
    }
}
