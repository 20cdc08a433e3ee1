//! Lupus Engine
//!
//! Plays a short scripted game on a manual clock, then checks that the
//! archived game replays to the same state.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lupus::{
    archive::{self, GameDump},
    core::clock::ManualClock,
    game::{
        events::{Command, EventData},
        log::MemoryLog,
        roles::RoleKind,
        ruleset::Ruleset,
        state::PlayerId,
        turn::Phase,
    },
    Dynamics, EngineConfig, GameId, VERSION,
};

const SEED: u64 = 2204;

const DECK: [RoleKind; 10] = [
    RoleKind::Villager,
    RoleKind::Villager,
    RoleKind::Villager,
    RoleKind::Seer,
    RoleKind::Guard,
    RoleKind::Wolf,
    RoleKind::Wolf,
    RoleKind::Witch,
    RoleKind::Necromancer,
    RoleKind::Hypnotist,
];

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Lupus Engine v{}", VERSION);

    let config = EngineConfig::from_env();
    let dynamics = demo_game(&config)?;

    let dump = archive::export(&dynamics)?;
    let json = dump.to_json()?;
    info!("Dump: {} turns, {} events, {} bytes", dump.turns.len(), dump.event_count(), json.len());

    info!("=== Verifying Determinism ===");
    let report = archive::verify_dump(&GameDump::from_json(&json)?, &config)?;
    let live = dynamics.state_hash()?;
    info!("Live State Hash:   {}", hex::encode(live));
    info!("Replay State Hash: {}", hex::encode(report.state_hash));

    if live == report.state_hash {
        info!("DETERMINISM VERIFIED: Hashes match!");
        Ok(())
    } else {
        Err(anyhow!("DETERMINISM FAILURE: Hashes differ!"))
    }
}

/// Let the clock run to the end of the current turn until `phase` begins.
fn advance_to(dynamics: &mut Dynamics, clock: &ManualClock, phase: Phase) -> Result<()> {
    while dynamics.current_turn().map(|t| t.key.phase) != Some(phase) {
        if dynamics.is_over() {
            return Err(anyhow!("game ended before {}", phase));
        }
        let end = dynamics
            .current_turn()
            .and_then(|t| t.end)
            .ok_or_else(|| anyhow!("current turn has no end"))?;
        clock.set(end);
        dynamics.update()?;
    }
    Ok(())
}

/// Play creation, the first night and the first day.
fn demo_game(config: &EngineConfig) -> Result<Dynamics> {
    info!("=== Starting Demo Game ===");

    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).single().context("start time")?);
    let usernames: Vec<String> = (1..=DECK.len()).map(|i| format!("player{i}")).collect();
    let mut dynamics = Dynamics::new(
        GameId::new(),
        usernames,
        Arc::new(MemoryLog::new()),
        Arc::new(clock.clone()),
        config.clone(),
    );
    dynamics.update()?;

    dynamics.inject_event(EventData::Seed { seed: SEED }, None)?;
    dynamics.inject_event(EventData::SetRules { ruleset: Ruleset::Negromanti }, None)?;
    for role in DECK {
        dynamics.inject_event(EventData::AvailableRole { role }, None)?;
    }
    info!("Mayor: {:?}", dynamics.mayor());
    for player in dynamics.players() {
        info!("{} {} is {:?}", player.id, player.username, player.role_kind());
    }
    dynamics.close_current_turn(None)?;

    // Night: the wolves agree on the first villager.
    let wolves: Vec<PlayerId> = dynamics
        .players()
        .iter()
        .filter(|p| p.role_kind() == Some(RoleKind::Wolf))
        .map(|p| p.id)
        .collect();
    let victim = dynamics
        .players()
        .iter()
        .find(|p| p.role_kind() == Some(RoleKind::Villager))
        .map(|p| p.id)
        .context("no villager dealt")?;
    advance_to(&mut dynamics, &clock, Phase::Night)?;
    for wolf in &wolves {
        let power = Command::UsePower {
            player: *wolf,
            target: Some(victim),
            target2: None,
            role_class: None,
            role_set: Default::default(),
        };
        // Wolves cannot act on the first night; the rejection is expected.
        if let Err(err) = dynamics.inject_event(EventData::Command(power), None) {
            info!("{} rejected: {}", wolf, err);
        }
    }

    // Day: everybody alive votes the first wolf.
    advance_to(&mut dynamics, &clock, Phase::Day)?;
    let voters: Vec<PlayerId> = dynamics.alive_players().iter().map(|p| p.id).collect();
    let accused = *wolves.first().context("no wolf dealt")?;
    for voter in voters {
        let vote = Command::Vote { player: voter, target: Some(accused) };
        dynamics.inject_event(EventData::Command(vote), None)?;
    }
    dynamics.update_with(true)?;
    info!("Predicted sunset: {} events", dynamics.simulated_events().len());

    advance_to(&mut dynamics, &clock, Phase::Night)?;
    info!("=== Game State ===");
    info!("Turn: {:?}", dynamics.current_turn().map(|t| t.key.to_string()));
    info!("Alive: {}", dynamics.alive_players().len());
    info!("Mayor: {:?}", dynamics.mayor());
    info!("Events: {}", dynamics.history().len());
    Ok(dynamics)
}
