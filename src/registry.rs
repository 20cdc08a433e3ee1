//! Engine Registry
//!
//! Keeps at most one [`Dynamics`] per game. Each engine sits behind its own
//! async mutex, so updates of one game are serialized while different games
//! proceed independently.
//!
//! A game whose engine failed stays failed: the registry remembers its id
//! and refuses to rebuild it until [`EngineRegistry::destroy`] evicts it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::clock::Clock;
use crate::error::EngineError;
use crate::game::dynamics::Dynamics;
use crate::game::log::GameLog;

/// Unique game identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameId(pub Uuid);

impl GameId {
    /// Random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared handle to one engine.
pub type EngineHandle = Arc<Mutex<Dynamics>>;

/// All live engines of a process.
pub struct EngineRegistry {
    config: EngineConfig,
    engines: RwLock<BTreeMap<GameId, EngineHandle>>,
    failed: RwLock<BTreeSet<GameId>>,
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new(config: EngineConfig) -> Self {
        Self { config, engines: RwLock::new(BTreeMap::new()), failed: RwLock::new(BTreeSet::new()) }
    }

    /// Configuration handed to new engines.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine of `id`, building and replaying it on first access.
    ///
    /// `build` runs under the registry write lock, so concurrent callers
    /// for the same game observe a single engine. A game that failed
    /// returns [`EngineError::Failed`] without being rebuilt.
    pub async fn get_or_create<F>(&self, id: GameId, build: F) -> Result<EngineHandle, EngineError>
    where
        F: FnOnce(&EngineConfig) -> Dynamics,
    {
        if let Some(engine) = self.get(id).await? {
            return Ok(engine);
        }

        let mut engines = self.engines.write().await;
        if self.is_failed(id).await {
            return Err(EngineError::Failed(id.to_string()));
        }
        if let Some(engine) = engines.get(&id) {
            return Ok(engine.clone());
        }
        let mut dynamics = build(&self.config);
        if let Err(err) = dynamics.update() {
            if dynamics.is_failed() {
                warn!("Game {} failed while loading: {}", id, err);
                self.failed.write().await.insert(id);
            }
            return Err(err);
        }
        let engine = Arc::new(Mutex::new(dynamics));
        engines.insert(id, engine.clone());
        info!("Game {} loaded ({} engines)", id, engines.len());
        Ok(engine)
    }

    /// Start a new game on `log`.
    pub async fn create_game<S: Into<String>>(
        &self,
        usernames: impl IntoIterator<Item = S>,
        log: Arc<dyn GameLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<(GameId, EngineHandle), EngineError> {
        let id = GameId::new();
        let engine = self
            .get_or_create(id, |config| Dynamics::new(id, usernames, log, clock, config.clone()))
            .await?;
        Ok((id, engine))
    }

    /// Engine of `id`, if loaded. Fails for a game that failed before.
    pub async fn get(&self, id: GameId) -> Result<Option<EngineHandle>, EngineError> {
        if self.is_failed(id).await {
            return Err(EngineError::Failed(id.to_string()));
        }
        Ok(self.engines.read().await.get(&id).cloned())
    }

    /// Whether `id` is known to have failed.
    pub async fn is_failed(&self, id: GameId) -> bool {
        self.failed.read().await.contains(&id)
    }

    /// Drop the engine of `id` and forget any failure; the next access
    /// rebuilds it by replay.
    pub async fn destroy(&self, id: GameId) -> bool {
        let removed = self.engines.write().await.remove(&id).is_some();
        let was_failed = self.failed.write().await.remove(&id);
        removed || was_failed
    }

    /// Number of loaded engines.
    pub async fn len(&self) -> usize {
        self.engines.read().await.len()
    }

    /// Whether no engine is loaded.
    pub async fn is_empty(&self) -> bool {
        self.engines.read().await.is_empty()
    }

    /// Delete the mirrored automatic events of `id` and drop its engine so
    /// the next access replays from persisted events only.
    pub async fn purge_automatic_events(&self, id: GameId) -> Result<usize, EngineError> {
        let Some(engine) = self.get(id).await? else {
            return Ok(0);
        };
        let removed = {
            let dynamics = engine.lock().await;
            dynamics.log().purge_automatic()?
        };
        self.destroy(id).await;
        info!("Game {}: purged {} automatic events", id, removed);
        Ok(removed)
    }

    /// Update every engine; returns the ids that failed.
    pub async fn update_all(&self) -> Vec<GameId> {
        let engines: Vec<(GameId, EngineHandle)> =
            self.engines.read().await.iter().map(|(id, e)| (*id, e.clone())).collect();

        let mut failed = Vec::new();
        for (id, engine) in engines {
            let mut dynamics = engine.lock().await;
            if let Err(err) = dynamics.update() {
                warn!("Game {} update failed: {}", id, err);
                if dynamics.is_failed() {
                    failed.push(id);
                }
            }
        }
        failed
    }

    /// Release the engines that failed. Their ids stay failed.
    pub async fn cleanup(&self) -> usize {
        let mut engines = self.engines.write().await;
        let mut to_remove = Vec::new();

        for (id, engine) in engines.iter() {
            if engine.lock().await.is_failed() {
                to_remove.push(*id);
            }
        }

        let mut failed = self.failed.write().await;
        for id in &to_remove {
            engines.remove(id);
            failed.insert(*id);
        }
        if !to_remove.is_empty() {
            info!("Released {} failed engines", to_remove.len());
        }
        to_remove.len()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::game::events::EventData;
    use crate::game::log::MemoryLog;
    use crate::game::roles::RoleKind;
    use crate::game::ruleset::Ruleset;
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = EngineRegistry::default();
        let (id, engine) = registry.create_game(["a", "b"], Arc::new(MemoryLog::new()), clock()).await.unwrap();

        assert_eq!(registry.len().await, 1);
        let again = registry.get(id).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&engine, &again));
        assert!(engine.lock().await.current_turn().is_some());
    }

    #[tokio::test]
    async fn test_get_or_create_builds_once() {
        let registry = EngineRegistry::default();
        let id = GameId::new();
        let log: Arc<dyn GameLog> = Arc::new(MemoryLog::new());

        let first = registry
            .get_or_create(id, |config| Dynamics::new(id, ["a"], log.clone(), clock(), config.clone()))
            .await
            .unwrap();
        let second = registry
            .get_or_create(id, |_| panic!("engine built twice"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_destroy_and_rebuild() {
        let registry = EngineRegistry::default();
        let log = MemoryLog::new();
        let (id, engine) = registry.create_game(["a", "b", "c"], Arc::new(log.clone()), clock()).await.unwrap();
        engine
            .lock()
            .await
            .inject_event(EventData::FreeText { text: "welcome".into() }, None)
            .unwrap();

        assert!(registry.destroy(id).await);
        assert!(registry.is_empty().await);

        let rebuilt = registry
            .get_or_create(id, |config| Dynamics::new(id, ["a", "b", "c"], Arc::new(log.clone()), clock(), config.clone()))
            .await
            .unwrap();
        assert_eq!(rebuilt.lock().await.history().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_automatic_events() {
        let config = EngineConfig { store_automatic_events: true, ..EngineConfig::default() };
        let registry = EngineRegistry::new(config);
        let log = MemoryLog::new();
        let (id, engine) = registry.create_game(["a", "b", "c"], Arc::new(log.clone()), clock()).await.unwrap();
        {
            let mut dynamics = engine.lock().await;
            dynamics.inject_event(EventData::Seed { seed: 3 }, None).unwrap();
            dynamics.inject_event(EventData::SetRules { ruleset: Ruleset::Classic }, None).unwrap();
            for role in [RoleKind::Villager, RoleKind::Villager, RoleKind::Wolf] {
                dynamics.inject_event(EventData::AvailableRole { role }, None).unwrap();
            }
        }
        let stored = log.len().unwrap();

        let removed = registry.purge_automatic_events(id).await.unwrap();
        assert!(removed > 0);
        assert_eq!(log.len().unwrap(), stored - removed);
        assert!(registry.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_survives_cleanup() {
        let registry = EngineRegistry::default();
        let (id, engine) = registry.create_game(["a", "b"], Arc::new(MemoryLog::new()), clock()).await.unwrap();

        // Leaving Creation without roles is fatal.
        assert!(engine.lock().await.close_current_turn(None).is_err());
        assert_eq!(registry.update_all().await, vec![id]);
        assert_eq!(registry.cleanup().await, 1);
        assert!(registry.is_empty().await);
        assert!(registry.is_failed(id).await);

        assert!(matches!(registry.get(id).await, Err(EngineError::Failed(_))));
        for _ in 0..3 {
            let rebuilt = registry.get_or_create(id, |_| panic!("failed game rebuilt")).await;
            assert!(matches!(rebuilt, Err(EngineError::Failed(_))));
        }
    }

    #[tokio::test]
    async fn test_failed_load_is_remembered() {
        let registry = EngineRegistry::default();
        let id = GameId::new();
        let log = MemoryLog::new();
        let begin = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        // A closed Creation without roles cannot be replayed.
        log.create_turn(&crate::game::turn::Turn {
            key: crate::game::turn::TurnKey::first(),
            begin,
            end: Some(begin),
        })
        .unwrap();

        let first = registry
            .get_or_create(id, |config| Dynamics::new(id, ["a", "b"], Arc::new(log.clone()), clock(), config.clone()))
            .await;
        assert!(matches!(first, Err(EngineError::Invariant(_))));
        let second = registry.get_or_create(id, |_| panic!("failed game rebuilt")).await;
        assert!(matches!(second, Err(EngineError::Failed(_))));

        assert!(registry.destroy(id).await);
        assert!(!registry.is_failed(id).await);
    }
}
