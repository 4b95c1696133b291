//! Entity container

use std::collections::BTreeMap;

use super::controller::{Controller, EntityController};
use super::{EntityId, StateSnapshot};

/// All entities of one simulation, iterated in id order so every pass over
/// the world is deterministic.
#[derive(Debug, Clone, Default)]
pub struct World {
    entities: BTreeMap<EntityId, Controller>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the controller for `id`
    pub fn spawn(&mut self, id: EntityId, controller: Controller) {
        self.entities.insert(id, controller);
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Controller> {
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Controller> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Controller> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn sample(&self, id: EntityId) -> Option<StateSnapshot> {
        self.entities.get(&id).map(|c| c.sample_state())
    }

    /// Current state of every entity
    pub fn snapshot_all(&self) -> Vec<(EntityId, StateSnapshot)> {
        self.entities
            .iter()
            .map(|(&id, controller)| (id, controller.sample_state()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Controller)> {
        self.entities.iter().map(|(&id, c)| (id, c))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut Controller)> {
        self.entities.iter_mut().map(|(&id, c)| (id, c))
    }

    /// Step every entity once with the input each currently holds
    pub fn advance_all(&mut self, dt: f32) {
        for controller in self.entities.values_mut() {
            controller.advance(dt);
        }
    }
}
