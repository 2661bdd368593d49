use crate::constants::MAX_CLIENTS;
use crate::server_utils::sanitize_name;
use crate::types::PlayerId;

#[derive(Clone, Debug)]
pub struct PlayerEntry {
    pub name: String,
    pub score: i32,
    pub respawn_tick: Option<u64>,
    /// Dead players in this mode follow whoever holds them.
    pub dead_spec_mode: bool,
    pub spec_target: Option<PlayerId>,
}

impl PlayerEntry {
    fn new(name: &str) -> Self {
        Self {
            name: sanitize_name(name),
            score: 0,
            respawn_tick: None,
            dead_spec_mode: true,
            spec_target: None,
        }
    }
}

/// Connected players by client slot.
#[derive(Clone, Debug)]
pub struct PlayerRegistry {
    slots: Vec<Option<PlayerEntry>>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_CLIENTS],
        }
    }

    /// Returns false when the slot is out of range or already taken.
    pub fn insert(&mut self, id: PlayerId, name: &str) -> bool {
        match self.slots.get_mut(id.index()) {
            Some(slot @ None) => {
                *slot = Some(PlayerEntry::new(name));
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<PlayerEntry> {
        let removed = self.slots.get_mut(id.index())?.take();
        if removed.is_some() {
            for entry in self.slots.iter_mut().flatten() {
                if entry.spec_target == Some(id) {
                    entry.spec_target = None;
                }
            }
        }
        removed
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerEntry> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut PlayerEntry> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.get(id).is_some()
    }

    pub fn name(&self, id: PlayerId) -> &str {
        self.get(id)
            .map(|entry| entry.name.as_str())
            .unwrap_or("(invalid)")
    }

    pub fn score(&self, id: PlayerId) -> Option<i32> {
        self.get(id).map(|entry| entry.score)
    }

    pub fn add_score(&mut self, id: PlayerId, delta: i32) {
        if let Some(entry) = self.get_mut(id) {
            entry.score = entry.score.saturating_add(delta);
        }
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .filter_map(|(index, _)| PlayerId::from_index(index))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_free_slot(&self) -> Option<PlayerId> {
        self.slots
            .iter()
            .position(Option::is_none)
            .and_then(PlayerId::from_index)
    }
}
