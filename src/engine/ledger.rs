//! Who-caught-whom relation and the per-round counters attached to it.
//!
//! The ledger never decides anything on its own. Every mutation checks its
//! guard predicates first and either applies completely or returns a
//! [`Rejection`] without touching state, so callers can treat rejections as
//! silent no-ops while tests can still tell them apart from success.

use thiserror::Error;

use crate::constants::MAX_CLIENTS;
use crate::types::{PlayerId, PlayerState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("player {0} is not connected")]
    UnknownPlayer(PlayerId),
    #[error("slot {0} is already taken")]
    SlotTaken(PlayerId),
    #[error("player {0} cannot capture themselves")]
    SelfCapture(PlayerId),
    #[error("captor {0} is not free")]
    CaptorNotFree(PlayerId),
    #[error("victim {0} is not free")]
    VictimNotFree(PlayerId),
    #[error("player {0} holds no captives")]
    NothingToRelease(PlayerId),
    #[error("player {0} is not caught")]
    NotCaught(PlayerId),
    #[error("player {0} is caught")]
    Caught(PlayerId),
    #[error("player {0} is spectating")]
    Spectating(PlayerId),
    #[error("player {0} still holds captives")]
    HoldsCaptives(PlayerId),
    #[error("population changed on this tick")]
    TransitionalTick,
}

pub type Outcome<T> = Result<T, Rejection>;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerViolation {
    #[error("{0} is caught but has no captor")]
    CaughtWithoutCaptor(PlayerId),
    #[error("{0} has a captor but is not caught")]
    CaptorWithoutCaught(PlayerId),
    #[error("{captive} lists captor {captor} which does not hold it")]
    Asymmetric { captor: PlayerId, captive: PlayerId },
    #[error("{0} is caught and holds captives")]
    CaughtCaptor(PlayerId),
    #[error("{holder} references disconnected player {missing}")]
    Dangling { holder: PlayerId, missing: PlayerId },
}

#[derive(Clone, Debug, Default)]
pub struct CaptureRecord {
    state: PlayerState,
    captor: Option<PlayerId>,
    /// Capture order, oldest first.
    captives: Vec<PlayerId>,
    wants_to_spectate: bool,
    ticks_free: u64,
    ticks_caught: u64,
    total_caught: u32,
    total_released: u32,
    left_caught: u32,
}

impl CaptureRecord {
    pub fn wants_to_spectate(&self) -> bool {
        self.wants_to_spectate
    }

    pub fn ticks_free(&self) -> u64 {
        self.ticks_free
    }

    pub fn ticks_caught(&self) -> u64 {
        self.ticks_caught
    }

    pub fn total_caught(&self) -> u32 {
        self.total_caught
    }

    pub fn total_released(&self) -> u32 {
        self.total_released
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capture {
    pub captor: PlayerId,
    pub victim: PlayerId,
}

/// A former captive and the state it landed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Freed {
    pub player: PlayerId,
    pub state: PlayerState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Release {
    pub captor: PlayerId,
    pub freed: Vec<Freed>,
}

impl Release {
    pub fn players(&self) -> Vec<PlayerId> {
        self.freed.iter().map(|freed| freed.player).collect()
    }
}

#[derive(Clone, Debug)]
pub struct CaptureLedger {
    records: Vec<Option<CaptureRecord>>,
}

impl Default for CaptureLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureLedger {
    pub fn new() -> Self {
        Self {
            records: vec![None; MAX_CLIENTS],
        }
    }

    pub fn register(&mut self, id: PlayerId) -> Outcome<()> {
        match self.records.get_mut(id.index()) {
            None => Err(Rejection::UnknownPlayer(id)),
            Some(Some(_)) => Err(Rejection::SlotTaken(id)),
            Some(slot @ None) => {
                *slot = Some(CaptureRecord::default());
                Ok(())
            }
        }
    }

    /// Drops the record, detaching both sides of any relation it is part of.
    pub fn unregister(&mut self, id: PlayerId) -> Option<CaptureRecord> {
        let mut record = self.records.get_mut(id.index())?.take()?;
        if let Some(captor) = record.captor.take() {
            if let Some(captor_record) = self.record_mut(captor) {
                captor_record.captives.retain(|captive| *captive != id);
            }
        }
        for captive in std::mem::take(&mut record.captives) {
            if let Some(captive_record) = self.record_mut(captive) {
                captive_record.captor = None;
                captive_record.state = PlayerState::Free;
            }
        }
        Some(record)
    }

    pub fn capture(&mut self, captor: PlayerId, victim: PlayerId) -> Outcome<Capture> {
        if captor == victim {
            return Err(Rejection::SelfCapture(captor));
        }
        let captor_state = self.state(captor).ok_or(Rejection::UnknownPlayer(captor))?;
        let victim_state = self.state(victim).ok_or(Rejection::UnknownPlayer(victim))?;
        match (captor_state, victim_state) {
            (PlayerState::Spectating, _) => return Err(Rejection::Spectating(captor)),
            (_, PlayerState::Spectating) => return Err(Rejection::Spectating(victim)),
            (PlayerState::Caught, _) => return Err(Rejection::CaptorNotFree(captor)),
            (_, PlayerState::Caught) => return Err(Rejection::VictimNotFree(victim)),
            (PlayerState::Free, PlayerState::Free) => {}
        }
        if self
            .record(victim)
            .is_some_and(|record| !record.captives.is_empty())
        {
            return Err(Rejection::HoldsCaptives(victim));
        }

        if let Some(record) = self.record_mut(victim) {
            record.state = PlayerState::Caught;
            record.captor = Some(captor);
        }
        if let Some(record) = self.record_mut(captor) {
            record.captives.push(victim);
            record.total_caught = record.total_caught.saturating_add(1);
        }
        Ok(Capture { captor, victim })
    }

    /// Frees every captive of `captor` in one step.
    pub fn release_all(&mut self, captor: PlayerId) -> Outcome<Release> {
        let record = self.record_mut(captor).ok_or(Rejection::UnknownPlayer(captor))?;
        if record.captives.is_empty() {
            return Err(Rejection::NothingToRelease(captor));
        }
        let captives = std::mem::take(&mut record.captives);
        record.total_released = record
            .total_released
            .saturating_add(captives.len() as u32);

        let freed = captives
            .into_iter()
            .map(|captive| self.detach(captive))
            .collect();
        Ok(Release { captor, freed })
    }

    /// Frees only the most recently caught captive.
    pub fn release_last(&mut self, captor: PlayerId) -> Outcome<Release> {
        let record = self.record_mut(captor).ok_or(Rejection::UnknownPlayer(captor))?;
        let Some(captive) = record.captives.pop() else {
            return Err(Rejection::NothingToRelease(captor));
        };
        record.total_released = record.total_released.saturating_add(1);
        let freed = self.detach(captive);
        Ok(Release {
            captor,
            freed: vec![freed],
        })
    }

    /// Takes one caught player out of their captor's set. Other captives of
    /// the same captor stay caught. Returns the former captor.
    pub fn set_free(&mut self, victim: PlayerId) -> Outcome<(PlayerId, Freed)> {
        let record = self.record(victim).ok_or(Rejection::UnknownPlayer(victim))?;
        let captor = match (record.state, record.captor) {
            (PlayerState::Caught, Some(captor)) => captor,
            _ => return Err(Rejection::NotCaught(victim)),
        };
        if let Some(captor_record) = self.record_mut(captor) {
            captor_record.captives.retain(|captive| *captive != victim);
        }
        Ok((captor, self.detach(victim)))
    }

    /// Marks a player free without a capture, detaching them from a captor
    /// if needed. Returns the former captor, if any.
    pub fn force_join(&mut self, victim: PlayerId) -> Outcome<Option<PlayerId>> {
        let record = self.record(victim).ok_or(Rejection::UnknownPlayer(victim))?;
        let former = record.captor;
        if let Some(captor) = former {
            if let Some(captor_record) = self.record_mut(captor) {
                captor_record.captives.retain(|captive| *captive != victim);
            }
        }
        if let Some(record) = self.record_mut(victim) {
            record.state = PlayerState::Free;
            record.captor = None;
            record.wants_to_spectate = false;
        }
        Ok(former)
    }

    pub fn set_spectating(&mut self, id: PlayerId) -> Outcome<()> {
        let record = self.record_mut(id).ok_or(Rejection::UnknownPlayer(id))?;
        if record.state == PlayerState::Caught {
            return Err(Rejection::Caught(id));
        }
        if !record.captives.is_empty() {
            return Err(Rejection::HoldsCaptives(id));
        }
        record.state = PlayerState::Spectating;
        record.wants_to_spectate = false;
        Ok(())
    }

    /// Flips the deferred spectate intent of a caught player and returns the
    /// new value.
    pub fn toggle_spectate_intent(&mut self, id: PlayerId) -> Outcome<bool> {
        let record = self.record_mut(id).ok_or(Rejection::UnknownPlayer(id))?;
        if record.state != PlayerState::Caught {
            return Err(Rejection::NotCaught(id));
        }
        record.wants_to_spectate = !record.wants_to_spectate;
        Ok(record.wants_to_spectate)
    }

    pub fn count_left_captive(&mut self, captor: PlayerId) {
        if let Some(record) = self.record_mut(captor) {
            record.left_caught = record.left_caught.saturating_add(1);
        }
    }

    pub fn record_tick(&mut self) {
        for record in self.records.iter_mut().flatten() {
            match record.state {
                PlayerState::Free => record.ticks_free = record.ticks_free.saturating_add(1),
                PlayerState::Caught => {
                    record.ticks_caught = record.ticks_caught.saturating_add(1)
                }
                PlayerState::Spectating => {}
            }
        }
    }

    pub fn reset_statistics(&mut self, id: PlayerId) {
        if let Some(record) = self.record_mut(id) {
            record.ticks_free = 0;
            record.ticks_caught = 0;
            record.total_caught = 0;
            record.total_released = 0;
            record.left_caught = 0;
        }
    }

    pub fn record(&self, id: PlayerId) -> Option<&CaptureRecord> {
        self.records.get(id.index())?.as_ref()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.record(id).is_some()
    }

    pub fn state(&self, id: PlayerId) -> Option<PlayerState> {
        self.record(id).map(|record| record.state)
    }

    pub fn is_free(&self, id: PlayerId) -> bool {
        self.state(id) == Some(PlayerState::Free)
    }

    pub fn is_caught(&self, id: PlayerId) -> bool {
        self.state(id) == Some(PlayerState::Caught)
    }

    pub fn captor_of(&self, id: PlayerId) -> Option<PlayerId> {
        self.record(id).and_then(|record| record.captor)
    }

    pub fn captives_of(&self, id: PlayerId) -> &[PlayerId] {
        self.record(id)
            .map(|record| record.captives.as_slice())
            .unwrap_or(&[])
    }

    /// Captives currently held.
    pub fn num_caught(&self, id: PlayerId) -> usize {
        self.captives_of(id).len()
    }

    /// Captives released this round.
    pub fn num_released(&self, id: PlayerId) -> u32 {
        self.record(id).map_or(0, |record| record.total_released)
    }

    pub fn num_left_caught(&self, id: PlayerId) -> u32 {
        self.record(id).map_or(0, |record| record.left_caught)
    }

    /// Free, non-spectating opponents of `id`.
    pub fn enemies_remaining(&self, id: PlayerId) -> usize {
        self.ids()
            .filter(|other| *other != id && self.is_free(*other))
            .count()
    }

    pub fn free_players(&self) -> Vec<PlayerId> {
        self.ids().filter(|id| self.is_free(*id)).collect()
    }

    pub fn ingame_count(&self) -> usize {
        self.records
            .iter()
            .flatten()
            .filter(|record| record.state != PlayerState::Spectating)
            .count()
    }

    pub fn ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.is_some())
            .filter_map(|(index, _)| PlayerId::from_index(index))
    }

    pub fn check_invariants(&self) -> Result<(), LedgerViolation> {
        for id in self.ids() {
            let Some(record) = self.record(id) else {
                continue;
            };
            match (record.state, record.captor) {
                (PlayerState::Caught, None) => return Err(LedgerViolation::CaughtWithoutCaptor(id)),
                (PlayerState::Free | PlayerState::Spectating, Some(_)) => {
                    return Err(LedgerViolation::CaptorWithoutCaught(id))
                }
                _ => {}
            }
            if record.state == PlayerState::Caught && !record.captives.is_empty() {
                return Err(LedgerViolation::CaughtCaptor(id));
            }
            if let Some(captor) = record.captor {
                let Some(captor_record) = self.record(captor) else {
                    return Err(LedgerViolation::Dangling {
                        holder: id,
                        missing: captor,
                    });
                };
                if !captor_record.captives.contains(&id) {
                    return Err(LedgerViolation::Asymmetric {
                        captor,
                        captive: id,
                    });
                }
            }
            for captive in &record.captives {
                let Some(captive_record) = self.record(*captive) else {
                    return Err(LedgerViolation::Dangling {
                        holder: id,
                        missing: *captive,
                    });
                };
                if captive_record.captor != Some(id) {
                    return Err(LedgerViolation::Asymmetric {
                        captor: id,
                        captive: *captive,
                    });
                }
            }
        }
        Ok(())
    }

    fn record_mut(&mut self, id: PlayerId) -> Option<&mut CaptureRecord> {
        self.records.get_mut(id.index())?.as_mut()
    }

    /// Clears the captive side of the relation, honoring a deferred spectate
    /// intent. The captor side must already be updated.
    fn detach(&mut self, captive: PlayerId) -> Freed {
        let Some(record) = self.record_mut(captive) else {
            return Freed {
                player: captive,
                state: PlayerState::Free,
            };
        };
        record.captor = None;
        record.state = if record.wants_to_spectate {
            PlayerState::Spectating
        } else {
            PlayerState::Free
        };
        record.wants_to_spectate = false;
        Freed {
            player: captive,
            state: record.state,
        }
    }
}
