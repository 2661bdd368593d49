//! Outbound messaging and the tick clock the controller consumes.

use serde::Serialize;

use crate::constants::TICK_RATE;
use crate::types::PlayerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "playerId", rename_all = "snake_case")]
pub enum Target {
    All,
    Player(PlayerId),
}

impl Target {
    pub fn reaches(self, player_id: PlayerId) -> bool {
        match self {
            Self::All => true,
            Self::Player(id) => id == player_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    ServerMessage {
        target: Target,
        text: String,
    },
    /// Empty text clears the line.
    BroadcastLine {
        target: PlayerId,
        text: String,
    },
    SkinChange {
        observer: PlayerId,
        subject: PlayerId,
    },
}

pub trait MessageSink {
    fn server_message(&mut self, target: Target, text: &str);
    fn broadcast_line(&mut self, target: PlayerId, text: &str);
    fn skin_change(&mut self, observer: PlayerId, subject: PlayerId);
}

/// Sink that keeps everything it is given until drained.
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    messages: Vec<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.messages)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Chat texts that reach `player_id`, directly or by broadcast.
    pub fn chat_for(&self, player_id: PlayerId) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|message| match message {
                Outbound::ServerMessage { target, text } if target.reaches(player_id) => {
                    Some(text.as_str())
                }
                _ => None,
            })
            .collect()
    }

    pub fn last_broadcast_line(&self, player_id: PlayerId) -> Option<&str> {
        self.messages.iter().rev().find_map(|message| match message {
            Outbound::BroadcastLine { target, text } if *target == player_id => {
                Some(text.as_str())
            }
            _ => None,
        })
    }

    pub fn skin_changes_of(&self, subject_id: PlayerId) -> usize {
        self.messages
            .iter()
            .filter(|message| {
                matches!(message, Outbound::SkinChange { subject, .. } if *subject == subject_id)
            })
            .count()
    }
}

impl MessageSink for Outbox {
    fn server_message(&mut self, target: Target, text: &str) {
        self.messages.push(Outbound::ServerMessage {
            target,
            text: text.to_string(),
        });
    }

    fn broadcast_line(&mut self, target: PlayerId, text: &str) {
        self.messages.push(Outbound::BroadcastLine {
            target,
            text: text.to_string(),
        });
    }

    fn skin_change(&mut self, observer: PlayerId, subject: PlayerId) {
        self.messages.push(Outbound::SkinChange { observer, subject });
    }
}

pub trait Clock {
    fn tick(&self) -> u64;
    fn tick_speed(&self) -> u32;
}

/// Manually advanced tick counter.
#[derive(Clone, Copy, Debug)]
pub struct TickClock {
    tick: u64,
    tick_speed: u32,
}

impl TickClock {
    pub fn new(tick_speed: u32) -> Self {
        Self {
            tick: 0,
            tick_speed,
        }
    }

    pub fn advance(&mut self) -> u64 {
        self.advance_by(1)
    }

    pub fn advance_by(&mut self, ticks: u64) -> u64 {
        self.tick = self.tick.saturating_add(ticks);
        self.tick
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(TICK_RATE)
    }
}

impl Clock for TickClock {
    fn tick(&self) -> u64 {
        self.tick
    }

    fn tick_speed(&self) -> u32 {
        self.tick_speed
    }
}
