//! Minimal stand-in for the game server the controller plugs into.
//!
//! Tracks which characters are alive and respawns them when the controller
//! allows it. Weapons, physics and movement do not exist here: callers
//! report deaths directly.

use crate::config::ModeConfig;
use crate::constants::MAX_CLIENTS;
use crate::engine::RoundController;
use crate::messaging::{Clock, Outbound, Outbox, TickClock};
use crate::types::{PlayerId, PlayerState, RoundView, SelfKillResolution, Team, Weapon};

pub type MatchController = RoundController<TickClock, Outbox>;

#[derive(Debug)]
pub struct HostMatch {
    controller: MatchController,
    alive: Vec<bool>,
}

impl HostMatch {
    pub fn new(config: ModeConfig) -> Self {
        Self::with_clock(config, TickClock::default())
    }

    pub fn with_clock(config: ModeConfig, clock: TickClock) -> Self {
        Self {
            controller: RoundController::new(config, clock, Outbox::new()),
            alive: vec![false; MAX_CLIENTS],
        }
    }

    pub fn controller(&self) -> &MatchController {
        &self.controller
    }

    pub fn tick(&self) -> u64 {
        self.controller.clock().tick()
    }

    pub fn view(&self) -> RoundView {
        self.controller.view()
    }

    /// Connects a client into the first free slot.
    pub fn connect(&mut self, name: &str) -> Option<PlayerId> {
        let id = self.controller.registry().first_free_slot()?;
        self.controller.on_player_connect(id, name).ok()?;
        Some(id)
    }

    pub fn disconnect(&mut self, id: PlayerId) {
        self.set_alive(id, false);
        self.controller.on_player_disconnect(id);
    }

    pub fn is_alive(&self, id: PlayerId) -> bool {
        self.alive.get(id.index()).copied().unwrap_or(false)
    }

    pub fn alive_players(&self) -> Vec<PlayerId> {
        self.controller
            .registry()
            .ids()
            .into_iter()
            .filter(|id| self.is_alive(*id))
            .collect()
    }

    /// Reports a death. Dead characters cannot die again; returns `None`
    /// when the victim was not alive.
    pub fn eliminate(
        &mut self,
        killer: Option<PlayerId>,
        victim: PlayerId,
        weapon: Weapon,
    ) -> Option<i32> {
        if !self.is_alive(victim) {
            return None;
        }
        if let Some(killer) = killer {
            if killer != victim && !self.is_alive(killer) && weapon.is_lethal() {
                return None;
            }
        }
        self.set_alive(victim, false);
        Some(self.controller.on_character_death(victim, killer, weapon))
    }

    pub fn self_kill(&mut self, id: PlayerId) -> Option<SelfKillResolution> {
        if !self.is_alive(id) {
            return None;
        }
        let resolution = self.controller.on_self_kill_request(id);
        if resolution == SelfKillResolution::Die {
            self.eliminate(Some(id), id, Weapon::SelfKill);
        }
        Some(resolution)
    }

    pub fn set_team(&mut self, id: PlayerId, team: Team) {
        self.controller.on_team_change(id, team, true);
        if self.controller.state(id) == Some(PlayerState::Spectating) {
            self.set_alive(id, false);
        }
    }

    pub fn set_dead_spec_mode(&mut self, id: PlayerId, enabled: bool) {
        self.controller.set_dead_spec_mode(id, enabled);
    }

    /// Advances one tick: respawns characters whose delay ran out, then
    /// lets the controller evaluate the round.
    pub fn step(&mut self) -> u64 {
        let now = self.controller.clock_mut().advance();

        for id in self.controller.registry().ids() {
            if self.is_alive(id) || self.controller.state(id) != Some(PlayerState::Free) {
                continue;
            }
            let due = self
                .controller
                .respawn_tick(id)
                .is_some_and(|respawn_tick| respawn_tick <= now);
            if due {
                self.set_alive(id, true);
                self.controller.on_character_spawn(id);
            }
        }

        self.controller.on_tick();
        now
    }

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        self.controller.sink_mut().drain()
    }

    fn set_alive(&mut self, id: PlayerId, alive: bool) {
        if let Some(slot) = self.alive.get_mut(id.index()) {
            *slot = alive;
        }
    }
}
