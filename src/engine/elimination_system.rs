use super::*;

use crate::constants::{seconds_to_ticks, SELF_KILL_RESPAWN_SECONDS};
use crate::types::{SelfKillResolution, Weapon};

impl<C: Clock, S: MessageSink> RoundController<C, S> {
    /// Called before a voluntary self-kill. A captor releases their most
    /// recent captive and survives instead.
    pub fn on_self_kill_request(&mut self, id: PlayerId) -> SelfKillResolution {
        if !self.is_active() || !self.ledger.is_free(id) || self.ledger.num_caught(id) == 0 {
            return SelfKillResolution::Die;
        }
        let release = match self.ledger.release_last(id) {
            Ok(release) => release,
            Err(rejection) => {
                self.trace(&format!("release of {id} rejected: {rejection}"));
                return SelfKillResolution::Die;
            }
        };
        let Some(freed) = release.freed.first().copied() else {
            return SelfKillResolution::Die;
        };

        let captor_name = self.registry.name(id).to_string();
        if let Some(text) = release_line(ReleaseReason::PlayerReleased, &captor_name) {
            self.sink.server_message(Target::Player(freed.player), &text);
        }
        if freed.state == PlayerState::Free {
            let delay = self.default_respawn_delay();
            self.schedule_respawn(freed.player, delay);
        }
        self.send_enemies_left(id);
        self.update_skins_of(&[freed.player]);
        self.refresh_dead_spec_views();
        SelfKillResolution::ReleasedInstead(freed.player)
    }

    /// Resolves a death and returns the score change applied to the victim.
    pub fn on_character_death(
        &mut self,
        victim: PlayerId,
        killer: Option<PlayerId>,
        weapon: Weapon,
    ) -> i32 {
        let Some(victim_state) = self.ledger.state(victim) else {
            return 0;
        };
        if victim_state != PlayerState::Free {
            self.trace(&format!("{victim} is {victim_state:?}, death ignored"));
            return 0;
        }

        if !self.is_active() {
            self.trace(&format!(
                "{:?}: {victim} killed by {killer:?} with {weapon:?}",
                self.phase
            ));
            let delay = self.respawn_delay_for(weapon);
            self.schedule_respawn(victim, delay);
            return 0;
        }

        let held_before = self.ledger.num_caught(victim);
        let self_inflicted = killer == Some(victim);
        let captor = killer
            .filter(|killer| *killer != victim)
            .filter(|killer| weapon.is_lethal() && self.ledger.is_free(*killer));

        let reason = match (captor, weapon) {
            (Some(_), _) => ReleaseReason::PlayerKilled,
            (None, Weapon::Game) => ReleaseReason::Silent,
            _ => ReleaseReason::PlayerFailed,
        };
        self.release_captives(victim, reason);

        match (captor, weapon) {
            (Some(captor), _) => match self.ledger.capture(captor, victim) {
                Ok(_) => self.trace(&format!("{captor} caught {victim}")),
                Err(rejection) => self.trace(&format!("capture rejected: {rejection}")),
            },
            (None, Weapon::SelfKill) if self_inflicted => {
                self.sink.server_message(
                    Target::Player(victim),
                    "Was it really necessary to kill yourself?",
                );
            }
            (None, Weapon::Game) => self.trace(&format!("{victim} was killed by the game")),
            _ => {}
        }
        if killer.is_none() && weapon != Weapon::Game {
            self.wiped_this_tick.push(victim);
        }

        if let Some(killer) = killer.filter(|killer| *killer != victim) {
            self.send_enemies_left(killer);
        }
        self.send_enemies_left(victim);
        let mut subjects = vec![victim];
        subjects.extend(killer.filter(|killer| *killer != victim));
        self.update_skins_of(&subjects);

        if self.ledger.is_caught(victim) {
            if let Some(entry) = self.registry.get_mut(victim) {
                entry.respawn_tick = None;
            }
        } else {
            let delay = self.respawn_delay_for(weapon);
            self.schedule_respawn(victim, delay);
        }

        let penalized = self_inflicted
            && (weapon == Weapon::World || (weapon == Weapon::SelfKill && held_before == 0));
        let delta = if penalized {
            self.config.suicide_penalty.saturating_neg()
        } else {
            0
        };
        if delta != 0 {
            self.registry.add_score(victim, delta);
        }

        self.refresh_dead_spec_views();
        delta
    }

    /// Clears anything a character held from before its death.
    pub fn on_character_spawn(&mut self, id: PlayerId) {
        let Some(state) = self.ledger.state(id) else {
            return;
        };
        if state != PlayerState::Free {
            self.trace(&format!("{id} is {state:?}, spawn ignored"));
            return;
        }

        self.release_captives(id, ReleaseReason::Silent);
        if let Some(entry) = self.registry.get_mut(id) {
            entry.respawn_tick = None;
            entry.spec_target = None;
        }
        self.send_enemies_left(id);
        self.refresh_broadcast();
        self.update_skins_of(&[id]);
    }

    fn respawn_delay_for(&self, weapon: Weapon) -> u64 {
        match weapon {
            Weapon::SelfKill => {
                seconds_to_ticks(SELF_KILL_RESPAWN_SECONDS, self.clock.tick_speed())
            }
            _ => self.default_respawn_delay(),
        }
    }
}
