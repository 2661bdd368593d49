use super::*;

use super::utils::{caught_on_join_line, spectate_intent_line};

impl<C: Clock, S: MessageSink> RoundController<C, S> {
    /// Admits a new client. While a round runs, a newcomer is caught by the
    /// dominant captor if there is one, otherwise admitted FREE.
    pub fn on_player_connect(&mut self, id: PlayerId, name: &str) -> Outcome<()> {
        if self.registry.contains(id) {
            return Err(Rejection::SlotTaken(id));
        }
        if !self.registry.insert(id, name) {
            return Err(Rejection::UnknownPlayer(id));
        }
        if let Err(rejection) = self.ledger.register(id) {
            self.registry.remove(id);
            return Err(rejection);
        }

        if !self.is_active() {
            self.trace(&format!("player {id} joined during {:?}", self.phase));
            self.schedule_respawn(id, 0);
            self.update_skins_of(&[id]);
            return Ok(());
        }

        match self.dominant_player(id) {
            Some(dominant) if self.dominance(dominant) > 0 => self.absorb_as_captive(dominant, id),
            _ => self.admit_free(id),
        }
        self.update_skins_of(&[id]);
        Ok(())
    }

    pub fn on_player_disconnect(&mut self, id: PlayerId) {
        let Some(state) = self.ledger.state(id) else {
            return;
        };

        match state {
            PlayerState::Free => {
                self.release_captives(id, ReleaseReason::PlayerLeft);
            }
            PlayerState::Caught => match self.ledger.set_free(id) {
                Ok((captor, _)) => {
                    self.ledger.count_left_captive(captor);
                    self.trace(&format!("{id} left while held by {captor}"));
                }
                Err(rejection) => self.trace(&format!("set free of {id} rejected: {rejection}")),
            },
            PlayerState::Spectating => {}
        }

        self.ledger.unregister(id);
        self.registry.remove(id);
        self.trace(&format!("player {id} left"));

        if state != PlayerState::Spectating {
            self.ingame_player_count = self.ledger.ingame_count();
            if self.is_active() && !self.has_enough_players() {
                self.forced_end = true;
            }
            self.refresh_broadcast();
        }
        self.refresh_dead_spec_views();
    }

    pub fn on_team_change(&mut self, id: PlayerId, team: Team, announce: bool) {
        let Some(state) = self.ledger.state(id) else {
            return;
        };

        match (state, team) {
            (PlayerState::Caught, Team::Spectators) => {
                let Some(captor) = self.ledger.captor_of(id) else {
                    return;
                };
                match self.ledger.toggle_spectate_intent(id) {
                    Ok(wants_to_spectate) => {
                        let text =
                            spectate_intent_line(wants_to_spectate, self.registry.name(captor));
                        self.sink.server_message(Target::Player(id), &text);
                    }
                    Err(rejection) => {
                        self.trace(&format!("spectate toggle for {id} rejected: {rejection}"))
                    }
                }
            }
            (PlayerState::Free, Team::Spectators) => {
                self.release_captives(id, ReleaseReason::PlayerJoinedSpec);
                self.move_to_spectators(id, announce);
            }
            (PlayerState::Spectating, Team::Game) => {
                if let Err(rejection) = self.ledger.force_join(id) {
                    self.trace(&format!("rejoin of {id} rejected: {rejection}"));
                    return;
                }
                if announce {
                    let text = format!("'{}' joined the game.", self.registry.name(id));
                    self.sink.server_message(Target::All, &text);
                }
                if let Some(text) = release_line(ReleaseReason::PlayerJoinedGameAgain, "") {
                    self.sink.server_message(Target::Player(id), &text);
                }
                self.schedule_respawn(id, 0);
                self.update_skins_of(&[id]);
            }
            _ => self.trace(&format!("{id} already on {team:?}")),
        }
    }

    /// Whether a dead `id` follows their captor while waiting.
    pub fn set_dead_spec_mode(&mut self, id: PlayerId, enabled: bool) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        entry.dead_spec_mode = enabled;
        if !enabled {
            entry.spec_target = None;
        }
        self.refresh_dead_spec_views();
    }

    pub(super) fn move_to_spectators(&mut self, id: PlayerId, announce: bool) {
        if let Err(rejection) = self.ledger.set_spectating(id) {
            self.trace(&format!("spectate of {id} rejected: {rejection}"));
            return;
        }
        if let Some(entry) = self.registry.get_mut(id) {
            entry.respawn_tick = None;
            entry.spec_target = None;
        }
        if announce {
            let text = format!("'{}' joined the spectators.", self.registry.name(id));
            self.sink.server_message(Target::All, &text);
        }
        self.update_skins_of(&[id]);
        self.refresh_broadcast();
    }

    /// Connected player, other than `joining`, holding the most captives.
    /// Ties go to the lowest slot.
    fn dominant_player(&self, joining: PlayerId) -> Option<PlayerId> {
        let mut dominant: Option<PlayerId> = None;
        for id in self.ledger.ids().filter(|id| *id != joining) {
            match dominant {
                Some(current) if self.ledger.num_caught(id) <= self.ledger.num_caught(current) => {}
                _ => dominant = Some(id),
            }
        }
        dominant
    }

    fn dominance(&self, id: PlayerId) -> usize {
        self.ledger.num_caught(id) + self.ledger.num_left_caught(id) as usize
    }

    fn absorb_as_captive(&mut self, dominant: PlayerId, id: PlayerId) {
        match self.ledger.capture(dominant, id) {
            Ok(_) => {
                if let Some(entry) = self.registry.get_mut(id) {
                    entry.respawn_tick = None;
                }
                let text = caught_on_join_line(self.registry.name(dominant));
                self.sink.server_message(Target::Player(id), &text);
                self.send_enemies_left(dominant);
                self.refresh_dead_spec_views();
                self.trace(&format!("{id} joined and was caught by {dominant}"));
            }
            Err(rejection) => {
                self.trace(&format!("join capture of {id} rejected: {rejection}"));
                self.schedule_respawn(id, 0);
            }
        }
    }

    fn admit_free(&mut self, id: PlayerId) {
        let threshold_just_reached = self.ingame_player_count
            == self.config.players_to_start_round
            && self.is_transitional_tick();
        if threshold_just_reached {
            let text = format!("'{}' joined the game.", self.registry.name(id));
            self.sink.server_message(Target::All, &text);
        } else if !self.is_transitional_tick() {
            if let Some(text) = release_line(ReleaseReason::PlayerJoined, "") {
                self.sink.server_message(Target::Player(id), &text);
            }
        }
        self.schedule_respawn(id, 0);
    }
}
