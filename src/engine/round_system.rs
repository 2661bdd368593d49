use super::*;

use super::utils::{participation, participation_line};
use crate::constants::{seconds_to_ticks, BROADCAST_REFRESH_SECONDS};
use crate::types::{ParticipationEntry, RoundOutcome};

impl<C: Clock, S: MessageSink> RoundController<C, S> {
    /// Drives the round. The host calls this once per tick, after advancing
    /// the clock and delivering the tick's other events.
    pub fn on_tick(&mut self) {
        let now = self.clock.tick();
        let refresh_every =
            seconds_to_ticks(BROADCAST_REFRESH_SECONDS, self.clock.tick_speed()).max(1);
        if now % refresh_every == 0 {
            self.refresh_broadcast();
        }

        match self.phase {
            GamePhase::Warmup => {
                self.refresh_population();
                if self.has_enough_players() {
                    self.start_round();
                }
            }
            GamePhase::RoundEnding { resume_tick } => {
                self.refresh_population();
                if now >= resume_tick {
                    if self.has_enough_players() {
                        self.start_round();
                    } else {
                        self.phase = GamePhase::Warmup;
                        self.trace("round over, waiting for players");
                    }
                }
            }
            GamePhase::Active => {
                self.ledger.record_tick();
                self.do_wincheck_round();
                if self.is_active() && !self.has_enough_players() {
                    self.force_end_of_round();
                }
            }
        }

        self.wiped_this_tick.clear();
        self.ingame_player_count = self.ledger.ingame_count();
    }

    /// True while the ingame population differs from the previous tick's.
    pub fn is_transitional_tick(&self) -> bool {
        self.previous_ingame_player_count != self.ingame_player_count
    }

    /// Ends the current round: participation report, everyone released,
    /// per-round counters reset. Rejected on a transitional tick, in which
    /// case nothing changes.
    pub fn end_round(&mut self, outcome: RoundOutcome) -> Outcome<RoundSummary> {
        if self.is_transitional_tick() {
            return Err(Rejection::TransitionalTick);
        }
        Ok(self.close_round(outcome))
    }

    /// End of round without the transitional-tick guard. Used when the
    /// population forces the round to stop.
    fn close_round(&mut self, outcome: RoundOutcome) -> RoundSummary {
        let now = self.clock.tick();
        let ids: Vec<PlayerId> = self.ledger.ids().collect();
        let mut players = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(record) = self.ledger.record(*id) else {
                continue;
            };
            let ticks_free = record.ticks_free();
            let ticks_caught = record.ticks_caught();
            let total_caught = record.total_caught();
            let total_released = record.total_released();

            let shares = participation(ticks_free, ticks_caught);
            if let Some((free_percent, caught_percent)) = shares {
                let text = participation_line(free_percent, caught_percent);
                self.sink.server_message(Target::Player(*id), &text);
            }
            let (free_percent, caught_percent) = shares.unwrap_or((0.0, 0.0));
            players.push(ParticipationEntry {
                player_id: *id,
                name: self.registry.name(*id).to_string(),
                score: self.registry.score(*id).unwrap_or(0),
                ticks_free,
                ticks_caught,
                free_percent,
                caught_percent,
                total_caught,
                total_released,
            });
        }

        for id in &ids {
            self.release_captives(*id, ReleaseReason::EveryoneReleased);
            self.ledger.reset_statistics(*id);
        }

        let summary = RoundSummary {
            round: self.round_number,
            outcome,
            start_tick: self.start_tick,
            end_tick: now,
            players,
        };
        self.forced_end = false;
        self.pending_draw = false;
        self.phase = if self.has_enough_players() {
            let delay = self.config.round_end_delay_ticks(self.clock.tick_speed());
            GamePhase::RoundEnding {
                resume_tick: now.saturating_add(delay),
            }
        } else {
            GamePhase::Warmup
        };
        info!(
            target: "zcatch",
            round = summary.round,
            outcome = ?summary.outcome,
            duration_ticks = summary.duration_ticks(),
            "round ended"
        );
        self.last_summary = Some(summary.clone());
        summary
    }

    pub(super) fn do_wincheck_round(&mut self) {
        self.refresh_population();

        if self.forced_end {
            self.forced_end = false;
            self.force_end_of_round();
            return;
        }

        let now = self.clock.tick();
        if let Some(limit) = self.config.time_limit_ticks(self.clock.tick_speed()) {
            if now.saturating_sub(self.start_tick) >= limit {
                if self.is_transitional_tick() {
                    self.trace("time limit reached on a transitional tick, deferred");
                    return;
                }
                let survivors = self.ledger.free_players();
                for id in &survivors {
                    self.registry.add_score(*id, 1);
                }
                self.finish_round(RoundOutcome::Timeout { survivors });
                return;
            }
        }

        let min = self.config.players_to_start_round;
        let crossed_below_threshold =
            self.previous_ingame_player_count >= min && self.ingame_player_count < min;
        if crossed_below_threshold {
            self.trace("switching back to warmup");
            self.force_end_of_round();
            return;
        }

        let contenders = if self.pending_draw {
            Vec::new()
        } else {
            self.free_contenders()
        };
        match contenders.as_slice() {
            [] => {
                if self.is_transitional_tick() {
                    self.trace("nobody free on a transitional tick, draw deferred");
                    self.pending_draw = true;
                    return;
                }
                self.finish_round(RoundOutcome::Draw);
            }
            [winner] => {
                let winner = *winner;
                if self.is_transitional_tick() {
                    self.trace(&format!("{winner} is last free on a transitional tick"));
                    return;
                }
                self.registry.add_score(winner, 1);
                let name = self.registry.name(winner).to_string();
                self.sink
                    .server_message(Target::All, &format!("'{name}' won the round!"));
                self.finish_round(RoundOutcome::Winner {
                    player_id: winner,
                    name,
                });
            }
            _ => {}
        }
    }

    pub(super) fn refresh_population(&mut self) {
        self.previous_ingame_player_count = self.ingame_player_count;
        self.ingame_player_count = self.ledger.ingame_count();
    }

    pub(super) fn has_enough_players(&self) -> bool {
        self.ingame_player_count > 0
            && self.ingame_player_count >= self.config.players_to_start_round
    }

    fn finish_round(&mut self, outcome: RoundOutcome) {
        if let Err(rejection) = self.end_round(outcome) {
            self.trace(&format!("end of round skipped: {rejection}"));
        }
    }

    /// FREE players still in contention. When every one of them died
    /// without a killer on this tick nobody is left.
    fn free_contenders(&self) -> Vec<PlayerId> {
        let free = self.ledger.free_players();
        if !free.is_empty() && free.iter().all(|id| self.wiped_this_tick.contains(id)) {
            return Vec::new();
        }
        free
    }

    fn start_round(&mut self) {
        let ids: Vec<PlayerId> = self.ledger.ids().collect();
        for id in ids {
            self.release_captives(id, ReleaseReason::Silent);
        }
        self.round_number = self.round_number.saturating_add(1);
        self.start_tick = self.clock.tick();
        self.forced_end = false;
        self.pending_draw = false;
        self.phase = GamePhase::Active;
        info!(
            target: "zcatch",
            round = self.round_number,
            players = self.ingame_player_count,
            "round started"
        );
        self.refresh_broadcast();
    }

    fn force_end_of_round(&mut self) {
        self.close_round(RoundOutcome::Forced);
    }
}
