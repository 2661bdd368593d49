use tracing::{debug, info};

use crate::config::ModeConfig;
use crate::constants::{ms_to_ticks, RESPAWN_DELAY_MS};
use crate::messaging::{Clock, MessageSink, Target};
use crate::registry::PlayerRegistry;
use crate::types::{
    GamePhase, PlayerId, PlayerState, PlayerView, ReleaseReason, RoundSummary, RoundView, Team,
};

mod elimination_system;
pub mod ledger;
mod lobby_system;
mod round_system;
mod utils;

pub use self::ledger::{CaptureLedger, CaptureRecord, LedgerViolation, Outcome, Rejection};

use self::utils::{enemies_left_line, release_line};

/// Round state machine for one match.
///
/// The host engine owns the simulation and calls the `on_*` hooks; the
/// controller owns the capture relation and talks back only through the
/// injected [`MessageSink`]. Hooks never fail: rejected preconditions are
/// logged and dropped.
#[derive(Debug)]
pub struct RoundController<C: Clock, S: MessageSink> {
    config: ModeConfig,
    clock: C,
    sink: S,
    registry: PlayerRegistry,
    ledger: CaptureLedger,
    phase: GamePhase,

    ingame_player_count: usize,
    previous_ingame_player_count: usize,
    forced_end: bool,
    start_tick: u64,
    round_number: u32,
    /// FREE players that died without a killer on the current tick.
    wiped_this_tick: Vec<PlayerId>,
    /// Nobody was left FREE on a transitional tick; the draw is settled on
    /// the next evaluation that is allowed to end the round.
    pending_draw: bool,
    last_summary: Option<RoundSummary>,
}

impl<C: Clock, S: MessageSink> RoundController<C, S> {
    pub fn new(config: ModeConfig, clock: C, sink: S) -> Self {
        let start_tick = clock.tick();
        Self {
            config,
            clock,
            sink,
            registry: PlayerRegistry::new(),
            ledger: CaptureLedger::new(),
            phase: GamePhase::Warmup,
            ingame_player_count: 0,
            previous_ingame_player_count: 0,
            forced_end: false,
            start_tick,
            round_number: 0,
            wiped_this_tick: Vec::new(),
            pending_draw: false,
            last_summary: None,
        }
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &CaptureLedger {
        &self.ledger
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn ingame_player_count(&self) -> usize {
        self.ingame_player_count
    }

    pub fn is_forced_end_pending(&self) -> bool {
        self.forced_end
    }

    pub fn start_tick(&self) -> u64 {
        self.start_tick
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn last_summary(&self) -> Option<&RoundSummary> {
        self.last_summary.as_ref()
    }

    pub fn state(&self, id: PlayerId) -> Option<PlayerState> {
        self.ledger.state(id)
    }

    pub fn team(&self, id: PlayerId) -> Option<Team> {
        self.ledger.state(id).map(Team::of)
    }

    pub fn score(&self, id: PlayerId) -> Option<i32> {
        self.registry.score(id)
    }

    /// Tick at which a dead character may respawn. `None` while alive or
    /// held captive.
    pub fn respawn_tick(&self, id: PlayerId) -> Option<u64> {
        self.registry.get(id).and_then(|entry| entry.respawn_tick)
    }

    /// Player a dead spectating character is following.
    pub fn spec_target(&self, id: PlayerId) -> Option<PlayerId> {
        self.registry.get(id).and_then(|entry| entry.spec_target)
    }

    pub fn view(&self) -> RoundView {
        let players = self
            .ledger
            .ids()
            .map(|id| PlayerView {
                player_id: id,
                name: self.registry.name(id).to_string(),
                state: self.ledger.state(id).unwrap_or_default(),
                score: self.registry.score(id).unwrap_or(0),
                caught_by: self.ledger.captor_of(id),
                wants_to_spectate: self
                    .ledger
                    .record(id)
                    .is_some_and(CaptureRecord::wants_to_spectate),
                captives: self.ledger.captives_of(id).to_vec(),
                enemies_left: self.ledger.enemies_remaining(id),
            })
            .collect();
        RoundView {
            tick: self.clock.tick(),
            round: self.round_number,
            phase: self.phase,
            ingame_players: self.ingame_player_count,
            players,
        }
    }

    fn trace(&self, message: &str) {
        if self.config.debug {
            info!(target: "zcatch", "{message}");
        } else {
            debug!(target: "zcatch", "{message}");
        }
    }

    fn is_active(&self) -> bool {
        self.phase == GamePhase::Active
    }

    fn send_enemies_left(&mut self, id: PlayerId) {
        if !self.ledger.contains(id) {
            return;
        }
        let line = enemies_left_line(self.ledger.enemies_remaining(id));
        self.sink.broadcast_line(id, &line);
    }

    /// Re-sends every ingame player's status line. Spectators get nothing.
    fn refresh_broadcast(&mut self) {
        let ids: Vec<PlayerId> = self.ledger.ids().collect();
        for id in ids {
            if self.ledger.state(id) != Some(PlayerState::Spectating) {
                self.send_enemies_left(id);
            }
        }
    }

    /// Pushes the colors of `subjects` to every connected observer.
    fn update_skins_of(&mut self, subjects: &[PlayerId]) {
        let observers: Vec<PlayerId> = self.ledger.ids().collect();
        for observer in observers {
            for subject in subjects {
                if self.ledger.contains(*subject) {
                    self.sink.skin_change(observer, *subject);
                }
            }
        }
    }

    fn schedule_respawn(&mut self, id: PlayerId, delay_ticks: u64) {
        let at = self.clock.tick().saturating_add(delay_ticks);
        if let Some(entry) = self.registry.get_mut(id) {
            entry.respawn_tick = Some(at);
        }
    }

    fn default_respawn_delay(&self) -> u64 {
        ms_to_ticks(RESPAWN_DELAY_MS, self.clock.tick_speed())
    }

    /// Frees every captive of `captor` and tells each of them why. Returns
    /// the freed players.
    fn release_captives(
        &mut self,
        captor: PlayerId,
        reason: ReleaseReason,
    ) -> Vec<PlayerId> {
        if self.ledger.num_caught(captor) == 0 {
            return Vec::new();
        }
        let release = match self.ledger.release_all(captor) {
            Ok(release) => release,
            Err(rejection) => {
                self.trace(&format!("release of {captor} rejected: {rejection}"));
                return Vec::new();
            }
        };

        let captor_name = self.registry.name(captor).to_string();
        let delay = self.default_respawn_delay();
        for freed in &release.freed {
            if let Some(text) = release_line(reason, &captor_name) {
                self.sink.server_message(Target::Player(freed.player), &text);
            }
            match freed.state {
                PlayerState::Spectating => {
                    if let Some(entry) = self.registry.get_mut(freed.player) {
                        entry.respawn_tick = None;
                    }
                }
                _ => self.schedule_respawn(freed.player, delay),
            }
        }
        self.trace(&format!(
            "{captor} released {} player(s) ({reason:?})",
            release.freed.len()
        ));

        let freed = release.players();
        self.update_skins_of(&freed);
        self.refresh_dead_spec_views();
        freed
    }

    /// Dead players in spectator view follow their captor.
    fn refresh_dead_spec_views(&mut self) {
        for id in self.registry.ids() {
            let target = self.ledger.captor_of(id);
            if let Some(entry) = self.registry.get_mut(id) {
                if entry.dead_spec_mode {
                    entry.spec_target = target;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::config::ModeConfig;
    use crate::engine::RoundController;
    use crate::messaging::{Clock, Outbox, TickClock};
    use crate::types::{GamePhase, PlayerId, PlayerState, RoundOutcome, Team, Weapon};

    type Controller = RoundController<TickClock, Outbox>;

    const A: PlayerId = PlayerId(0);
    const B: PlayerId = PlayerId(1);
    const C: PlayerId = PlayerId(2);
    const D: PlayerId = PlayerId(3);

    fn make_controller(players_to_start_round: usize) -> Controller {
        let config = ModeConfig {
            players_to_start_round,
            ..ModeConfig::default()
        };
        RoundController::new(config, TickClock::new(50), Outbox::new())
    }

    fn tick(controller: &mut Controller) {
        controller.clock_mut().advance();
        controller.on_tick();
    }

    /// Connects `ids` during warmup and ticks until the round is active.
    fn active_round(ids: &[PlayerId], players_to_start_round: usize) -> Controller {
        let mut controller = make_controller(players_to_start_round);
        for id in ids {
            controller
                .on_player_connect(*id, &format!("P{}", id.0))
                .expect("slot should be free");
        }
        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Active);
        tick(&mut controller);
        assert!(!controller.is_transitional_tick());
        controller.sink_mut().clear();
        controller
    }

    fn kill(controller: &mut Controller, killer: PlayerId, victim: PlayerId) {
        controller.on_character_death(victim, Some(killer), Weapon::Grenade);
    }

    fn assert_invariants(controller: &Controller) {
        controller
            .ledger()
            .check_invariants()
            .expect("ledger invariants should hold");
        let expected = controller
            .ledger()
            .ids()
            .filter(|id| controller.state(*id) != Some(PlayerState::Spectating))
            .count();
        assert_eq!(controller.ingame_player_count(), expected);
    }

    #[test]
    fn round_starts_when_population_reaches_threshold() {
        let mut controller = make_controller(2);
        controller.on_player_connect(A, "A").expect("connect A");
        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Warmup);

        controller.on_player_connect(B, "B").expect("connect B");
        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Active);
        assert_eq!(controller.round_number(), 1);
        assert_eq!(controller.start_tick(), 2);
    }

    #[test]
    fn capture_exclusivity_keeps_first_captor() {
        let mut controller = active_round(&[A, B, C, D], 2);
        kill(&mut controller, A, B);
        kill(&mut controller, C, B);
        assert_eq!(controller.ledger().captor_of(B), Some(A));
        assert!(controller.ledger().captives_of(C).is_empty());
        assert_invariants(&controller);
    }

    #[test]
    fn killing_a_captor_frees_captives_in_the_same_call() {
        let mut controller = active_round(&[A, B, C, D], 2);
        kill(&mut controller, A, B);
        kill(&mut controller, A, C);
        kill(&mut controller, D, A);

        assert!(controller.ledger().is_free(B));
        assert!(controller.ledger().is_free(C));
        assert_eq!(controller.ledger().captor_of(A), Some(D));
        assert_eq!(
            controller.sink().chat_for(B),
            vec!["'P0' was caught, you are free."]
        );
        assert!(controller.respawn_tick(B).is_some());
        assert_eq!(controller.respawn_tick(A), None);
        assert_invariants(&controller);
    }

    #[test]
    fn single_survivor_wins_one_point_and_ends_round() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Active);

        kill(&mut controller, A, C);
        tick(&mut controller);

        assert_eq!(controller.score(A), Some(1));
        assert_eq!(controller.score(B), Some(0));
        assert_eq!(controller.score(C), Some(0));
        assert!(matches!(controller.phase(), GamePhase::RoundEnding { .. }));
        assert!(controller
            .sink()
            .chat_for(B)
            .contains(&"'P0' won the round!"));
        let summary = controller.last_summary().expect("summary recorded");
        assert!(matches!(
            summary.outcome,
            RoundOutcome::Winner { player_id, .. } if player_id == A
        ));
        assert!(controller.ledger().captives_of(A).is_empty());
        assert!(controller.ledger().is_free(B));
        assert_invariants(&controller);
    }

    #[test]
    fn simultaneous_world_deaths_are_a_draw_without_score() {
        let mut controller = active_round(&[A, B], 2);
        controller.on_character_death(A, None, Weapon::World);
        controller.on_character_death(B, None, Weapon::World);
        tick(&mut controller);

        assert_eq!(controller.score(A), Some(0));
        assert_eq!(controller.score(B), Some(0));
        let summary = controller.last_summary().expect("summary recorded");
        assert_eq!(summary.outcome, RoundOutcome::Draw);
        assert!(matches!(controller.phase(), GamePhase::RoundEnding { .. }));
    }

    #[test]
    fn single_world_death_does_not_end_round() {
        let mut controller = active_round(&[A, B, C], 2);
        controller.on_character_death(A, None, Weapon::World);
        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Active);
        assert!(controller.ledger().is_free(A));
    }

    #[test]
    fn threshold_fallback_happens_on_next_tick_not_during_disconnect() {
        let mut controller = active_round(&[A, B], 2);
        controller.on_player_disconnect(B);

        assert_eq!(controller.phase(), GamePhase::Active);
        assert!(controller.is_forced_end_pending());
        assert_eq!(controller.ingame_player_count(), 1);

        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Warmup);
        assert!(!controller.is_forced_end_pending());
        let summary = controller.last_summary().expect("summary recorded");
        assert_eq!(summary.outcome, RoundOutcome::Forced);
        assert_invariants(&controller);
    }

    #[test]
    fn end_round_is_rejected_on_transitional_tick() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        controller.on_player_connect(D, "D").expect("connect D");
        tick(&mut controller);
        assert!(controller.is_transitional_tick());

        let captives_before = controller.ledger().captives_of(A).to_vec();
        let caught_before = controller
            .ledger()
            .record(A)
            .map(|record| record.total_caught());
        assert_eq!(
            controller.end_round(RoundOutcome::Forced).map(|_| ()),
            Err(crate::engine::Rejection::TransitionalTick)
        );
        assert_eq!(controller.ledger().captives_of(A), captives_before.as_slice());
        assert_eq!(
            controller.ledger().record(A).map(|record| record.total_caught()),
            caught_before
        );
        assert_eq!(controller.phase(), GamePhase::Active);
    }

    #[test]
    fn win_is_deferred_while_population_changes() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        controller.on_player_connect(D, "D").expect("connect D");
        assert_eq!(controller.ledger().captor_of(D), Some(A));
        kill(&mut controller, A, C);

        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Active);
        assert_eq!(controller.score(A), Some(0));

        tick(&mut controller);
        assert_eq!(controller.score(A), Some(1));
        assert!(matches!(controller.phase(), GamePhase::RoundEnding { .. }));
    }

    #[test]
    fn time_limit_is_deferred_while_population_changes() {
        let config = ModeConfig {
            time_limit_minutes: 1,
            ..ModeConfig::default()
        };
        let mut controller = RoundController::new(config, TickClock::new(50), Outbox::new());
        for id in [A, B, C] {
            controller
                .on_player_connect(id, &format!("P{}", id.0))
                .expect("connect");
        }
        tick(&mut controller);
        tick(&mut controller);

        let start = controller.start_tick();
        let now = controller.clock().tick();
        controller.clock_mut().advance_by(start + 2_999 - now);
        controller.on_player_connect(D, "D").expect("connect D");
        tick(&mut controller);

        assert!(controller.is_transitional_tick());
        assert_eq!(controller.phase(), GamePhase::Active);
        assert!(controller.last_summary().is_none());
        assert_eq!(controller.score(A), Some(0));

        tick(&mut controller);
        let summary = controller.last_summary().expect("summary recorded");
        assert_eq!(
            summary.outcome,
            RoundOutcome::Timeout {
                survivors: vec![A, B, C, D]
            }
        );
        for id in [A, B, C, D] {
            assert_eq!(controller.score(id), Some(1));
        }
    }

    #[test]
    fn world_wipe_on_transitional_tick_is_settled_as_draw() {
        let mut controller = active_round(&[A, B, C], 2);
        controller.on_team_change(C, Team::Spectators, false);
        controller.on_character_death(A, None, Weapon::World);
        controller.on_character_death(B, None, Weapon::World);

        tick(&mut controller);
        assert!(controller.is_transitional_tick());
        assert_eq!(controller.phase(), GamePhase::Active);
        assert!(controller.last_summary().is_none());

        tick(&mut controller);
        let summary = controller.last_summary().expect("summary recorded");
        assert_eq!(summary.outcome, RoundOutcome::Draw);
        assert!(matches!(controller.phase(), GamePhase::RoundEnding { .. }));
        assert_eq!(controller.score(A), Some(0));
        assert_eq!(controller.score(B), Some(0));
    }

    #[test]
    fn spectating_below_threshold_ends_round_and_frees_captives() {
        let mut controller = active_round(&[A, B, C], 3);
        kill(&mut controller, A, B);
        controller.on_team_change(C, Team::Spectators, false);
        tick(&mut controller);

        assert_eq!(controller.phase(), GamePhase::Warmup);
        let summary = controller.last_summary().expect("summary recorded");
        assert_eq!(summary.outcome, RoundOutcome::Forced);
        assert!(controller.ledger().is_free(B));
        assert!(controller
            .sink()
            .chat_for(B)
            .contains(&"The round is over, everyone is free."));
        assert_eq!(controller.score(A), Some(0));
        assert_invariants(&controller);
    }

    #[test]
    fn forced_end_is_not_held_back_by_a_join_on_the_same_tick() {
        let mut controller = active_round(&[A, B, C], 3);
        controller.on_player_disconnect(C);
        assert!(controller.is_forced_end_pending());
        controller.on_player_connect(D, "D").expect("connect D");
        tick(&mut controller);

        assert!(controller.is_transitional_tick());
        assert!(!controller.is_forced_end_pending());
        let summary = controller.last_summary().expect("summary recorded");
        assert_eq!(summary.outcome, RoundOutcome::Forced);
        assert!(matches!(controller.phase(), GamePhase::RoundEnding { .. }));
    }

    #[test]
    fn newcomer_is_caught_by_dominant_captor() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, C, B);
        controller.on_player_connect(D, "D").expect("connect D");

        assert_eq!(controller.ledger().captor_of(D), Some(C));
        assert_eq!(controller.respawn_tick(D), None);
        assert_eq!(
            controller.sink().chat_for(D),
            vec!["You joined a running round. You will be free once 'P2' dies."]
        );
        tick(&mut controller);
        assert_invariants(&controller);
    }

    #[test]
    fn newcomer_is_admitted_free_when_nobody_holds_captives() {
        let mut controller = active_round(&[A, B, C], 2);
        controller.on_player_connect(D, "D").expect("connect D");
        assert!(controller.ledger().is_free(D));
        assert!(controller.respawn_tick(D).is_some());
        assert!(controller.sink().chat_for(A).is_empty());
        assert_eq!(
            controller.sink().chat_for(D),
            vec!["Nobody is caught yet, you joined the running round."]
        );
    }

    #[test]
    fn admission_on_threshold_tick_is_announced() {
        let mut controller = make_controller(2);
        controller.on_player_connect(A, "A").expect("connect A");
        tick(&mut controller);
        controller.on_player_connect(B, "B").expect("connect B");
        tick(&mut controller);
        assert_eq!(controller.phase(), GamePhase::Active);
        assert!(controller.is_transitional_tick());

        controller.on_player_connect(C, "Carol").expect("connect C");
        assert_eq!(controller.sink().chat_for(A), vec!["'Carol' joined the game."]);
    }

    #[test]
    fn left_captives_still_count_towards_dominance() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        controller.on_player_disconnect(B);
        assert_eq!(controller.ledger().num_left_caught(A), 1);

        controller.on_player_connect(D, "D").expect("connect D");
        assert_eq!(controller.ledger().captor_of(D), Some(A));
    }

    #[test]
    fn disconnecting_captive_leaves_other_captives_held() {
        let mut controller = active_round(&[A, B, C, D], 2);
        kill(&mut controller, A, B);
        kill(&mut controller, A, C);
        controller.on_player_disconnect(B);

        assert_eq!(controller.ledger().captives_of(A), &[C]);
        assert!(!controller.is_forced_end_pending());
        assert_eq!(controller.ingame_player_count(), 3);
        assert_invariants(&controller);
    }

    #[test]
    fn disconnecting_captor_releases_everyone_they_hold() {
        let mut controller = active_round(&[A, B, C, D], 2);
        kill(&mut controller, A, B);
        kill(&mut controller, A, C);
        controller.on_player_disconnect(A);

        assert!(controller.ledger().is_free(B));
        assert!(controller.ledger().is_free(C));
        assert_eq!(
            controller.sink().chat_for(C),
            vec!["'P0' left the game, you are free."]
        );
        assert_invariants(&controller);
    }

    #[test]
    fn caught_player_asking_for_spectators_defers_until_release() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        controller.on_team_change(B, Team::Spectators, true);

        assert_eq!(controller.team(B), Some(Team::Game));
        assert_eq!(
            controller.sink().chat_for(B),
            vec!["You will join the spectators once 'P0' dies."]
        );

        kill(&mut controller, C, A);
        assert_eq!(controller.state(B), Some(PlayerState::Spectating));
        assert_eq!(controller.respawn_tick(B), None);
        tick(&mut controller);
        assert_invariants(&controller);
    }

    #[test]
    fn asking_twice_withdraws_spectate_intent() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        controller.on_team_change(B, Team::Spectators, false);
        controller.on_team_change(B, Team::Spectators, false);
        assert_eq!(
            controller.sink().chat_for(B).last().copied(),
            Some("You will join the game once 'P0' dies.")
        );

        kill(&mut controller, C, A);
        assert_eq!(controller.state(B), Some(PlayerState::Free));
    }

    #[test]
    fn captor_joining_spectators_releases_captives() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        controller.on_team_change(A, Team::Spectators, true);

        assert_eq!(controller.team(A), Some(Team::Spectators));
        assert!(controller.ledger().is_free(B));
        assert_eq!(
            controller.sink().chat_for(B),
            vec![
                "'P0' joined the spectators, you are free.",
                "'P0' joined the spectators."
            ]
        );
    }

    #[test]
    fn spectator_rejoining_is_free_immediately() {
        let mut controller = active_round(&[A, B, C], 2);
        controller.on_team_change(C, Team::Spectators, false);
        tick(&mut controller);
        kill(&mut controller, A, B);

        controller.on_team_change(C, Team::Game, false);
        assert_eq!(controller.state(C), Some(PlayerState::Free));
        assert!(controller.respawn_tick(C).is_some());
        assert_eq!(controller.sink().chat_for(C), vec!["You joined the game again."]);
    }

    #[test]
    fn self_kill_without_captives_costs_penalty_and_respawns_later() {
        let mut controller = active_round(&[A, B, C], 2);
        let now = controller.clock().tick();
        assert_eq!(controller.on_self_kill_request(A), crate::types::SelfKillResolution::Die);
        let delta = controller.on_character_death(A, Some(A), Weapon::SelfKill);

        assert_eq!(delta, -1);
        assert_eq!(controller.score(A), Some(-1));
        assert_eq!(controller.respawn_tick(A), Some(now + 150));
        assert_eq!(
            controller.sink().chat_for(A),
            vec!["Was it really necessary to kill yourself?"]
        );
    }

    #[test]
    fn self_kill_with_captives_releases_most_recent_instead() {
        let mut controller = active_round(&[A, B, C, D], 2);
        kill(&mut controller, A, B);
        kill(&mut controller, A, C);

        let resolution = controller.on_self_kill_request(A);
        assert_eq!(
            resolution,
            crate::types::SelfKillResolution::ReleasedInstead(C)
        );
        assert_eq!(controller.ledger().captives_of(A), &[B]);
        assert!(controller.ledger().is_free(C));
        assert_eq!(controller.sink().chat_for(C), vec!["'P0' released you."]);
        assert_eq!(controller.score(A), Some(0));
    }

    #[test]
    fn falling_out_of_the_map_releases_and_costs_penalty() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        let delta = controller.on_character_death(A, Some(A), Weapon::World);

        assert_eq!(delta, -1);
        assert!(controller.ledger().is_free(B));
        assert_eq!(controller.sink().chat_for(B), vec!["'P0' failed, you are free."]);
    }

    #[test]
    fn deaths_caused_by_the_game_never_score() {
        let mut controller = active_round(&[A, B, C], 2);
        let delta = controller.on_character_death(A, Some(A), Weapon::Game);
        assert_eq!(delta, 0);
        assert_eq!(controller.score(A), Some(0));
        assert!(controller.ledger().is_free(A));
    }

    #[test]
    fn elimination_updates_broadcasts_and_skins() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        assert_eq!(controller.sink().last_broadcast_line(A), Some("1 enemy left"));
        assert_eq!(controller.sink().last_broadcast_line(B), Some("2 enemies left"));
        assert_eq!(controller.sink().skin_changes_of(B), 3);
        assert_eq!(controller.spec_target(B), Some(A));
    }

    #[test]
    fn warmup_deaths_do_not_capture() {
        let mut controller = make_controller(3);
        controller.on_player_connect(A, "A").expect("connect A");
        controller.on_player_connect(B, "B").expect("connect B");
        tick(&mut controller);
        kill(&mut controller, A, B);
        assert!(controller.ledger().is_free(B));
        assert!(controller.respawn_tick(B).is_some());
    }

    #[test]
    fn timeout_awards_every_free_player_and_releases_captives() {
        let config = ModeConfig {
            time_limit_minutes: 1,
            ..ModeConfig::default()
        };
        let mut controller = RoundController::new(config, TickClock::new(50), Outbox::new());
        for id in [A, B, C, D] {
            controller
                .on_player_connect(id, &format!("P{}", id.0))
                .expect("connect");
        }
        tick(&mut controller);
        tick(&mut controller);
        kill(&mut controller, A, B);

        let start = controller.start_tick();
        let now = controller.clock().tick();
        controller.clock_mut().advance_by(start + 3_000 - now);
        controller.on_tick();

        assert_eq!(controller.score(A), Some(1));
        assert_eq!(controller.score(B), Some(0));
        assert_eq!(controller.score(C), Some(1));
        assert_eq!(controller.score(D), Some(1));
        assert!(controller.ledger().is_free(B));
        let summary = controller.last_summary().expect("summary recorded");
        assert_eq!(
            summary.outcome,
            RoundOutcome::Timeout {
                survivors: vec![A, C, D]
            }
        );
    }

    #[test]
    fn end_of_round_reports_participation_and_resets_counters() {
        let mut controller = active_round(&[A, B, C], 2);
        kill(&mut controller, A, B);
        for _ in 0..9 {
            tick(&mut controller);
        }
        kill(&mut controller, A, C);
        tick(&mut controller);

        let summary = controller.last_summary().expect("summary recorded").clone();
        let entry_b = summary
            .players
            .iter()
            .find(|entry| entry.player_id == B)
            .expect("B listed");
        assert_eq!(entry_b.ticks_caught, 10);
        assert!(controller
            .sink()
            .chat_for(B)
            .iter()
            .any(|text| text.starts_with("Free: ")));
        let record_a = controller.ledger().record(A).expect("A registered");
        assert_eq!(record_a.total_caught(), 0);
        assert_eq!(record_a.ticks_free(), 0);
    }

    #[test]
    fn round_ending_resumes_after_delay() {
        let mut controller = active_round(&[A, B], 2);
        kill(&mut controller, A, B);
        tick(&mut controller);
        let GamePhase::RoundEnding { resume_tick } = controller.phase() else {
            panic!("expected round ending");
        };
        assert_eq!(resume_tick, controller.clock().tick() + 500);

        let remaining = resume_tick - controller.clock().tick();
        controller.clock_mut().advance_by(remaining);
        controller.on_tick();
        assert_eq!(controller.phase(), GamePhase::Active);
        assert_eq!(controller.round_number(), 2);
    }

    #[test]
    fn broadcast_refresh_runs_every_nine_seconds() {
        let mut controller = active_round(&[A, B, C], 2);
        let now = controller.clock().tick();
        controller.clock_mut().advance_by(450 - now % 450 - 1);
        controller.on_tick();
        assert!(controller.sink().is_empty());
        tick(&mut controller);
        assert_eq!(controller.sink().last_broadcast_line(C), Some("2 enemies left"));
    }

    #[test]
    fn spectators_do_not_count_as_survivors() {
        let mut controller = active_round(&[A, B, C], 2);
        controller.on_team_change(C, Team::Spectators, false);
        tick(&mut controller);
        tick(&mut controller);
        kill(&mut controller, A, B);
        tick(&mut controller);
        assert_eq!(controller.score(A), Some(1));
        assert_eq!(controller.score(C), Some(0));
    }

    #[test]
    fn unknown_players_are_ignored_by_every_hook() {
        let mut controller = active_round(&[A, B], 2);
        let ghost = PlayerId(40);
        controller.on_character_spawn(ghost);
        controller.on_player_disconnect(ghost);
        controller.on_team_change(ghost, Team::Spectators, true);
        assert_eq!(controller.on_character_death(ghost, Some(A), Weapon::Gun), 0);
        assert!(controller.sink().is_empty());
        assert_invariants(&controller);
    }

    #[test]
    fn random_hook_sequences_preserve_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let weapons = [
            Weapon::Hammer,
            Weapon::Laser,
            Weapon::World,
            Weapon::SelfKill,
            Weapon::Game,
        ];
        let mut controller = make_controller(3);

        for _ in 0..4_000 {
            let id = PlayerId(rng.random_range(0..8u8));
            match rng.random_range(0..10u32) {
                0 => {
                    let _ = controller.on_player_connect(id, "bot");
                }
                1 => controller.on_player_disconnect(id),
                2 => {
                    let team = if rng.random_bool(0.5) {
                        Team::Spectators
                    } else {
                        Team::Game
                    };
                    controller.on_team_change(id, team, false);
                }
                3 => controller.on_character_spawn(id),
                4 => {
                    let _ = controller.on_self_kill_request(id);
                }
                _ => {
                    let other = PlayerId(rng.random_range(0..8u8));
                    let killer = if rng.random_bool(0.1) {
                        None
                    } else {
                        Some(other)
                    };
                    let weapon = weapons[rng.random_range(0..weapons.len())];
                    controller.on_character_death(id, killer, weapon);
                }
            }
            controller
                .ledger()
                .check_invariants()
                .expect("relation stays consistent after every hook");
            if rng.random_bool(0.3) {
                tick(&mut controller);
                assert_invariants(&controller);
            }
        }
        assert!(controller.round_number() > 0);
    }
}
