use chrono::{SecondsFormat, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zcatch_rust_server::config::ModeConfig;
use zcatch_rust_server::constants::{MAX_CLIENTS, TICK_RATE};
use zcatch_rust_server::host::HostMatch;
use zcatch_rust_server::server_utils::{normalize_players_to_start, normalize_time_limit_minutes};
use zcatch_rust_server::types::{PlayerId, PlayerState, RoundOutcome, RoundSummary, Team, Weapon};

const LETHAL_WEAPONS: [Weapon; 6] = [
    Weapon::Hammer,
    Weapon::Gun,
    Weapon::Shotgun,
    Weapon::Grenade,
    Weapon::Laser,
    Weapon::Ninja,
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Number of bots; runs a single custom scenario.
    #[arg(long)]
    players: Option<i64>,
    /// Round time limit in minutes, 0 for none.
    #[arg(long)]
    minutes: Option<i64>,
    #[arg(long)]
    players_to_start: Option<i64>,
    #[arg(long, default_value_t = 5)]
    rounds: u32,
    #[arg(long, default_value_t = 30 * 60 * TICK_RATE as u64)]
    max_ticks: u64,
    /// Per-tick chance of a bot leaving or a new one joining.
    #[arg(long, default_value_t = 0.002)]
    churn: f64,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    players: usize,
    rounds: u32,
    churn: f64,
    seed: u64,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u64,
    players: usize,
    #[serde(rename = "roundsCompleted")]
    rounds_completed: u32,
    ticks: u64,
    #[serde(rename = "outcomeCounts")]
    outcome_counts: BTreeMap<String, usize>,
    captures: u32,
    releases: u32,
    #[serde(rename = "messagesSent")]
    messages_sent: usize,
    #[serde(rename = "topScorer")]
    top_scorer: Option<String>,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug)]
struct ScenarioRunResult {
    result: ScenarioResultLine,
    anomaly_records: Vec<AnomalyRecord>,
    summaries: Vec<RoundSummary>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAt")]
    started_at: String,
    #[serde(rename = "finishedAt")]
    finished_at: String,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageRoundTicks")]
    average_round_ticks: u64,
    #[serde(rename = "outcomeCounts")]
    outcome_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    timestamp: String,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

#[derive(Debug, thiserror::Error)]
enum SummaryError {
    #[error("failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write summary: {0}")]
    Io(#[from] io::Error),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let started_at = timestamp();
    let scenarios = resolve_scenarios(&cli);
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, Utc::now().timestamp_millis()));

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            emit_log(
                "error",
                "config_load_failed",
                &match_id,
                None,
                None,
                None,
                json!({ "error": error.to_string() }),
            );
            std::process::exit(2);
        }
    };

    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut outcome_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut round_ticks = Vec::new();
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            None,
            json!({
                "players": scenario.players,
                "rounds": scenario.rounds,
                "churn": scenario.churn,
                "playersToStartRound": config.players_to_start_round,
                "timeLimitMinutes": config.time_limit_minutes,
            }),
        );
        let scenario_run = run_scenario(&scenario, &config, cli.max_ticks);

        for anomaly in &scenario_run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                Some(anomaly.tick),
                json!({ "message": anomaly.message }),
            );
        }
        for summary in &scenario_run.summaries {
            round_ticks.push(summary.duration_ticks());
            emit_log(
                "info",
                "round_finished",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                Some(summary.end_tick),
                json!({
                    "round": summary.round,
                    "outcome": summary.outcome,
                    "durationTicks": summary.duration_ticks(),
                }),
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();
        for (key, count) in &scenario_run.result.outcome_counts {
            *outcome_counts.entry(key.clone()).or_insert(0) += count;
        }

        emit_log(
            "info",
            "scenario_finished",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            Some(scenario_run.result.ticks),
            json!({
                "roundsCompleted": scenario_run.result.rounds_completed,
                "captures": scenario_run.result.captures,
                "anomalyCount": scenario_run.anomaly_records.len(),
            }),
        );

        match serde_json::to_string(&scenario_run.result) {
            Ok(line) => println!("{line}"),
            Err(error) => emit_log(
                "error",
                "result_serialize_failed",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                None,
                json!({ "error": error.to_string() }),
            ),
        }
        scenario_results.push(scenario_run.result);
    }

    let summary = build_run_summary(
        match_id.clone(),
        started_at,
        timestamp(),
        scenario_results,
        outcome_counts,
        total_anomalies,
        &round_ticks,
    );
    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                None,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &match_id,
        None,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "averageRoundTicks": summary.average_round_ticks,
            "outcomeCounts": summary.outcome_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> Result<ModeConfig, zcatch_rust_server::config::ConfigError> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ModeConfig::load(path)?,
        None => ModeConfig::default(),
    };
    config.players_to_start_round =
        normalize_players_to_start(cli.players_to_start, config.players_to_start_round);
    config.time_limit_minutes =
        normalize_time_limit_minutes(cli.minutes, config.time_limit_minutes);
    Ok(config)
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = cli
        .seed
        .unwrap_or_else(|| Utc::now().timestamp_millis().unsigned_abs());
    let rounds = cli.rounds.max(1);
    let churn = cli.churn.clamp(0.0, 1.0);

    if let Some(players) = cli.players {
        let players = players.clamp(1, MAX_CLIENTS as i64) as usize;
        return vec![Scenario {
            name: format!("custom-{players}p"),
            players,
            rounds,
            churn,
            seed,
        }];
    }
    vec![
        Scenario {
            name: "duel".to_string(),
            players: 2,
            rounds,
            churn: 0.0,
            seed,
        },
        Scenario {
            name: "crowd-with-churn".to_string(),
            players: 8,
            rounds,
            churn,
            seed: seed.wrapping_add(1),
        },
    ]
}

fn run_scenario(scenario: &Scenario, config: &ModeConfig, max_ticks: u64) -> ScenarioRunResult {
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let mut host = HostMatch::new(config.clone());
    let mut next_bot = 0usize;
    for _ in 0..scenario.players {
        connect_bot(&mut host, &mut next_bot);
    }

    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut summaries: Vec<RoundSummary> = Vec::new();
    let mut outcome_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut messages_sent = 0usize;
    let mut last_round_seen = 0u32;

    while summaries.len() < scenario.rounds as usize {
        play_random_events(&mut host, &mut rng, scenario.churn, &mut next_bot);
        let tick = host.step();
        messages_sent += host.drain_outbox().len();

        for message in collect_anomalies(&host) {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                tick,
                message,
            );
        }

        if let Some(summary) = host.controller().last_summary() {
            if summary.end_tick == tick && summary.round != last_round_seen {
                last_round_seen = summary.round;
                *outcome_counts
                    .entry(outcome_key(&summary.outcome).to_string())
                    .or_insert(0) += 1;
                summaries.push(summary.clone());
            }
        }

        if tick >= max_ticks {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                tick,
                "tick safety limit exceeded".to_string(),
            );
            break;
        }
    }

    let captures = summaries
        .iter()
        .flat_map(|summary| summary.players.iter())
        .map(|entry| entry.total_caught)
        .sum();
    let releases = summaries
        .iter()
        .flat_map(|summary| summary.players.iter())
        .map(|entry| entry.total_released)
        .sum();
    let registry = host.controller().registry();
    let top_scorer = registry
        .ids()
        .into_iter()
        .max_by_key(|id| registry.score(*id).unwrap_or(i32::MIN))
        .map(|id| registry.name(id).to_string());

    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            seed: scenario.seed,
            players: scenario.players,
            rounds_completed: summaries.len() as u32,
            ticks: host.tick(),
            outcome_counts,
            captures,
            releases,
            messages_sent,
            top_scorer,
            anomalies,
        },
        anomaly_records,
        summaries,
    }
}

fn connect_bot(host: &mut HostMatch, next_bot: &mut usize) -> Option<PlayerId> {
    *next_bot += 1;
    host.connect(&format!("Bot-{:02}", *next_bot))
}

fn play_random_events(host: &mut HostMatch, rng: &mut StdRng, churn: f64, next_bot: &mut usize) {
    let alive = host.alive_players();
    for attacker in &alive {
        if !host.is_alive(*attacker) {
            continue;
        }
        let roll: f64 = rng.random();
        if roll < 0.01 {
            let candidates: Vec<PlayerId> = host
                .alive_players()
                .into_iter()
                .filter(|id| id != attacker)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let victim = candidates[rng.random_range(0..candidates.len())];
            let weapon = LETHAL_WEAPONS[rng.random_range(0..LETHAL_WEAPONS.len())];
            host.eliminate(Some(*attacker), victim, weapon);
        } else if roll < 0.0105 {
            let killer = if rng.random_bool(0.5) {
                None
            } else {
                Some(*attacker)
            };
            host.eliminate(killer, *attacker, Weapon::World);
        } else if roll < 0.0108 {
            host.self_kill(*attacker);
        }
    }

    let connected = host.controller().registry().ids();
    if churn > 0.0 && rng.random_bool(churn) && !connected.is_empty() {
        let leaving = connected[rng.random_range(0..connected.len())];
        host.disconnect(leaving);
    }
    if churn > 0.0 && rng.random_bool(churn) {
        connect_bot(host, next_bot);
    }
    if churn > 0.0 && rng.random_bool(churn / 2.0) && !connected.is_empty() {
        let id = connected[rng.random_range(0..connected.len())];
        let team = match host.controller().team(id) {
            Some(Team::Spectators) => Team::Game,
            _ => Team::Spectators,
        };
        host.set_team(id, team);
    }
}

fn collect_anomalies(host: &HostMatch) -> Vec<String> {
    let controller = host.controller();
    let mut anomalies = Vec::new();
    if let Err(violation) = controller.ledger().check_invariants() {
        anomalies.push(format!("ledger invariant violated: {violation}"));
    }
    let ingame = controller
        .registry()
        .ids()
        .into_iter()
        .filter(|id| controller.state(*id) != Some(PlayerState::Spectating))
        .count();
    if ingame != controller.ingame_player_count() {
        anomalies.push(format!(
            "ingame count {} does not match {} connected ingame players",
            controller.ingame_player_count(),
            ingame
        ));
    }
    for id in host.alive_players() {
        if controller.state(id) != Some(PlayerState::Free) {
            anomalies.push(format!("{id} is alive while {:?}", controller.state(id)));
        }
    }
    anomalies
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        tick,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn outcome_key(outcome: &RoundOutcome) -> &'static str {
    match outcome {
        RoundOutcome::Winner { .. } => "winner",
        RoundOutcome::Draw => "draw",
        RoundOutcome::Timeout { .. } => "timeout",
        RoundOutcome::Forced => "forced",
    }
}

fn default_match_id(seed: u64, timestamp_ms: i64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn build_run_summary(
    match_id: String,
    started_at: String,
    finished_at: String,
    scenarios: Vec<ScenarioResultLine>,
    outcome_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
    round_ticks: &[u64],
) -> RunSummary {
    let average_round_ticks = if round_ticks.is_empty() {
        0
    } else {
        round_ticks.iter().sum::<u64>() / round_ticks.len() as u64
    };
    RunSummary {
        match_id,
        started_at,
        finished_at,
        scenario_count: scenarios.len(),
        anomaly_count,
        average_round_ticks,
        outcome_counts,
        scenarios,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    scenario: Option<&str>,
    seed: Option<u64>,
    tick: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp: timestamp(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        seed,
        tick,
        details,
    };
    if let Ok(line) = serde_json::to_string(&log_line) {
        eprintln!("{line}");
    }
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<(), SummaryError> {
    let summary_text = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, summary_text)?;
    Ok(())
}
