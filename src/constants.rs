pub const TICK_RATE: u32 = 50;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

/// Number of client slots; player ids are indices below this bound.
pub const MAX_CLIENTS: usize = 64;

/// Clients keep a broadcast line visible for roughly ten seconds.
pub const BROADCAST_REFRESH_SECONDS: u64 = 9;
pub const SELF_KILL_RESPAWN_SECONDS: u64 = 3;
pub const RESPAWN_DELAY_MS: u64 = 500;

pub const DEFAULT_PLAYERS_TO_START_ROUND: usize = 2;
pub const DEFAULT_SUICIDE_PENALTY: i32 = 1;
pub const DEFAULT_ROUND_END_DELAY_SECONDS: u64 = 10;

pub fn seconds_to_ticks(seconds: u64, tick_speed: u32) -> u64 {
    seconds.saturating_mul(tick_speed as u64)
}

pub fn ms_to_ticks(ms: u64, tick_speed: u32) -> u64 {
    (ms.saturating_mul(tick_speed as u64) / 1000).max(1)
}

pub fn time_limit_ticks(minutes: u32, tick_speed: u32) -> Option<u64> {
    if minutes == 0 {
        return None;
    }
    Some(seconds_to_ticks(minutes as u64 * 60, tick_speed))
}
