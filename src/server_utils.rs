use crate::constants::MAX_CLIENTS;

const MAX_NAME_LENGTH: usize = 16;

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(MAX_NAME_LENGTH).collect()
}

pub fn normalize_players_to_start(value: Option<i64>, fallback: usize) -> usize {
    match value {
        Some(raw) => raw.clamp(1, MAX_CLIENTS as i64) as usize,
        None => fallback,
    }
}

pub fn normalize_time_limit_minutes(value: Option<i64>, fallback: u32) -> u32 {
    match value {
        Some(raw) => raw.clamp(0, 60) as u32,
        None => fallback,
    }
}
