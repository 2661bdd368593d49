use crate::types::ReleaseReason;

pub(super) fn enemies_left_line(enemies_left: usize) -> String {
    match enemies_left {
        0 => String::new(),
        1 => "1 enemy left".to_string(),
        count => format!("{count} enemies left"),
    }
}

/// Text sent to a freed captive. `None` for silent releases.
pub(super) fn release_line(reason: ReleaseReason, captor_name: &str) -> Option<String> {
    let text = match reason {
        ReleaseReason::Silent => return None,
        ReleaseReason::EveryoneReleased => "The round is over, everyone is free.".to_string(),
        ReleaseReason::PlayerLeft => format!("'{captor_name}' left the game, you are free."),
        ReleaseReason::PlayerJoined => {
            "Nobody is caught yet, you joined the running round.".to_string()
        }
        ReleaseReason::PlayerJoinedSpec => {
            format!("'{captor_name}' joined the spectators, you are free.")
        }
        ReleaseReason::PlayerJoinedGameAgain => "You joined the game again.".to_string(),
        ReleaseReason::PlayerFailed => format!("'{captor_name}' failed, you are free."),
        ReleaseReason::PlayerKilled => format!("'{captor_name}' was caught, you are free."),
        ReleaseReason::PlayerReleased => format!("'{captor_name}' released you."),
    };
    Some(text)
}

pub(super) fn caught_on_join_line(captor_name: &str) -> String {
    format!("You joined a running round. You will be free once '{captor_name}' dies.")
}

pub(super) fn spectate_intent_line(wants_to_spectate: bool, captor_name: &str) -> String {
    if wants_to_spectate {
        format!("You will join the spectators once '{captor_name}' dies.")
    } else {
        format!("You will join the game once '{captor_name}' dies.")
    }
}

/// Free and caught shares of the ticks played, in percent.
pub(super) fn participation(ticks_free: u64, ticks_caught: u64) -> Option<(f32, f32)> {
    let total = ticks_free.saturating_add(ticks_caught);
    if total == 0 {
        return None;
    }
    let free = ticks_free as f64 * 100.0 / total as f64;
    Some((free as f32, (100.0 - free) as f32))
}

pub(super) fn participation_line(free_percent: f32, caught_percent: f32) -> String {
    format!("Free: {free_percent:.2}% Caught: {caught_percent:.2}%")
}
