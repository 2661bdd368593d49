use serde_json::Value;

use crate::types::{PlayerId, Weapon};

#[derive(Debug)]
pub enum ParsedClientMessage {
    Hello {
        name: String,
        spectator: bool,
    },
    Attack {
        target: PlayerId,
        weapon: Weapon,
    },
    /// Death without an attacker: `world` or `self`.
    Die {
        cause: Weapon,
    },
    Team {
        spectator: bool,
    },
    /// Follow the captor while dead.
    DeadSpec {
        enabled: bool,
    },
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hello" => {
            let name = object.get("name")?.as_str()?.to_string();
            let spectator = match object.get("spectator") {
                None => false,
                Some(value) => value.as_bool()?,
            };
            Some(ParsedClientMessage::Hello { name, spectator })
        }
        "attack" => {
            let target = parse_optional_i64(object.get("target"))??;
            let target = u8::try_from(target).ok().map(PlayerId)?;
            let weapon = match object.get("weapon") {
                None => Weapon::Hammer,
                Some(value) => Weapon::parse(value.as_str()?)?,
            };
            if !weapon.is_lethal() {
                return None;
            }
            Some(ParsedClientMessage::Attack { target, weapon })
        }
        "die" => {
            let cause = match object.get("cause") {
                None => Weapon::SelfKill,
                Some(value) => Weapon::parse(value.as_str()?)?,
            };
            if !matches!(cause, Weapon::World | Weapon::SelfKill) {
                return None;
            }
            Some(ParsedClientMessage::Die { cause })
        }
        "team" => {
            let spectator = object.get("spectator")?.as_bool()?;
            Some(ParsedClientMessage::Team { spectator })
        }
        "dead_spec" => {
            let enabled = object.get("enabled")?.as_bool()?;
            Some(ParsedClientMessage::DeadSpec { enabled })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_optional_i64(value: Option<&Value>) -> Option<Option<i64>> {
    const MAX_SAFE_INTEGER_F64: f64 = 9_007_199_254_740_991.0;

    let Some(value) = value else {
        return Some(None);
    };
    if let Some(number) = value.as_i64() {
        return Some(Some(number));
    }
    if let Some(number) = value.as_u64() {
        return i64::try_from(number).ok().map(Some);
    }
    if let Some(number) = value.as_f64() {
        if number.is_finite() {
            let floored = number.floor();
            if floored.abs() > MAX_SAFE_INTEGER_F64 {
                return None;
            }
            return Some(Some(floored as i64));
        }
    }
    None
}
