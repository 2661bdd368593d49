use std::fmt;

use serde::Serialize;

/// Stable client slot index assigned by the host engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl PlayerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().map(Self)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    #[default]
    Free,
    Caught,
    Spectating,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Game,
    Spectators,
}

impl Team {
    pub fn of(state: PlayerState) -> Self {
        match state {
            PlayerState::Spectating => Self::Spectators,
            PlayerState::Free | PlayerState::Caught => Self::Game,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weapon {
    Hammer,
    Gun,
    Shotgun,
    Grenade,
    Laser,
    Ninja,
    /// Death tiles, falling out of the map.
    World,
    /// Voluntary self-kill.
    SelfKill,
    /// Killed by the game itself (team change, round reset).
    Game,
}

impl Weapon {
    pub fn is_lethal(self) -> bool {
        matches!(
            self,
            Self::Hammer | Self::Gun | Self::Shotgun | Self::Grenade | Self::Laser | Self::Ninja
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hammer" => Some(Self::Hammer),
            "gun" => Some(Self::Gun),
            "shotgun" => Some(Self::Shotgun),
            "grenade" => Some(Self::Grenade),
            "laser" => Some(Self::Laser),
            "ninja" => Some(Self::Ninja),
            "world" => Some(Self::World),
            "self" => Some(Self::SelfKill),
            "game" => Some(Self::Game),
            _ => None,
        }
    }
}

/// Why captives were freed. Only selects the text players receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Silent,
    EveryoneReleased,
    PlayerLeft,
    PlayerJoined,
    PlayerJoinedSpec,
    PlayerJoinedGameAgain,
    PlayerFailed,
    PlayerKilled,
    PlayerReleased,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum GamePhase {
    Warmup,
    Active,
    RoundEnding {
        #[serde(rename = "resumeTick")]
        resume_tick: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelfKillResolution {
    /// The most recent captive was released and the character survives.
    ReleasedInstead(PlayerId),
    Die,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundOutcome {
    Winner {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        name: String,
    },
    Draw,
    Timeout {
        survivors: Vec<PlayerId>,
    },
    Forced,
}

#[derive(Clone, Debug, Serialize)]
pub struct ParticipationEntry {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    pub name: String,
    pub score: i32,
    #[serde(rename = "ticksFree")]
    pub ticks_free: u64,
    #[serde(rename = "ticksCaught")]
    pub ticks_caught: u64,
    #[serde(rename = "freePercent")]
    pub free_percent: f32,
    #[serde(rename = "caughtPercent")]
    pub caught_percent: f32,
    #[serde(rename = "totalCaught")]
    pub total_caught: u32,
    #[serde(rename = "totalReleased")]
    pub total_released: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoundSummary {
    pub round: u32,
    pub outcome: RoundOutcome,
    #[serde(rename = "startTick")]
    pub start_tick: u64,
    #[serde(rename = "endTick")]
    pub end_tick: u64,
    pub players: Vec<ParticipationEntry>,
}

impl RoundSummary {
    pub fn duration_ticks(&self) -> u64 {
        self.end_tick.saturating_sub(self.start_tick)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    pub name: String,
    pub state: PlayerState,
    pub score: i32,
    #[serde(rename = "caughtBy")]
    pub caught_by: Option<PlayerId>,
    #[serde(rename = "wantsToSpectate")]
    pub wants_to_spectate: bool,
    pub captives: Vec<PlayerId>,
    #[serde(rename = "enemiesLeft")]
    pub enemies_left: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoundView {
    pub tick: u64,
    pub round: u32,
    #[serde(flatten)]
    pub phase: GamePhase,
    #[serde(rename = "ingamePlayers")]
    pub ingame_players: usize,
    pub players: Vec<PlayerView>,
}
