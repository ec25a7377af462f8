// constants.rs — wire enums and gameplay tunables
//
// Every enum that crosses the wire has explicit discriminants and a
// fallible conversion from the raw integer; an out-of-range value is a
// protocol violation, never a panic.

use crate::bytes::CodecError;

pub const PROTOCOL_VERSION: u32 = 3;

pub const MAX_PLAYERS: usize = 32;
pub const MAX_ENTITIES: usize = 255;
pub const MAX_SOUND_LOOPS: usize = 255;

pub const NAME_FIELD_WIDTH: usize = 16;
pub const MAX_CHAT_SIZE: usize = 90;

pub const TC_CAPTURE_DISTANCE: f32 = 16.0;
pub const TC_CAPTURE_RATE: f32 = 0.05;
pub const MIN_TERRITORY_COUNT: usize = 3;
pub const MAX_TERRITORY_COUNT: usize = 7;

pub const SPAWN_RADIUS: i32 = 32;

pub const MELEE_DISTANCE: f32 = 3.0;
pub const MELEE_DAMAGE: u8 = 50;

/// Minimum dot product between the shooter's orientation and the exact
/// shooter→victim direction for a hit claim to be believable.
pub const HIT_AIM_TOLERANCE: f32 = 0.9;

pub const ROCKET_SPEED: f32 = 45.0;
/// Nose-drop applied to a rocket in flight, degrees per second.
pub const ROCKET_FALLOFF: f32 = 25.0;

/// Slack subtracted from rate-limit windows to absorb client jitter.
pub const RAPID_TOLERANCE: f64 = 0.025;

/// Thrown/fired objects must originate within this range of the
/// server-tracked player position.
pub const ITEM_SPAWN_TOLERANCE: f32 = 3.0;

pub const EXPLOSION_RADIUS: f32 = 16.0;
pub const GRENADE_FUSE: f32 = 5.0;

pub const PACK_CHUNK_SIZE: usize = 1024;
pub const MAP_CHUNK_SIZE: usize = 1024;
pub const PACK_RESPONSE_TIMEOUT: f64 = 3.0;

pub const DEFAULT_BLOCK_COLOR: (u8, u8, u8) = (112, 112, 112);

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident: $raw:ty { $($var:ident = $val:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i8)]
        pub enum $name {
            $($var = $val),+
        }

        impl $name {
            pub fn from_raw(v: $raw) -> Result<Self, CodecError> {
                match v {
                    $($val => Ok(Self::$var),)+
                    _ => Err(CodecError::BadEnum {
                        what: stringify!($name),
                        value: v as i32,
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Selectable weapon classes.
    Weapon: u8 {
        Semi = 0,
        Smg = 1,
        Shotgun = 2,
        Sniper = 3,
    }
}

wire_enum! {
    /// Body zone reported in a hit claim.
    Hit: u8 {
        Torso = 0,
        Head = 1,
        Arms = 2,
        Legs = 3,
        Melee = 4,
    }
}

wire_enum! {
    /// The player's currently-held interactor.
    Tool: u8 {
        Spade = 0,
        Block = 1,
        Weapon = 2,
        Grenade = 3,
        Rpg = 4,
        Mg = 5,
    }
}

wire_enum! {
    /// Block mutation kinds carried by BlockAction.
    BlockActionKind: u8 {
        Build = 0,
        Destroy = 1,
        Spade = 2,
        Grenade = 3,
    }
}

wire_enum! {
    Chat: u8 {
        All = 0,
        Team = 1,
        System = 2,
        Big = 3,
    }
}

wire_enum! {
    ScoreKind: u8 {
        Team = 0,
        Player = 1,
    }
}

wire_enum! {
    EntityKind: u8 {
        Flag = 0,
        CommandPost = 1,
        Helicopter = 2,
        AmmoCrate = 3,
        HealthCrate = 4,
        MachineGun = 5,
    }
}

wire_enum! {
    Kill: u8 {
        Weapon = 0,
        Headshot = 1,
        Melee = 2,
        Grenade = 3,
        Fall = 4,
        TeamChange = 5,
        ClassChange = 6,
    }
}

wire_enum! {
    Disconnect: u8 {
        Undefined = 0,
        Banned = 1,
        Kicked = 2,
        WrongVersion = 3,
        Full = 4,
    }
}

wire_enum! {
    EntityChange: u8 {
        SetState = 0,
        SetPosition = 1,
        SetCarrier = 2,
    }
}

wire_enum! {
    Damage: u8 {
        SelfInflicted = 0,
        Other = 1,
        Heal = 3,
    }
}

wire_enum! {
    /// Team ids as they appear on the wire (signed byte).
    TeamId: i8 {
        Spectator = -1,
        Team1 = 0,
        Team2 = 1,
        Neutral = 2,
    }
}

impl TeamId {
    /// The opposing playable team, if there is one.
    pub fn other(self) -> Option<TeamId> {
        match self {
            TeamId::Team1 => Some(TeamId::Team2),
            TeamId::Team2 => Some(TeamId::Team1),
            _ => None,
        }
    }

    pub fn playable(self) -> bool {
        matches!(self, TeamId::Team1 | TeamId::Team2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_from_raw() {
        assert_eq!(Weapon::from_raw(2).unwrap(), Weapon::Shotgun);
        assert!(Weapon::from_raw(4).is_err());
        assert_eq!(TeamId::from_raw(-1).unwrap(), TeamId::Spectator);
        assert!(TeamId::from_raw(3).is_err());
        assert_eq!(Disconnect::from_raw(4).unwrap(), Disconnect::Full);
    }

    #[test]
    fn test_team_other() {
        assert_eq!(TeamId::Team1.other(), Some(TeamId::Team2));
        assert_eq!(TeamId::Team2.other(), Some(TeamId::Team1));
        assert_eq!(TeamId::Neutral.other(), None);
        assert!(!TeamId::Spectator.playable());
    }
}
