// config.rs — the settled server configuration
//
// Argument handling and fancy layering live outside the core; the
// server consumes this struct as-is. TOML on disk, serde in memory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use bunker_common::bytes::Rgb;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Server name shown in discovery replies.
    pub name: String,
    pub port: u16,
    /// Path to the .vxl map, empty for the built-in flat playground.
    pub map: PathBuf,
    pub map_width: usize,
    pub map_length: usize,
    /// Content packs streamed to clients that lack them.
    pub packs: Vec<PathBuf>,
    pub mode: String,
    pub max_players: usize,
    pub score_limit: u8,
    /// Upper bound of the shared respawn wave, seconds.
    pub respawn_time: f64,
    pub fog_color: [u8; 3],
    pub team1: TeamConfig,
    pub team2: TeamConfig,
    /// Seed for spawn-point randomness; fixed seeds give replayable
    /// rounds.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TeamConfig {
    pub name: String,
    pub color: [u8; 3],
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "bunker server".to_string(),
            port: 32887,
            map: PathBuf::new(),
            map_width: 512,
            map_length: 512,
            packs: Vec::new(),
            mode: "ctf".to_string(),
            max_players: 32,
            score_limit: 10,
            respawn_time: 8.0,
            fog_color: [128, 232, 255],
            team1: TeamConfig { name: "Blue".to_string(), color: [44, 117, 179] },
            team2: TeamConfig { name: "Green".to_string(), color: [137, 179, 44] },
            seed: None,
        }
    }
}

impl Default for TeamConfig {
    fn default() -> Self {
        TeamConfig { name: "Team".to_string(), color: [127, 127, 127] }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn fog(&self) -> Rgb {
        Rgb::new(self.fog_color[0], self.fog_color[1], self.fog_color[2])
    }

    pub fn team1_color(&self) -> Rgb {
        Rgb::new(self.team1.color[0], self.team1.color[1], self.team1.color[2])
    }

    pub fn team2_color(&self) -> Rgb {
        Rgb::new(self.team2.color[0], self.team2.color[1], self.team2.color[2])
    }
}
