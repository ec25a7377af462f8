// server.rs — the authoritative server: owns the map, the tables and
// the tick loop
//
// One logical task owns all state. Subsystems never read wall time;
// everything runs off `Server::time`, which `run()` advances from a
// real clock and tests advance by hand.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crc::{Crc, CRC_32_ISO_HDLC};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use bunker_common::constants::{
    Chat, ScoreKind, TeamId, MAX_CHAT_SIZE, MAX_ENTITIES, MAX_SOUND_LOOPS, PROTOCOL_VERSION,
};
use bunker_common::bytes::Rgb;
use bunker_common::math3d::Vec3;
use bunker_common::packets::{
    ChatMessage, Packet, PlaySound, SetScore, StateData, StopSound, WorldEntry, WorldUpdate,
};
use bunker_common::vxl::VxlMap;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::entity::Entity;
use crate::hooks::{Hooks, Outcome};
use crate::modes::{self, GameMode};
use crate::net::{Host, LanInfo, NetEvent};
use crate::objects::Explosive;
use crate::team::{Team, Teams};
use crate::util::IdPool;

const TICK_SECONDS: f64 = 1.0 / 30.0;

const PACK_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct Pack {
    pub data: Vec<u8>,
    pub crc: u32,
}

pub struct Sound {
    pub name: String,
    pub position: Option<Vec3>,
}

pub struct Server {
    pub config: ServerConfig,
    pub host: Host,
    pub map: VxlMap,
    pub packs: Vec<Pack>,
    pub time: f64,
    pub rng: StdRng,

    pub player_ids: IdPool,
    pub entity_ids: IdPool,
    pub sound_ids: IdPool,

    /// Keyed by player id; peers are resolved through `peer_index`.
    pub connections: HashMap<u8, Connection>,
    pub peer_index: HashMap<usize, u8>,
    pub teams: Teams,
    pub entities: BTreeMap<u8, Entity>,
    pub objects: Vec<Explosive>,
    pub sounds: HashMap<u8, Sound>,

    pub hooks: Hooks,
    mode: Option<Box<dyn GameMode>>,
    pub running: bool,
}

impl Server {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let map = if config.map.as_os_str().is_empty() {
            VxlMap::flat(config.map_width, config.map_length)
        } else {
            let bytes = std::fs::read(&config.map)?;
            VxlMap::from_vxl(&bytes, config.map_width, config.map_length)?
        };

        let mut packs = Vec::new();
        for path in &config.packs {
            let data = std::fs::read(path)?;
            let crc = PACK_CRC.checksum(&data);
            packs.push(Pack { data, crc });
        }

        let host = Host::bind(("0.0.0.0", config.port), config.max_players + 8)?;

        let teams = Teams::new(
            Team::new(TeamId::Team1, &config.team1.name, config.team1_color()),
            Team::new(TeamId::Team2, &config.team2.name, config.team2_color()),
        );

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let max_players = config.max_players;

        let mut server = Self {
            host,
            map,
            packs,
            time: 0.0,
            rng: StdRng::seed_from_u64(seed),
            player_ids: IdPool::new(max_players),
            entity_ids: IdPool::new(MAX_ENTITIES),
            sound_ids: IdPool::new(MAX_SOUND_LOOPS),
            connections: HashMap::new(),
            peer_index: HashMap::new(),
            teams,
            entities: BTreeMap::new(),
            objects: Vec::new(),
            sounds: HashMap::new(),
            hooks: Hooks::default(),
            mode: None,
            running: true,
            config,
        };

        let mut mode = modes::load(&server.config.mode);
        mode.init(&mut server);
        server.mode = Some(mode);
        server.refresh_lan_info();
        Ok(server)
    }

    /// Wall-clock loop around `advance`; the only place real time is
    /// read.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let addr = self.host.local_addr()?;
        info!(%addr, mode = %self.mode_name(), "server up");
        let mut last = Instant::now();
        while self.running {
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64();
            last = now;
            self.advance(dt);
            std::thread::sleep(Duration::from_secs_f64(TICK_SECONDS));
        }
        info!("server stopping");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// One simulation step: drain the network, update everything, emit
    /// the world snapshot, flush.
    pub fn advance(&mut self, dt: f64) {
        self.time += dt;

        while let Some(ev) = self.host.service(self.time) {
            match ev {
                NetEvent::Connect { peer, version } => self.handle_connect(peer, version),
                NetEvent::Receive { peer, data } => self.handle_receive(peer, &data),
                NetEvent::Disconnect { peer } => self.handle_peer_disconnect(peer),
            }
        }

        self.update_players(dt);
        self.update_entities(dt);
        self.update_objects(dt);
        self.with_mode(|mode, server| mode.update(server, dt));
        self.drain_hooks();
        self.world_update();

        self.refresh_lan_info();
        self.host.flush(self.time);
    }

    fn world_update(&mut self) {
        let entries: Vec<WorldEntry> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_alive())
            .map(|(pid, c)| WorldEntry {
                player_id: *pid,
                position: c.body.position,
                orientation: c.body.orientation,
            })
            .collect();
        if entries.is_empty() {
            return;
        }
        let bytes = Packet::WorldUpdate(WorldUpdate { entries }).to_bytes();
        self.host.broadcast_unsequenced(&bytes);
    }

    fn refresh_lan_info(&mut self) {
        self.host.info = LanInfo {
            name: self.config.name.clone(),
            players_current: self.connections.values().filter(|c| c.joined).count(),
            players_max: self.config.max_players,
            map: self
                .config
                .map
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "flat".to_string()),
            game_mode: self.mode_name(),
            game_version: PROTOCOL_VERSION,
        };
    }

    pub fn mode_name(&self) -> String {
        self.mode.as_ref().map(|m| m.name().to_string()).unwrap_or_default()
    }

    // ============================================================
    // Mode and hook plumbing
    // ============================================================

    /// Run a closure with the game mode detached from the server, so
    /// hooks can mutate authoritative state freely.
    pub fn with_mode<R>(
        &mut self,
        f: impl FnOnce(&mut Box<dyn GameMode>, &mut Server) -> R,
    ) -> Option<R> {
        let mut mode = self.mode.take()?;
        let r = f(&mut mode, self);
        self.mode = Some(mode);
        Some(r)
    }

    /// Same detach dance for the script hook registry.
    pub fn check_hooks<R>(
        &mut self,
        f: impl FnOnce(&mut Hooks, &mut Server) -> Option<Outcome<R>>,
    ) -> Option<Outcome<R>> {
        let mut hooks = std::mem::take(&mut self.hooks);
        let r = f(&mut hooks, self);
        let newer = std::mem::replace(&mut self.hooks, hooks);
        self.hooks.absorb(newer);
        r
    }

    /// Deliver the tick's queued events.
    pub fn drain_hooks(&mut self) {
        let mut hooks = std::mem::take(&mut self.hooks);
        hooks.drain(self);
        let newer = std::mem::replace(&mut self.hooks, hooks);
        self.hooks.absorb(newer);
    }

    // ============================================================
    // Sending
    // ============================================================

    pub fn broadcast(&mut self, packet: &Packet) {
        let bytes = packet.to_bytes();
        self.host.broadcast(&bytes);
    }

    pub fn broadcast_others(&mut self, packet: &Packet, except: u8) {
        let bytes = packet.to_bytes();
        for (pid, conn) in &self.connections {
            if *pid != except {
                self.host.send(conn.peer, &bytes);
            }
        }
    }

    pub fn send_to_player(&mut self, player: u8, packet: &Packet) {
        if let Some(conn) = self.connections.get(&player) {
            let bytes = packet.to_bytes();
            self.host.send(conn.peer, &bytes);
        }
    }

    /// System chat to everyone, wrapped to chat width.
    pub fn broadcast_message(
        &mut self,
        message: &str,
        chat_type: Chat,
        from: u8,
        team: Option<TeamId>,
    ) {
        for line in crate::util::wrap_message(message, MAX_CHAT_SIZE) {
            let packet = Packet::ChatMessage(ChatMessage {
                player_id: from,
                chat_type,
                value: line,
            });
            match team {
                None => self.broadcast(&packet),
                Some(team) => {
                    let bytes = packet.to_bytes();
                    for conn in self.connections.values() {
                        if conn.team == team {
                            self.host.send(conn.peer, &bytes);
                        }
                    }
                }
            }
        }
    }

    pub fn broadcast_hud_message(&mut self, message: &str) {
        self.broadcast_message(message, Chat::Big, 0xFF, None);
    }

    pub fn broadcast_server_message(&mut self, message: &str) {
        self.broadcast_message(message, Chat::System, 0xFF, None);
    }

    // ============================================================
    // Scores
    // ============================================================

    pub fn set_team_score(&mut self, team: TeamId, value: u8) {
        if let Some(t) = self.teams.get_mut(team) {
            t.score = value;
            self.broadcast(&Packet::SetScore(SetScore {
                kind: ScoreKind::Team,
                specifier: team as i8,
                value,
            }));
        }
    }

    pub fn add_team_score(&mut self, team: TeamId, delta: i32) {
        if let Some(t) = self.teams.get(team) {
            let value = (t.score as i32 + delta).clamp(0, 255) as u8;
            self.set_team_score(team, value);
        }
    }

    pub fn set_player_score(&mut self, player: u8, value: u8) {
        if let Some(conn) = self.connections.get_mut(&player) {
            conn.score = value;
            self.broadcast(&Packet::SetScore(SetScore {
                kind: ScoreKind::Player,
                specifier: player as i8,
                value,
            }));
        }
    }

    pub fn add_player_score(&mut self, player: u8, delta: i32) {
        if let Some(conn) = self.connections.get(&player) {
            let value = (conn.score as i32 + delta).clamp(0, 255) as u8;
            self.set_player_score(player, value);
        }
    }

    // ============================================================
    // Sounds
    // ============================================================

    /// Fire-and-forget sound for everyone.
    pub fn play_sound(&mut self, name: &str, position: Option<Vec3>) {
        self.broadcast(&Packet::PlaySound(PlaySound {
            name: name.to_string(),
            looping: false,
            loop_id: 0,
            position,
        }));
    }

    /// A looping sound holds an id until destroyed.
    pub fn start_sound_loop(&mut self, name: &str, position: Option<Vec3>) -> Option<u8> {
        let id = self.sound_ids.take()?;
        self.sounds.insert(id, Sound { name: name.to_string(), position });
        self.broadcast(&Packet::PlaySound(PlaySound {
            name: name.to_string(),
            looping: true,
            loop_id: id,
            position,
        }));
        Some(id)
    }

    pub fn stop_sound_loop(&mut self, id: u8) {
        if self.sounds.remove(&id).is_some() {
            self.broadcast(&Packet::StopSound(StopSound { loop_id: id }));
            self.sound_ids.put(id);
        }
    }

    // ============================================================
    // State snapshot
    // ============================================================

    pub fn state_data(&self, player_id: u8) -> StateData {
        StateData {
            player_id,
            fog_color: self.config.fog(),
            team1: self.teams.team1.to_data(),
            team2: self.teams.team2.to_data(),
            mode_name: self.mode_name(),
            score_limit: self
                .mode
                .as_ref()
                .map(|m| m.score_limit())
                .unwrap_or(self.config.score_limit),
            entities: self.entities.values().map(|e| e.to_data()).collect(),
        }
    }

    /// Shared respawn wave: wait until the next whole-second boundary of
    /// the configured window.
    pub fn respawn_delay(&self) -> f64 {
        let window = self.config.respawn_time.max(1.0);
        (window - (self.time % window)).ceil()
    }

    /// Random ground position inside a team's end of the map.
    pub fn random_team_position(&mut self, team: TeamId) -> Vec3 {
        let width = self.map.width() as i32;
        let length = self.map.length() as i32;
        let sections = width / 8;
        let offset = match team {
            TeamId::Team2 => width - sections * 2,
            _ => 0,
        };
        let (x, y, z) =
            self.map
                .random_point(&mut self.rng, offset, 0, offset + sections * 2, length);
        Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 - 2.0)
    }

    pub fn fog_color(&self) -> Rgb {
        self.config.fog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use bunker_common::constants::{Tool, Weapon, PROTOCOL_VERSION};
    use bunker_common::packets::{ExistingPlayer, Packet};

    use crate::net::PeerId;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            map_width: 64,
            map_length: 64,
            seed: Some(3),
            ..Default::default()
        }
    }

    fn loopback_pair() -> (Server, Host, SocketAddr) {
        let server = Server::new(test_config()).unwrap();
        let port = server.host.local_addr().unwrap().port();
        let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let client = Host::bind("127.0.0.1:0", 1).unwrap();
        (server, client, target)
    }

    #[test]
    fn test_full_join_flow_over_loopback() {
        let (mut server, mut client, target) = loopback_pair();
        let peer = client.connect(target, PROTOCOL_VERSION, 0.0).unwrap();

        let step = 1.0 / 30.0;
        let mut t = 0.0;
        let mut got: Vec<Packet> = Vec::new();
        let mut connected = false;
        for _ in 0..300 {
            t += step;
            server.advance(step);
            client.flush(t);
            while let Some(ev) = client.service(t) {
                match ev {
                    NetEvent::Connect { .. } => connected = true,
                    NetEvent::Receive { data, .. } => {
                        if let Ok(p) = Packet::from_bytes(&data) {
                            got.push(p);
                        }
                    }
                    NetEvent::Disconnect { .. } => panic!("dropped during load"),
                }
            }
            if got.iter().any(|p| matches!(p, Packet::StateData(_))) {
                break;
            }
        }
        assert!(connected, "handshake completed");

        // loading order: initial info, the whole map, then state
        assert!(matches!(got.first(), Some(Packet::InitialInfo(_))), "got {:?}", got.first());
        let announced = got
            .iter()
            .find_map(|p| match p {
                Packet::MapStart(m) => Some(m.size as usize),
                _ => None,
            })
            .expect("map start");
        let streamed: usize = got
            .iter()
            .filter_map(|p| match p {
                Packet::MapChunk(c) => Some(c.data.len()),
                _ => None,
            })
            .sum();
        assert_eq!(streamed, announced, "map stream complete");

        let state = got
            .iter()
            .find_map(|p| match p {
                Packet::StateData(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(state.player_id, 0);
        assert_eq!(state.mode_name, "CTF");
        assert_eq!(state.entities.len(), 4, "two flags, two posts");

        // pick a name, a team and a gun
        let hello = Packet::ExistingPlayer(ExistingPlayer {
            player_id: 0,
            team: TeamId::Team1,
            weapon: Weapon::Smg,
            tool: Tool::Weapon,
            score: 0,
            color: Rgb::new(112, 112, 112),
            name: "Deuce".into(),
        });
        client.send(peer, &hello.to_bytes());

        let mut created = None;
        let mut saw_world_update = false;
        for _ in 0..100 {
            t += step;
            client.flush(t);
            server.advance(step);
            while let Some(ev) = client.service(t) {
                if let NetEvent::Receive { data, .. } = ev {
                    match Packet::from_bytes(&data) {
                        Ok(Packet::CreatePlayer(cp)) => created = Some(cp),
                        Ok(Packet::WorldUpdate(wu)) => {
                            saw_world_update |= wu.entries.iter().any(|e| e.player_id == 0);
                        }
                        _ => {}
                    }
                }
            }
            if created.is_some() && saw_world_update {
                break;
            }
        }
        let created = created.expect("spawn announced");
        assert_eq!(created.player_id, 0);
        assert_eq!(created.name, "Deuce0", "placeholder names get the id");
        assert!(saw_world_update, "unsequenced snapshots flowing");

        let conn = &server.connections[&0];
        assert_eq!(conn.hp, 100);
        assert_eq!((conn.gun.clip, conn.gun.reserve), (30, 120));
        assert_eq!(conn.score, 0);
    }

    #[test]
    fn test_wrong_version_turned_away() {
        let (mut server, mut client, target) = loopback_pair();
        client.connect(target, PROTOCOL_VERSION + 5, 0.0).unwrap();

        let step = 1.0 / 30.0;
        let mut t = 0.0;
        let mut refused = false;
        for _ in 0..100 {
            t += step;
            server.advance(step);
            client.flush(t);
            while let Some(ev) = client.service(t) {
                if matches!(ev, NetEvent::Disconnect { .. }) {
                    refused = true;
                }
            }
            if refused {
                break;
            }
        }
        assert!(refused);
        assert!(server.connections.is_empty());
        assert_eq!(server.player_ids.available(), server.config.max_players);
    }

    #[test]
    fn test_respawn_delay_rounds_up_to_wave() {
        let mut server = Server::new(test_config()).unwrap();
        server.time = 0.0;
        assert_eq!(server.respawn_delay(), 8.0);
        server.time = 7.2;
        assert_eq!(server.respawn_delay(), 1.0);
        server.time = 8.0 + 3.5;
        assert_eq!(server.respawn_delay(), 5.0);
    }

    #[test]
    fn test_sound_loop_ids_recycle() {
        let mut server = Server::new(test_config()).unwrap();
        let id = server.start_sound_loop("c4beep", None).unwrap();
        assert!(server.sounds.contains_key(&id));
        server.stop_sound_loop(id);
        assert!(!server.sounds.contains_key(&id));
        assert_eq!(server.start_sound_loop("horn", None), Some(id));
    }

    #[test]
    fn test_team_score_clamps() {
        let mut server = Server::new(test_config()).unwrap();
        server.set_team_score(TeamId::Team1, 250);
        server.add_team_score(TeamId::Team1, 100);
        assert_eq!(server.teams.team1.score, 255);
        server.add_team_score(TeamId::Team1, -1000);
        assert_eq!(server.teams.team1.score, 0);
    }

    #[test]
    fn test_fake_peer_sends_are_harmless() {
        // server helpers must tolerate peers that never existed
        let mut server = Server::new(test_config()).unwrap();
        server.handle_connect(PeerId(7), PROTOCOL_VERSION);
        assert_eq!(server.connections.len(), 1);
        server.handle_peer_disconnect(PeerId(7));
        assert!(server.connections.is_empty());
    }
}
