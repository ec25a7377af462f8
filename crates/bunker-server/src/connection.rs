// connection.rs — per-peer state machine and inbound packet authority
//
// Connecting → Loading → Joined ↔ Spawned/Dead → gone. Everything a
// client asks for is validated here against server state; a protocol
// violation costs the peer its connection, a mere authority failure is
// dropped silently.

use std::collections::HashMap;

use tracing::{debug, info};

use bunker_common::bytes::Rgb;
use bunker_common::constants::*;
use bunker_common::math3d::Vec3;
use bunker_common::packets::*;
use bunker_common::world;

use crate::hooks::{BlockEvent, ChatEvent, HurtEvent, KillEvent, Outcome, PlayerEvent, SpawnEvent};
use crate::net::PeerId;
use crate::server::Server;
use crate::weapons::{self, ToolState, WeaponState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// PackStart sent for this pack, waiting on the response window.
    Packs { index: usize },
    /// Map and state are out; waiting for the client's ExistingPlayer.
    AwaitJoin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Loading(LoadPhase),
    /// Spectating or otherwise in the roster without a body.
    Joined,
    Spawned,
    Dead,
}

/// Mode/script scratch storage on a player.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Float(f64),
    Int(i64),
    Str(String),
}

impl StoreValue {
    pub fn as_float(&self) -> f64 {
        match self {
            StoreValue::Float(f) => *f,
            StoreValue::Int(i) => *i as f64,
            StoreValue::Str(_) => 0.0,
        }
    }
}

pub struct Connection {
    pub peer: PeerId,
    pub id: u8,
    pub state: ConnState,
    pub name: String,
    pub joined: bool,

    pub hp: u8,
    pub score: u8,
    pub team: TeamId,
    pub weapon: Weapon,
    pub tool: Tool,

    pub spade: ToolState,
    pub block: ToolState,
    pub block_color: Rgb,
    pub grenade: ToolState,
    pub gun: WeaponState,
    pub rpg: WeaponState,

    pub body: world::Player,
    pub store: HashMap<String, StoreValue>,
    pub mounted: Option<u8>,

    pub respawn_at: Option<f64>,
    pub pack_deadline: Option<f64>,
    pub pending_team: Option<TeamId>,
    pub pending_weapon: Option<Weapon>,
}

impl Connection {
    pub fn new(peer: PeerId, id: u8) -> Self {
        let mut body = world::Player::new();
        body.alive = false;
        Self {
            peer,
            id,
            state: ConnState::Loading(LoadPhase::AwaitJoin),
            name: String::new(),
            joined: false,
            hp: 0,
            score: 0,
            team: TeamId::Spectator,
            weapon: Weapon::Semi,
            tool: Tool::Weapon,
            spade: ToolState::new(&weapons::SPADE_TOOL),
            block: ToolState::new(&weapons::BLOCK_TOOL),
            block_color: Rgb::from(DEFAULT_BLOCK_COLOR),
            grenade: ToolState::new(&weapons::GRENADE_TOOL),
            gun: WeaponState::new(weapons::weapon_spec(Weapon::Semi)),
            rpg: WeaponState::new(&weapons::RPG),
            body,
            store: HashMap::new(),
            mounted: None,
            respawn_at: None,
            pack_deadline: None,
            pending_team: None,
            pending_weapon: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == ConnState::Spawned && self.body.alive
    }

    pub fn restock_tools(&mut self) {
        self.spade.restock();
        self.block.restock();
        self.grenade.restock();
        self.gun.restock();
        self.rpg.restock();
    }

    fn release_tools(&mut self) {
        self.spade.release();
        self.block.release();
        self.grenade.release();
        self.gun.primary = false;
        self.gun.secondary = false;
        self.rpg.primary = false;
        self.rpg.secondary = false;
    }

    /// Rate gate for the currently held tool.
    fn tool_rapid(&mut self, now: f64, primary: bool, times: u32) -> bool {
        match self.tool {
            Tool::Spade => self.spade.check_rapid(now, primary, times),
            Tool::Block => self.block.check_rapid(now, primary, times),
            Tool::Grenade => self.grenade.check_rapid(now, primary, times),
            Tool::Weapon => self.gun.check_rapid(now, times),
            Tool::Rpg => self.rpg.check_rapid(now, times),
            Tool::Mg => true,
        }
    }

    pub fn to_existing_player(&self) -> ExistingPlayer {
        ExistingPlayer {
            player_id: self.id,
            team: self.team,
            weapon: self.weapon,
            tool: self.tool,
            score: self.score,
            color: self.block_color,
            name: self.name.clone(),
        }
    }
}

// ============================================================
// Connect / load / join
// ============================================================

impl Server {
    pub fn handle_connect(&mut self, peer: PeerId, version: u32) {
        if version != PROTOCOL_VERSION {
            debug!(?peer, version, "wrong protocol version");
            self.host.disconnect(peer, Disconnect::WrongVersion);
            return;
        }
        let Some(id) = self.player_ids.take() else {
            self.host.disconnect(peer, Disconnect::Full);
            return;
        };
        let conn = Connection::new(peer, id);
        self.peer_index.insert(peer.0, id);
        self.connections.insert(id, conn);
        self.hooks.on_player_connect.fire(PlayerEvent { player: id });

        let info = InitialInfo {
            mode_name: self.mode_name(),
            mode_description: self
                .with_mode(|m, _| m.description().to_string())
                .unwrap_or_default(),
        };
        self.send_to_player(id, &Packet::InitialInfo(info));

        if self.packs.is_empty() {
            self.send_map_and_state(id);
        } else {
            self.start_pack(id, 0);
        }
    }

    fn start_pack(&mut self, player: u8, index: usize) {
        let (crc, size) = {
            let pack = &self.packs[index];
            (pack.crc, pack.data.len() as u32)
        };
        self.send_to_player(player, &Packet::PackStart(PackStart { checksum: crc, size }));
        if let Some(conn) = self.connections.get_mut(&player) {
            conn.state = ConnState::Loading(LoadPhase::Packs { index });
            conn.pack_deadline = Some(self.time + PACK_RESPONSE_TIMEOUT);
        }
    }

    /// Next step of the pack handshake: stream if the client lacks the
    /// pack (or never answered), then move on.
    pub(crate) fn advance_pack(&mut self, player: u8, index: usize, cached: bool) {
        if !cached {
            let chunks: Vec<Vec<u8>> = self.packs[index]
                .data
                .chunks(PACK_CHUNK_SIZE)
                .map(|c| c.to_vec())
                .collect();
            for chunk in chunks {
                self.send_to_player(player, &Packet::PackChunk(PackChunk { data: chunk }));
            }
        }
        let next = index + 1;
        if next < self.packs.len() {
            self.start_pack(player, next);
        } else {
            self.send_map_and_state(player);
        }
    }

    fn send_map_and_state(&mut self, player: u8) {
        let mut stream = self.map.compressed();
        self.send_to_player(
            player,
            &Packet::MapStart(MapStart { size: stream.total_size() as u32 }),
        );
        while let Some(chunk) = stream.next_chunk(MAP_CHUNK_SIZE) {
            let packet = Packet::MapChunk(MapChunk { data: chunk.to_vec() });
            self.send_to_player(player, &packet);
        }

        let state = self.state_data(player);
        self.send_to_player(player, &Packet::StateData(state));

        let snapshots: Vec<ExistingPlayer> = self
            .connections
            .values()
            .filter(|c| c.joined)
            .map(|c| c.to_existing_player())
            .collect();
        for snap in snapshots {
            self.send_to_player(player, &Packet::ExistingPlayer(snap));
        }

        // StateData carried the carriers, but the client had no peers
        // registered yet; say it again now that it does
        let carried: Vec<(u8, i8)> = self
            .entities
            .values()
            .filter_map(|e| e.carrier.map(|c| (e.id, c as i8)))
            .collect();
        for (entity_id, carrier) in carried {
            self.send_to_player(
                player,
                &Packet::ChangeEntity(ChangeEntity {
                    entity_id,
                    change: EntityChangePayload::Carrier(carrier),
                }),
            );
        }

        if let Some(conn) = self.connections.get_mut(&player) {
            conn.state = ConnState::Loading(LoadPhase::AwaitJoin);
        }
    }

    fn recv_existing_player(&mut self, player: u8, p: ExistingPlayer) {
        let Some(conn) = self.connections.get(&player) else { return };
        if conn.state != ConnState::Loading(LoadPhase::AwaitJoin) {
            return;
        }
        if !p.team.playable() && p.team != TeamId::Spectator {
            self.drop_player(player, Disconnect::Undefined);
            return;
        }
        let name = self.validate_name(player, &p.name);
        let Some(conn) = self.connections.get_mut(&player) else { return };
        conn.name = name;
        conn.team = p.team;
        conn.weapon = p.weapon;
        conn.gun = WeaponState::new(weapons::weapon_spec(p.weapon));
        conn.joined = true;
        conn.state = ConnState::Joined;
        info!(player, name = %conn.name, team = ?conn.team, weapon = ?conn.weapon, "player joined");

        self.with_mode(|m, s| m.on_player_join(s, player));
        self.hooks.on_player_join.fire(PlayerEvent { player });
        self.spawn_player(player);
    }

    fn validate_name(&self, player: u8, raw: &str) -> String {
        let mut name = raw.trim().to_string();
        let mut end = name.len().min(NAME_FIELD_WIDTH);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
        if name.is_empty() || name == "Deuce" {
            name = format!("Deuce{player}");
        }
        let taken: Vec<String> = self
            .connections
            .values()
            .filter(|c| c.id != player && c.joined)
            .map(|c| c.name.to_lowercase())
            .collect();
        let base = name.clone();
        let mut suffix = 0;
        while taken.contains(&name.to_lowercase()) {
            name = format!("{base}{suffix}");
            suffix += 1;
        }
        name
    }

    // ============================================================
    // Teardown
    // ============================================================

    /// Server-initiated removal with a reason on the wire.
    pub fn drop_player(&mut self, player: u8, reason: Disconnect) {
        let Some(conn) = self.connections.get(&player) else { return };
        let peer = conn.peer;
        self.cleanup_player(player);
        self.host.disconnect(peer, reason);
    }

    pub fn handle_peer_disconnect(&mut self, peer: PeerId) {
        if let Some(&player) = self.peer_index.get(&peer.0) {
            self.cleanup_player(player);
        }
    }

    fn cleanup_player(&mut self, player: u8) {
        let Some(conn) = self.connections.get(&player) else { return };
        let peer_slot = conn.peer.0;
        let was_joined = conn.joined;

        if was_joined {
            self.with_mode(|m, s| m.on_player_leave(s, player));
            self.hooks.on_player_leave.fire(PlayerEvent { player });
        }
        // nothing may keep carrying this id once it returns to the pool
        self.clear_carriers_of(player);

        self.connections.remove(&player);
        self.peer_index.remove(&peer_slot);
        if was_joined {
            self.broadcast(&Packet::PlayerLeft(PlayerLeft { player_id: player }));
        }
        self.player_ids.put(player);
        info!(player, "player left");
    }

    // ============================================================
    // Dispatch
    // ============================================================

    pub fn handle_receive(&mut self, peer: PeerId, data: &[u8]) {
        let Some(&player) = self.peer_index.get(&peer.0) else { return };
        let packet = match Packet::from_bytes(data) {
            Ok(p) => p,
            Err(e) => {
                debug!(player, error = %e, "undecodable packet");
                self.drop_player(player, Disconnect::Undefined);
                return;
            }
        };
        self.dispatch(player, packet);
    }

    fn dispatch(&mut self, player: u8, packet: Packet) {
        match packet {
            Packet::PackResponse(p) => self.recv_pack_response(player, p),
            Packet::ExistingPlayer(p) => self.recv_existing_player(player, p),
            Packet::PositionOrientationData(p) => self.recv_position(player, p),
            Packet::InputData(p) => self.recv_input(player, p),
            Packet::WeaponInput(p) => self.recv_weapon_input(player, p),
            Packet::HitPacket(p) => self.recv_hit(player, p),
            Packet::UseOrientedItem(p) => self.recv_oriented_item(player, p),
            Packet::SetTool(p) => self.recv_set_tool(player, p),
            Packet::SetColor(p) => self.recv_set_color(player, p),
            Packet::BlockAction(p) => self.recv_block_action(player, p),
            Packet::BlockLine(p) => self.recv_block_line(player, p),
            Packet::ChatMessage(p) => self.recv_chat(player, p),
            Packet::WeaponReload(_) => self.recv_reload(player),
            Packet::ChangeTeam(p) => self.recv_change_team(player, p),
            Packet::ChangeClass(p) => self.recv_change_class(player, p),
            Packet::UseCommand(_) => self.recv_use_command(player),
            Packet::PlaceMG(p) => self.recv_place_mg(player, p),
            _ => {
                // a client has no business sending server-only packets
                self.drop_player(player, Disconnect::Undefined);
            }
        }
    }

    fn recv_pack_response(&mut self, player: u8, p: PackResponse) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if let ConnState::Loading(LoadPhase::Packs { index }) = conn.state {
            conn.pack_deadline = None;
            self.advance_pack(player, index, p.cached);
        }
    }

    // ============================================================
    // Movement
    // ============================================================

    fn recv_position(&mut self, player: u8, p: PositionOrientationData) {
        if !p.position.is_finite() || !p.orientation.is_finite() {
            self.drop_player(player, Disconnect::Undefined);
            return;
        }
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        if p.position.sq_distance(conn.body.position) >= 9.0 {
            // client drifted too far; snap it back to our truth
            let authoritative = conn.body.position;
            let peer = conn.peer;
            let bytes =
                Packet::PositionData(PositionData { position: authoritative }).to_bytes();
            self.host.send(peer, &bytes);
        } else {
            conn.body.position = p.position;
        }
        conn.body.set_orientation(p.orientation);
    }

    fn recv_input(&mut self, player: u8, p: InputData) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        let i = p.input;
        conn.body.set_walk(
            i.contains(InputFlags::UP),
            i.contains(InputFlags::DOWN),
            i.contains(InputFlags::LEFT),
            i.contains(InputFlags::RIGHT),
        );
        conn.body.set_animation(
            i.contains(InputFlags::JUMP),
            i.contains(InputFlags::CROUCH),
            i.contains(InputFlags::SNEAK),
            i.contains(InputFlags::SPRINT),
        );
        let mounted = conn.mounted;
        if let (Some(entity), false) = (mounted, i.is_empty()) {
            // any movement input gets you off the gun
            self.dismount(player, entity);
        }
        self.broadcast_others(
            &Packet::InputData(InputData { player_id: player, input: i }),
            player,
        );
    }

    fn recv_weapon_input(&mut self, player: u8, p: WeaponInput) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        let (primary, secondary);
        let mut resend = false;
        match conn.tool {
            Tool::Weapon => {
                let change = conn.gun.set_primary(p.primary);
                primary = change.accepted;
                resend = change.resend_ammo;
                secondary = conn.gun.set_secondary(p.secondary);
            }
            Tool::Rpg => {
                let change = conn.rpg.set_primary(p.primary);
                primary = change.accepted;
                resend = change.resend_ammo;
                secondary = conn.rpg.set_secondary(p.secondary);
            }
            Tool::Spade => {
                conn.spade.primary = p.primary;
                conn.spade.secondary = p.secondary;
                primary = p.primary;
                secondary = p.secondary;
            }
            Tool::Block => {
                conn.block.primary = p.primary;
                conn.block.secondary = p.secondary;
                primary = p.primary;
                secondary = p.secondary;
            }
            Tool::Grenade | Tool::Mg => {
                conn.grenade.primary = p.primary;
                conn.grenade.secondary = p.secondary;
                primary = p.primary;
                secondary = p.secondary;
            }
        }
        if resend {
            let ammo = WeaponReload {
                player_id: player,
                clip: conn.gun.clip as u8,
                reserve: conn.gun.reserve as u8,
            };
            let peer = conn.peer;
            let bytes = Packet::WeaponReload(ammo).to_bytes();
            self.host.send(peer, &bytes);
        }
        self.broadcast_others(
            &Packet::WeaponInput(WeaponInput { player_id: player, primary, secondary }),
            player,
        );
    }

    // ============================================================
    // Combat
    // ============================================================

    fn recv_hit(&mut self, player: u8, p: HitPacket) {
        let now = self.time;
        let Some(shooter) = self.connections.get(&player) else { return };
        if !shooter.is_alive() {
            return;
        }
        let Some(victim) = self.connections.get(&p.victim_id) else { return };
        if !victim.is_alive() || p.victim_id == player {
            return;
        }

        let shooter_pos = shooter.body.position;
        let orientation = shooter.body.orientation;
        let victim_pos = victim.body.position;
        let tool = shooter.tool;
        let mounted = shooter.mounted;
        let distance = shooter_pos.distance(victim_pos);

        let (damage, cause, eye);
        if p.zone == Hit::Melee {
            if tool != Tool::Spade {
                return;
            }
            let Some(shooter) = self.connections.get_mut(&player) else { return };
            if !shooter.spade.check_rapid(now, true, 1) {
                return;
            }
            if distance > MELEE_DISTANCE {
                return;
            }
            damage = MELEE_DAMAGE;
            cause = Kill::Melee;
            eye = shooter_pos;
        } else if let Some(entity) = mounted {
            // firing the mounted gun: its rate, its damage, its eye
            let Some((mg_eye, mg_damage)) = self.mg_fire(entity) else { return };
            damage = mg_damage;
            cause = if p.zone == Hit::Head { Kill::Headshot } else { Kill::Weapon };
            eye = mg_eye;
        } else {
            if tool != Tool::Weapon {
                return;
            }
            let Some(shooter) = self.connections.get_mut(&player) else { return };
            if !shooter.gun.check_rapid(now, 1) {
                return;
            }
            let Some(d) = shooter.gun.get_damage(p.zone, distance) else { return };
            damage = d;
            cause = if p.zone == Hit::Head { Kill::Headshot } else { Kill::Weapon };
            eye = shooter_pos;
        }

        if p.zone != Hit::Melee {
            // the claimed hit must roughly match where they are looking
            let expected = (victim_pos - eye).normalized();
            if orientation.dot(expected) <= HIT_AIM_TOLERANCE {
                return;
            }
        }

        self.hurt_player(p.victim_id, damage, cause, Some(player), shooter_pos);
    }

    fn recv_oriented_item(&mut self, player: u8, p: UseOrientedItem) {
        if !p.position.is_finite() || !p.velocity.is_finite() || !p.value.is_finite() {
            self.drop_player(player, Disconnect::Undefined);
            return;
        }
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if !conn.is_alive() || conn.tool != p.tool {
            return;
        }
        let body_pos = conn.body.position;
        let position = if p.position.sq_distance(body_pos)
            > ITEM_SPAWN_TOLERANCE * ITEM_SPAWN_TOLERANCE
        {
            body_pos
        } else {
            p.position
        };
        let velocity = if p.velocity.length() > ITEM_SPAWN_TOLERANCE {
            p.velocity.normalized() * ITEM_SPAWN_TOLERANCE
        } else {
            p.velocity
        };

        match p.tool {
            Tool::Grenade => {
                if !conn.grenade.consume() {
                    return;
                }
                let fuse = p.value.clamp(0.0, GRENADE_FUSE);
                self.throw_grenade(player, position, velocity, fuse);
            }
            Tool::Rpg => {
                if !conn.rpg.check_rapid(self.time, 1) || conn.rpg.clip == 0 {
                    return;
                }
                conn.rpg.consume_round();
                let orientation = p.velocity.normalized();
                if orientation == Vec3::ZERO {
                    return;
                }
                self.fire_rocket(player, position, orientation);
            }
            _ => {}
        }
    }

    // ============================================================
    // Tools and blocks
    // ============================================================

    fn recv_set_tool(&mut self, player: u8, p: SetTool) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        if p.tool == Tool::Mg && conn.mounted.is_none() {
            return;
        }
        conn.tool = p.tool;
        conn.release_tools();
        self.broadcast_others(&Packet::SetTool(SetTool { player_id: player, tool: p.tool }), player);
    }

    fn recv_set_color(&mut self, player: u8, p: SetColor) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned || conn.tool != Tool::Block {
            return;
        }
        conn.block_color = p.color;
        self.broadcast_others(
            &Packet::SetColor(SetColor { player_id: player, color: p.color }),
            player,
        );
    }

    fn recv_block_action(&mut self, player: u8, p: BlockAction) {
        let now = self.time;
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if !conn.is_alive() {
            return;
        }
        let (x, y, z) = (p.x, p.y, p.z);
        let ev = BlockEvent { player, action: p.action, x, y, z };

        match p.action {
            BlockActionKind::Build => {
                if conn.tool != Tool::Block
                    || conn.block.primary_ammo == 0
                    || !conn.block.check_rapid(now, true, 1)
                {
                    return;
                }
                if !self.map.can_build(x, y, z) {
                    return;
                }
                if self.build_vetoed(&ev) {
                    return;
                }
                // a veto hook may have dropped the player outright
                let Some(conn) = self.connections.get_mut(&player) else { return };
                conn.block.consume();
                let c = conn.block_color;
                let argb =
                    0x7F00_0000 | (c.r as u32) << 16 | (c.g as u32) << 8 | c.b as u32;
                self.map.set_point(x, y, z, true, argb);
                self.broadcast(&Packet::BlockAction(p));
                self.hooks.on_build_block.fire(ev);
            }
            BlockActionKind::Destroy => {
                if let Some(entity) = conn.mounted {
                    // shooting blocks from a mounted gun uses its gate
                    if self.mg_fire(entity).is_none() {
                        return;
                    }
                } else if !conn.tool_rapid(now, true, 2) {
                    return;
                }
                if !self.map.can_destroy(x, y, z) {
                    return;
                }
                if self.destroy_vetoed(&ev) {
                    return;
                }
                self.map.destroy_point(x, y, z);
                if let Some(conn) = self.connections.get_mut(&player) {
                    conn.block.refund();
                }
                self.broadcast(&Packet::BlockAction(p));
                self.hooks.on_destroy_block.fire(ev);
            }
            BlockActionKind::Spade => {
                if conn.tool != Tool::Spade || !conn.spade.check_rapid(now, false, 1) {
                    return;
                }
                if self.destroy_vetoed(&ev) {
                    return;
                }
                for dz in [0, -1, 1] {
                    self.map.destroy_point(x, y, z + dz);
                }
                self.broadcast(&Packet::BlockAction(p));
                self.hooks.on_destroy_block.fire(ev);
            }
            // the server carves craters itself; clients never ask for it
            BlockActionKind::Grenade => {}
        }
    }

    fn recv_block_line(&mut self, player: u8, p: BlockLine) {
        let now = self.time;
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if !conn.is_alive() || conn.tool != Tool::Block {
            return;
        }
        if !conn.block.check_rapid(now, false, 1) {
            return;
        }
        let cells = self.map.block_line(p.start, p.end);
        if cells.is_empty() {
            return;
        }
        let Some(conn) = self.connections.get(&player) else { return };
        if (conn.block.primary_ammo as usize) < cells.len() {
            return;
        }
        let ev = BlockEvent {
            player,
            action: BlockActionKind::Build,
            x: p.start.0,
            y: p.start.1,
            z: p.start.2,
        };
        if self.build_vetoed(&ev) {
            return;
        }
        let Some(color) = self.connections.get(&player).map(|c| c.block_color) else {
            return;
        };
        let argb =
            0x7F00_0000 | (color.r as u32) << 16 | (color.g as u32) << 8 | color.b as u32;
        let mut placed = 0u16;
        for (x, y, z) in cells {
            if !self.map.is_solid(x, y, z) && self.map.set_point(x, y, z, true, argb) {
                placed += 1;
            }
        }
        if let Some(conn) = self.connections.get_mut(&player) {
            conn.block.primary_ammo = conn.block.primary_ammo.saturating_sub(placed);
        }
        self.broadcast(&Packet::BlockLine(p));
        self.hooks.on_build_block.fire(ev);
    }

    fn build_vetoed(&mut self, ev: &BlockEvent) -> bool {
        let mode = self.with_mode(|m, s| m.try_build_block(s, ev)).flatten();
        let out = mode.or_else(|| self.check_hooks(|h, s| h.try_build_block.check(s, ev)));
        matches!(out, Some(Outcome::Cancel))
    }

    fn destroy_vetoed(&mut self, ev: &BlockEvent) -> bool {
        let mode = self.with_mode(|m, s| m.try_destroy_block(s, ev)).flatten();
        let out = mode.or_else(|| self.check_hooks(|h, s| h.try_destroy_block.check(s, ev)));
        matches!(out, Some(Outcome::Cancel))
    }

    // ============================================================
    // Chat and roster changes
    // ============================================================

    fn recv_chat(&mut self, player: u8, p: ChatMessage) {
        let Some(conn) = self.connections.get(&player) else { return };
        if !conn.joined || !matches!(p.chat_type, Chat::All | Chat::Team) {
            return;
        }
        let team = conn.team;
        let ev = ChatEvent { player, chat_type: p.chat_type, message: p.value.clone() };
        let mode = self.with_mode(|m, s| m.try_chat_message(s, &ev)).flatten();
        let out = mode.or_else(|| self.check_hooks(|h, s| h.try_chat_message.check(s, &ev)));
        let message = match out {
            Some(Outcome::Cancel) => return,
            Some(Outcome::Override(m)) => m,
            None => p.value,
        };
        let filter = (p.chat_type == Chat::Team).then_some(team);
        self.broadcast_message(&message, p.chat_type, player, filter);
        self.hooks.on_chat_message.fire(ev);
    }

    fn recv_reload(&mut self, player: u8) {
        let now = self.time;
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        match conn.tool {
            Tool::Weapon => {
                conn.gun.reload(now);
            }
            Tool::Rpg => {
                conn.rpg.reload(now);
            }
            _ => {}
        }
    }

    fn recv_change_team(&mut self, player: u8, p: ChangeTeam) {
        if !p.team.playable() && p.team != TeamId::Spectator {
            return;
        }
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if !conn.joined {
            return;
        }
        conn.pending_team = Some(p.team);
        match conn.state {
            ConnState::Spawned => self.kill_player(player, Kill::TeamChange, None),
            ConnState::Joined => self.spawn_player(player),
            _ => {}
        }
    }

    fn recv_change_class(&mut self, player: u8, p: ChangeClass) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if !conn.joined {
            return;
        }
        conn.pending_weapon = Some(p.weapon);
        if conn.state == ConnState::Spawned {
            self.kill_player(player, Kill::ClassChange, None);
        }
    }

    fn recv_use_command(&mut self, player: u8) {
        let Some(conn) = self.connections.get(&player) else { return };
        if !conn.is_alive() {
            return;
        }
        self.try_mount(player);
        self.with_mode(|m, s| m.on_use_command(s, player));
        self.hooks.on_use_command.fire(PlayerEvent { player });
    }

    fn recv_place_mg(&mut self, player: u8, p: PlaceMG) {
        if !p.yaw.is_finite() {
            self.drop_player(player, Disconnect::Undefined);
            return;
        }
        let Some(conn) = self.connections.get(&player) else { return };
        if !conn.is_alive() {
            return;
        }
        let pos = conn.body.position;
        let target = Vec3::new(p.x as f32 + 0.5, p.y as f32 + 0.5, p.z as f32);
        if pos.sq_distance(target) > (2.0 * ITEM_SPAWN_TOLERANCE).powi(2) {
            return;
        }
        let team = conn.team;
        let ground = self.map.get_z(p.x, p.y, p.z) as f32;
        let place = Vec3::new(target.x, target.y, ground);
        if let Some(id) = self.create_entity(EntityKind::MachineGun, place, Some(team)) {
            if let Some(ent) = self.entities.get_mut(&id) {
                ent.yaw = p.yaw;
            }
        }
    }

    // ============================================================
    // Life cycle
    // ============================================================

    pub fn hurt_player(
        &mut self,
        victim: u8,
        damage: u8,
        cause: Kill,
        damager: Option<u8>,
        source: Vec3,
    ) {
        let Some(conn) = self.connections.get(&victim) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        let ev = HurtEvent { player: victim, damage, damager, cause };
        let mode = self.with_mode(|m, s| m.try_player_hurt(s, &ev)).flatten();
        let out = mode.or_else(|| self.check_hooks(|h, s| h.try_player_hurt.check(s, &ev)));
        let damage = match out {
            Some(Outcome::Cancel) => return,
            Some(Outcome::Override(d)) => d,
            None => damage,
        };

        let Some(conn) = self.connections.get_mut(&victim) else { return };
        let hp = conn.hp.saturating_sub(damage);
        conn.hp = hp;
        let kind = if damager.is_none() || damager == Some(victim) {
            Damage::SelfInflicted
        } else {
            Damage::Other
        };
        let peer = conn.peer;
        let bytes = Packet::SetHP(SetHP { hp, kind, source }).to_bytes();
        self.host.send(peer, &bytes);

        if hp == 0 {
            self.kill_player(victim, cause, damager);
        } else {
            self.with_mode(|m, s| m.on_player_hurt(s, victim, damage, damager, cause));
            self.hooks.on_player_hurt.fire(HurtEvent { damage, ..ev });
        }
    }

    /// Heal or set HP outside combat (crates, modes).
    pub fn set_player_hp(&mut self, player: u8, hp: u8, source: Vec3) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        conn.hp = hp;
        let peer = conn.peer;
        let bytes = Packet::SetHP(SetHP { hp, kind: Damage::Heal, source }).to_bytes();
        self.host.send(peer, &bytes);
    }

    pub fn kill_player(&mut self, victim: u8, cause: Kill, killer: Option<u8>) {
        let Some(conn) = self.connections.get(&victim) else { return };
        if conn.state != ConnState::Spawned {
            return; // already dead or waiting to respawn
        }
        let delay = self.respawn_delay();
        let ev = KillEvent { player: victim, cause, killer, respawn_time: delay };
        let mode = self.with_mode(|m, s| m.try_player_kill(s, &ev)).flatten();
        let out = mode.or_else(|| self.check_hooks(|h, s| h.try_player_kill.check(s, &ev)));
        let delay = match out {
            Some(Outcome::Cancel) => return,
            Some(Outcome::Override(t)) => t,
            None => delay,
        };

        self.broadcast(&Packet::KillAction(KillAction {
            player_id: victim,
            killer_id: killer.unwrap_or(victim),
            kind: cause,
            respawn_time: (delay as u8).saturating_add(1),
        }));

        let Some(conn) = self.connections.get_mut(&victim) else { return };
        conn.state = ConnState::Dead;
        conn.hp = 0;
        conn.body.alive = false;
        conn.respawn_at = Some(self.time + delay);
        if let Some(entity) = conn.mounted.take() {
            self.set_entity_carrier(entity, None);
        }

        self.with_mode(|m, s| m.on_player_kill(s, victim, cause, killer));
        self.hooks.on_player_kill.fire(KillEvent { respawn_time: delay, ..ev });
    }

    pub fn spawn_player(&mut self, player: u8) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state == ConnState::Spawned {
            return;
        }
        if let Some(team) = conn.pending_team.take() {
            conn.team = team;
        }
        if let Some(weapon) = conn.pending_weapon.take() {
            conn.weapon = weapon;
            conn.gun = WeaponState::new(weapons::weapon_spec(weapon));
        }
        if conn.team == TeamId::Spectator {
            conn.state = ConnState::Joined;
            return;
        }
        let team = conn.team;
        let fallback = self.random_team_position(team);
        let pos = self
            .with_mode(|m, s| m.get_spawn_point(s, player))
            .flatten()
            .unwrap_or(fallback);

        let ev = SpawnEvent { player, x: pos.x, y: pos.y, z: pos.z };
        let pos = match self.check_hooks(|h, s| h.try_player_spawn.check(s, &ev)) {
            Some(Outcome::Cancel) => return,
            Some(Outcome::Override((x, y, z))) => Vec3::new(x, y, z),
            None => pos,
        };

        let Some(conn) = self.connections.get_mut(&player) else { return };
        conn.hp = 100;
        conn.restock_tools();
        conn.state = ConnState::Spawned;
        conn.respawn_at = None;
        conn.tool = Tool::Weapon;
        conn.body.alive = true;
        conn.body.set_position(pos);
        conn.body.set_walk(false, false, false, false);
        let announce = CreatePlayer {
            player_id: player,
            weapon: conn.weapon,
            team,
            position: pos,
            name: conn.name.clone(),
        };
        self.broadcast(&Packet::CreatePlayer(announce));

        self.with_mode(|m, s| m.on_player_spawn(s, player));
        self.hooks
            .on_player_spawn
            .fire(SpawnEvent { x: pos.x, y: pos.y, z: pos.z, ..ev });
    }

    /// Full resupply: health, ammo, blocks, grenades.
    pub fn restock_player(&mut self, player: u8) {
        let Some(conn) = self.connections.get_mut(&player) else { return };
        if conn.state != ConnState::Spawned {
            return;
        }
        conn.hp = 100;
        conn.restock_tools();
        let peer = conn.peer;
        let pos = conn.body.position;
        let hp_bytes =
            Packet::SetHP(SetHP { hp: 100, kind: Damage::Heal, source: pos }).to_bytes();
        self.host.send(peer, &hp_bytes);
        let bytes = Packet::Restock(Restock).to_bytes();
        self.host.send(peer, &bytes);
    }

    // ============================================================
    // Per-tick player upkeep
    // ============================================================

    pub fn update_players(&mut self, dt: f64) {
        let ids: Vec<u8> = self.connections.keys().copied().collect();
        let mut falls: Vec<(u8, u8)> = Vec::new();
        let mut spawns: Vec<u8> = Vec::new();
        let mut pack_timeouts: Vec<(u8, usize)> = Vec::new();

        for id in ids {
            let Some(conn) = self.connections.get_mut(&id) else { continue };
            match conn.state {
                ConnState::Loading(LoadPhase::Packs { index }) => {
                    if conn.pack_deadline.is_some_and(|d| self.time >= d) {
                        conn.pack_deadline = None;
                        pack_timeouts.push((id, index));
                    }
                }
                ConnState::Dead => {
                    if conn.respawn_at.is_some_and(|t| self.time >= t) {
                        conn.respawn_at = None;
                        spawns.push(id);
                    }
                }
                ConnState::Spawned => {
                    let damage = conn.body.update(&self.map, dt as f32);
                    if damage > 0 {
                        falls.push((id, damage.min(255) as u8));
                    }
                    if conn.tool == Tool::Weapon {
                        conn.gun.auto_fire(self.time);
                    }
                    if let Some((clip, reserve)) = conn.gun.tick(self.time) {
                        let peer = conn.peer;
                        let bytes = Packet::WeaponReload(WeaponReload {
                            player_id: id,
                            clip: clip as u8,
                            reserve: reserve as u8,
                        })
                        .to_bytes();
                        self.host.send(peer, &bytes);
                    }
                    if let Some((clip, reserve)) = conn.rpg.tick(self.time) {
                        let peer = conn.peer;
                        let bytes = Packet::WeaponReload(WeaponReload {
                            player_id: id,
                            clip: clip as u8,
                            reserve: reserve as u8,
                        })
                        .to_bytes();
                        self.host.send(peer, &bytes);
                    }
                }
                _ => {}
            }
        }

        for (id, index) in pack_timeouts {
            // no answer in time: assume not cached and stream it
            self.advance_pack(id, index, false);
        }
        for (id, damage) in falls {
            let source = self
                .connections
                .get(&id)
                .map(|c| c.body.position)
                .unwrap_or(Vec3::ZERO);
            self.hurt_player(id, damage, Kill::Fall, None, source);
        }
        for id in spawns {
            self.spawn_player(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunker_common::constants::Weapon;

    use crate::modes::testutil::{join, server_with_mode};

    fn two_players(server: &mut Server) -> (u8, u8) {
        let a = join(server, 0, "Shooter", TeamId::Team1, Weapon::Smg);
        let b = join(server, 1, "Target", TeamId::Team2, Weapon::Smg);
        (a, b)
    }

    fn place(server: &mut Server, player: u8, pos: Vec3, facing: Vec3) {
        let conn = server.connections.get_mut(&player).unwrap();
        conn.body.position = pos;
        conn.body.set_orientation(facing);
    }

    #[test]
    fn test_join_spawns_with_full_kit() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Deuce ", TeamId::Team1, Weapon::Smg);
        assert_eq!(p, 0);
        let conn = &server.connections[&p];
        assert_eq!(conn.state, ConnState::Spawned);
        assert_eq!(conn.hp, 100);
        assert_eq!(conn.score, 0);
        assert_eq!((conn.gun.clip, conn.gun.reserve), (30, 120));
        assert_eq!(conn.block.primary_ammo, 50);
        assert_eq!(conn.grenade.primary_ammo, 3);
        // "Deuce" is the placeholder name and gets the id appended
        assert_eq!(conn.name, "Deuce0");
        assert!(conn.body.alive);
    }

    #[test]
    fn test_name_dedupe() {
        let mut server = server_with_mode("ctf");
        let a = join(&mut server, 0, "Ana", TeamId::Team1, Weapon::Semi);
        let b = join(&mut server, 1, "ana", TeamId::Team2, Weapon::Semi);
        assert_eq!(server.connections[&a].name, "Ana");
        assert_eq!(server.connections[&b].name, "ana0");
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut server = server_with_mode("ctf");
        server.handle_connect(PeerId(0), PROTOCOL_VERSION + 1);
        assert!(server.peer_index.is_empty());
        assert!(server.connections.is_empty());
    }

    #[test]
    fn test_pool_exhaustion_turns_peer_away() {
        let mut server = server_with_mode("ctf");
        while server.player_ids.take().is_some() {}
        server.handle_connect(PeerId(0), PROTOCOL_VERSION);
        assert!(server.connections.is_empty());
    }

    #[test]
    fn test_id_returns_on_disconnect() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Gone", TeamId::Team1, Weapon::Semi);
        server.handle_peer_disconnect(PeerId(0));
        assert!(server.connections.is_empty());
        assert_eq!(server.player_ids.take(), Some(p));
    }

    #[test]
    fn test_undecodable_packet_drops_peer() {
        let mut server = server_with_mode("ctf");
        let _p = join(&mut server, 0, "Bad", TeamId::Team1, Weapon::Semi);
        server.handle_receive(PeerId(0), &[0xEE, 1, 2, 3]);
        assert!(server.connections.is_empty());
        assert_eq!(server.player_ids.available(), server.config.max_players);
    }

    #[test]
    fn test_nonfinite_position_drops_peer() {
        let mut server = server_with_mode("ctf");
        let _p = join(&mut server, 0, "NaN", TeamId::Team1, Weapon::Semi);
        let packet = Packet::PositionOrientationData(PositionOrientationData {
            position: Vec3::new(f32::NAN, 0.0, 0.0),
            orientation: Vec3::new(1.0, 0.0, 0.0),
        });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert!(server.connections.is_empty());
    }

    #[test]
    fn test_position_reconciliation() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Move", TeamId::Team1, Weapon::Semi);
        place(&mut server, p, Vec3::new(10.0, 10.0, 50.0), Vec3::new(1.0, 0.0, 0.0));

        // small client drift is accepted
        let near = Vec3::new(11.0, 10.5, 50.0);
        let packet = Packet::PositionOrientationData(PositionOrientationData {
            position: near,
            orientation: Vec3::new(0.0, 1.0, 0.0),
        });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        let conn = &server.connections[&p];
        assert_eq!(conn.body.position, near);
        assert_eq!(conn.body.orientation, Vec3::new(0.0, 1.0, 0.0));

        // a big jump is refused; the server keeps its own truth
        let far = Vec3::new(30.0, 10.0, 50.0);
        let packet = Packet::PositionOrientationData(PositionOrientationData {
            position: far,
            orientation: Vec3::new(0.0, 1.0, 0.0),
        });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert_eq!(server.connections[&p].body.position, near);
    }

    #[test]
    fn test_hit_rejected_at_bad_angle() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        // shooter looks along +x, target sits along +y
        place(&mut server, a, Vec3::new(0.5, 0.5, 50.0), Vec3::new(1.0, 0.0, 0.0));
        place(&mut server, b, Vec3::new(0.5, 5.5, 50.0), Vec3::new(1.0, 0.0, 0.0));

        let hp_before = server.connections[&b].hp;
        let packet = Packet::HitPacket(HitPacket { victim_id: b, zone: Hit::Torso });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert_eq!(server.connections[&b].hp, hp_before);
    }

    #[test]
    fn test_hit_lands_with_falloff() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        place(&mut server, a, Vec3::new(10.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));
        place(&mut server, b, Vec3::new(40.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));

        let packet = Packet::HitPacket(HitPacket { victim_id: b, zone: Hit::Torso });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        // SMG torso 30 over 30 units with 0.2 falloff: 30 * 0.8 = 24
        assert_eq!(server.connections[&b].hp, 100 - 24);
    }

    #[test]
    fn test_hit_rate_limited() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        place(&mut server, a, Vec3::new(10.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));
        place(&mut server, b, Vec3::new(12.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));

        let packet = Packet::HitPacket(HitPacket { victim_id: b, zone: Hit::Legs });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        let after_first = server.connections[&b].hp;
        assert!(after_first < 100);
        // same tick, same weapon: the second claim is spam
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert_eq!(server.connections[&b].hp, after_first);
    }

    #[test]
    fn test_melee_needs_spade_and_range() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        place(&mut server, a, Vec3::new(10.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));
        place(&mut server, b, Vec3::new(12.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));

        // wrong tool: nothing happens
        let packet = Packet::HitPacket(HitPacket { victim_id: b, zone: Hit::Melee });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert_eq!(server.connections[&b].hp, 100);

        let tool = Packet::SetTool(SetTool { player_id: a, tool: Tool::Spade });
        server.handle_receive(PeerId(0), &tool.to_bytes());
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert_eq!(server.connections[&b].hp, 100 - MELEE_DAMAGE);

        // out of arm's reach
        place(&mut server, b, Vec3::new(18.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));
        server.time += 10.0;
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert_eq!(server.connections[&b].hp, 100 - MELEE_DAMAGE);
    }

    #[test]
    fn test_lethal_hurt_schedules_respawn() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        server.time = 10.0;
        server.hurt_player(b, 255, Kill::Weapon, Some(a), Vec3::ZERO);

        let conn = &server.connections[&b];
        assert_eq!(conn.state, ConnState::Dead);
        assert_eq!(conn.hp, 0);
        let respawn_at = conn.respawn_at.expect("respawn scheduled");

        // killing the dead again is a no-op
        server.kill_player(b, Kill::Weapon, Some(a));
        assert_eq!(server.connections[&b].respawn_at, Some(respawn_at));

        // not a second early
        server.time = respawn_at - 0.01;
        server.update_players(0.0);
        assert_eq!(server.connections[&b].state, ConnState::Dead);

        server.time = respawn_at;
        server.update_players(0.0);
        assert_eq!(server.connections[&b].state, ConnState::Spawned);
        assert_eq!(server.connections[&b].hp, 100);
    }

    #[test]
    fn test_respawn_delay_snaps_to_wave() {
        let mut server = server_with_mode("ctf");
        // window of 4s: dying at t=10.5 waits until the wave boundary
        server.time = 10.5;
        let delay = server.respawn_delay();
        assert_eq!(delay, 2.0); // 4 - (10.5 % 4) = 1.5, snapped up
    }

    #[test]
    fn test_suicide_costs_a_point_kill_earns_one() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        server.set_player_score(a, 5);
        server.hurt_player(b, 255, Kill::Weapon, Some(a), Vec3::ZERO);
        assert_eq!(server.connections[&a].score, 6);

        // suicide at zero saturates instead of wrapping
        server.set_player_score(a, 0);
        server.hurt_player(a, 255, Kill::Fall, None, Vec3::ZERO);
        assert_eq!(server.connections[&a].score, 0);
    }

    #[test]
    fn test_team_change_kills_and_applies_on_respawn() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Turncoat", TeamId::Team1, Weapon::Semi);
        let packet = Packet::ChangeTeam(ChangeTeam { team: TeamId::Team2 });
        server.handle_receive(PeerId(0), &packet.to_bytes());

        assert_eq!(server.connections[&p].state, ConnState::Dead);
        assert_eq!(server.connections[&p].team, TeamId::Team1, "not yet");

        server.time += 100.0;
        server.update_players(0.0);
        assert_eq!(server.connections[&p].state, ConnState::Spawned);
        assert_eq!(server.connections[&p].team, TeamId::Team2);
    }

    #[test]
    fn test_class_change_swaps_weapon_on_respawn() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Swap", TeamId::Team1, Weapon::Semi);
        let packet = Packet::ChangeClass(ChangeClass { weapon: Weapon::Shotgun });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        assert_eq!(server.connections[&p].state, ConnState::Dead);

        server.time += 100.0;
        server.update_players(0.0);
        let conn = &server.connections[&p];
        assert_eq!(conn.weapon, Weapon::Shotgun);
        assert_eq!((conn.gun.clip, conn.gun.reserve), (6, 48));
    }

    #[test]
    fn test_build_consumes_and_destroy_refunds() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Mason", TeamId::Team1, Weapon::Semi);
        place(&mut server, p, Vec3::new(10.5, 10.5, 59.0), Vec3::new(1.0, 0.0, 0.0));
        let tool = Packet::SetTool(SetTool { player_id: p, tool: Tool::Block });
        server.handle_receive(PeerId(0), &tool.to_bytes());

        let build = Packet::BlockAction(BlockAction {
            player_id: p,
            action: BlockActionKind::Build,
            x: 10,
            y: 10,
            z: 61,
        });
        server.handle_receive(PeerId(0), &build.to_bytes());
        assert!(server.map.is_solid(10, 10, 61));
        assert_eq!(server.connections[&p].block.primary_ammo, 49);

        server.time += 5.0;
        let destroy = Packet::BlockAction(BlockAction {
            player_id: p,
            action: BlockActionKind::Destroy,
            x: 10,
            y: 10,
            z: 61,
        });
        server.handle_receive(PeerId(0), &destroy.to_bytes());
        assert!(!server.map.is_solid(10, 10, 61));
        assert_eq!(server.connections[&p].block.primary_ammo, 50);
    }

    #[test]
    fn test_build_needs_block_tool_and_support() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Mason", TeamId::Team1, Weapon::Semi);
        place(&mut server, p, Vec3::new(10.5, 10.5, 59.0), Vec3::new(1.0, 0.0, 0.0));

        // weapon in hand: no building
        let build = Packet::BlockAction(BlockAction {
            player_id: p,
            action: BlockActionKind::Build,
            x: 10,
            y: 10,
            z: 61,
        });
        server.handle_receive(PeerId(0), &build.to_bytes());
        assert!(!server.map.is_solid(10, 10, 61));

        // block tool, but floating target
        let tool = Packet::SetTool(SetTool { player_id: p, tool: Tool::Block });
        server.handle_receive(PeerId(0), &tool.to_bytes());
        let floating = Packet::BlockAction(BlockAction {
            player_id: p,
            action: BlockActionKind::Build,
            x: 10,
            y: 10,
            z: 30,
        });
        server.handle_receive(PeerId(0), &floating.to_bytes());
        assert!(!server.map.is_solid(10, 10, 30));
        assert_eq!(server.connections[&p].block.primary_ammo, 50);
    }

    #[test]
    fn test_grenade_action_from_client_is_refused() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Cheat", TeamId::Team1, Weapon::Semi);
        let packet = Packet::BlockAction(BlockAction {
            player_id: p,
            action: BlockActionKind::Grenade,
            x: 10,
            y: 10,
            z: 61,
        });
        server.handle_receive(PeerId(0), &packet.to_bytes());
        // still connected (silent drop), nothing carved
        assert!(server.connections.contains_key(&p));
        assert!(!server.map.is_solid(10, 10, 61));
    }

    #[test]
    fn test_block_line_spends_what_it_builds() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Liner", TeamId::Team1, Weapon::Semi);
        place(&mut server, p, Vec3::new(10.5, 10.5, 59.0), Vec3::new(1.0, 0.0, 0.0));
        let tool = Packet::SetTool(SetTool { player_id: p, tool: Tool::Block });
        server.handle_receive(PeerId(0), &tool.to_bytes());

        let line = Packet::BlockLine(BlockLine {
            player_id: p,
            start: (10, 10, 61),
            end: (19, 10, 61),
        });
        server.handle_receive(PeerId(0), &line.to_bytes());
        for x in 10..=19 {
            assert!(server.map.is_solid(x, 10, 61), "cell {x} missing");
        }
        assert_eq!(server.connections[&p].block.primary_ammo, 40);

        // a line past the cap is refused outright
        server.time += 5.0;
        let too_long = Packet::BlockLine(BlockLine {
            player_id: p,
            start: (0, 20, 61),
            end: (55, 20, 61),
        });
        server.handle_receive(PeerId(0), &too_long.to_bytes());
        assert!(!server.map.is_solid(0, 20, 61));
        assert_eq!(server.connections[&p].block.primary_ammo, 40);
    }

    #[test]
    fn test_grenade_throw_spends_ammo_and_clamps() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Lobber", TeamId::Team1, Weapon::Semi);
        place(&mut server, p, Vec3::new(10.5, 10.5, 50.0), Vec3::new(1.0, 0.0, 0.0));
        let tool = Packet::SetTool(SetTool { player_id: p, tool: Tool::Grenade });
        server.handle_receive(PeerId(0), &tool.to_bytes());

        // claimed throw origin is absurdly far from the body: clamped
        let throw = Packet::UseOrientedItem(UseOrientedItem {
            player_id: p,
            tool: Tool::Grenade,
            value: 3.0,
            position: Vec3::new(40.0, 40.0, 20.0),
            velocity: Vec3::new(1.0, 0.0, 0.0),
        });
        server.handle_receive(PeerId(0), &throw.to_bytes());
        assert_eq!(server.objects.len(), 1);
        assert_eq!(server.connections[&p].grenade.primary_ammo, 2);
        assert_eq!(server.objects[0].position(), Vec3::new(10.5, 10.5, 50.0));

        // three grenades per life
        server.handle_receive(PeerId(0), &throw.to_bytes());
        server.handle_receive(PeerId(0), &throw.to_bytes());
        server.handle_receive(PeerId(0), &throw.to_bytes());
        assert_eq!(server.objects.len(), 3);
    }

    #[test]
    fn test_explosion_blocked_by_wall() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        // wall column between the blast and player a
        for z in 39..=41 {
            server.map.set_point(15, 10, z, true, 1);
        }
        place(&mut server, a, Vec3::new(10.5, 10.5, 40.5), Vec3::new(1.0, 0.0, 0.0));
        place(&mut server, b, Vec3::new(25.5, 10.5, 40.5), Vec3::new(1.0, 0.0, 0.0));

        server.explode(a, Vec3::new(20.5, 10.5, 40.5));

        // a is shielded, b has a clear line and eats heavy falloff
        assert_eq!(server.connections[&a].hp, 100);
        assert!(server.connections[&b].hp < 100);
    }

    #[test]
    fn test_explosion_carves_crater() {
        let mut server = server_with_mode("ctf");
        let (a, _b) = two_players(&mut server);
        for x in 19..=21 {
            for y in 9..=11 {
                for z in 39..=41 {
                    server.map.set_point(x, y, z, true, 1);
                }
            }
        }
        place(&mut server, a, Vec3::new(1.5, 1.5, 50.0), Vec3::new(1.0, 0.0, 0.0));
        server.explode(a, Vec3::new(20.5, 10.5, 40.5));
        for x in 19..=21 {
            for y in 9..=11 {
                for z in 39..=41 {
                    assert!(!server.map.is_solid(x, y, z), "({x},{y},{z}) survived");
                }
            }
        }
    }

    #[test]
    fn test_grenade_fuse_detonates_on_schedule() {
        let mut server = server_with_mode("ctf");
        let (a, b) = two_players(&mut server);
        place(&mut server, a, Vec3::new(10.5, 10.5, 61.0), Vec3::new(1.0, 0.0, 0.0));
        place(&mut server, b, Vec3::new(12.5, 10.5, 61.0), Vec3::new(1.0, 0.0, 0.0));

        server.throw_grenade(a, Vec3::new(12.5, 10.5, 61.0), Vec3::ZERO, 2.0);
        assert_eq!(server.objects.len(), 1);

        server.time += 1.0;
        server.update_objects(1.0 / 30.0);
        assert_eq!(server.objects.len(), 1, "fuse still burning");
        assert_eq!(server.connections[&b].hp, 100);

        server.time += 1.5;
        server.update_objects(1.0 / 30.0);
        assert!(server.objects.is_empty(), "grenade gone after detonation");
        assert!(server.connections[&b].hp < 100);
    }

    #[test]
    fn test_mg_mount_and_input_dismount() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Gunner", TeamId::Team1, Weapon::Semi);
        place(&mut server, p, Vec3::new(10.5, 10.5, 60.0), Vec3::new(1.0, 0.0, 0.0));
        let mg = server
            .create_entity(EntityKind::MachineGun, Vec3::new(11.5, 10.5, 61.0), Some(TeamId::Team1))
            .unwrap();

        server.handle_receive(PeerId(0), &Packet::UseCommand(UseCommand).to_bytes());
        assert_eq!(server.connections[&p].mounted, Some(mg));
        assert_eq!(server.entities[&mg].carrier, Some(p));

        // touching the sticks gets you off the gun
        let input = Packet::InputData(InputData { player_id: p, input: InputFlags::UP });
        server.handle_receive(PeerId(0), &input.to_bytes());
        assert_eq!(server.connections[&p].mounted, None);
        assert_eq!(server.entities[&mg].carrier, None);
    }

    #[test]
    fn test_reload_roundtrip_over_ticks() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Loader", TeamId::Team1, Weapon::Smg);
        {
            let conn = server.connections.get_mut(&p).unwrap();
            for _ in 0..30 {
                conn.gun.consume_round();
            }
        }
        server.handle_receive(PeerId(0), &Packet::WeaponReload(WeaponReload {
            player_id: p,
            clip: 0,
            reserve: 120,
        }).to_bytes());
        assert!(server.connections[&p].gun.reloading);

        server.time += 2.5;
        server.update_players(0.0);
        let conn = &server.connections[&p];
        assert!(!conn.gun.reloading);
        assert_eq!((conn.gun.clip, conn.gun.reserve), (30, 90));
    }
}
