// packets.rs — the wire packet registry
//
// Every message is `[u8 id][payload]`. Each payload type implements
// Loader; the Packet enum is the tagged union the dispatcher works on.
// Ids are stable wire contract, never reorder them.

use bitflags::bitflags;

use crate::bytes::{ByteReader, ByteWriter, CodecError, Rgb};
use crate::constants::*;
use crate::math3d::Vec3;

/// A message body with a stable one-byte type code.
pub trait Loader: Sized {
    const ID: u8;

    fn encode(&self, w: &mut ByteWriter);
    fn decode(r: &mut ByteReader) -> Result<Self, CodecError>;
}

bitflags! {
    /// Walk bits in the low nibble, animation bits in the high nibble.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputFlags: u8 {
        const UP     = 1 << 0;
        const DOWN   = 1 << 1;
        const LEFT   = 1 << 2;
        const RIGHT  = 1 << 3;
        const JUMP   = 1 << 4;
        const CROUCH = 1 << 5;
        const SNEAK  = 1 << 6;
        const SPRINT = 1 << 7;
    }
}

// ============================================================
// Movement and input
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionOrientationData {
    pub position: Vec3,
    pub orientation: Vec3,
}

impl Loader for PositionOrientationData {
    const ID: u8 = 0;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_vec3(self.position);
        w.write_vec3(self.orientation);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { position: r.read_vec3()?, orientation: r.read_vec3()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionData {
    pub position: Vec3,
}

impl Loader for PositionData {
    const ID: u8 = 1;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_vec3(self.position);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { position: r.read_vec3()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldEntry {
    pub player_id: u8,
    pub position: Vec3,
    pub orientation: Vec3,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldUpdate {
    pub entries: Vec<WorldEntry>,
}

impl Loader for WorldUpdate {
    const ID: u8 = 2;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.entries.len() as u8);
        for e in &self.entries {
            w.write_u8(e.player_id);
            w.write_vec3(e.position);
            w.write_vec3(e.orientation);
        }
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        let count = r.read_u8()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(WorldEntry {
                player_id: r.read_u8()?,
                position: r.read_vec3()?,
                orientation: r.read_vec3()?,
            });
        }
        Ok(Self { entries })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputData {
    pub player_id: u8,
    pub input: InputFlags,
}

impl Loader for InputData {
    const ID: u8 = 3;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.input.bits());
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            input: InputFlags::from_bits_retain(r.read_u8()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponInput {
    pub player_id: u8,
    pub primary: bool,
    pub secondary: bool,
}

impl Loader for WeaponInput {
    const ID: u8 = 4;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.primary as u8 | (self.secondary as u8) << 1);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        let player_id = r.read_u8()?;
        let bits = r.read_u8()?;
        Ok(Self { player_id, primary: bits & 1 != 0, secondary: bits & 2 != 0 })
    }
}

// ============================================================
// Combat
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitPacket {
    pub victim_id: u8,
    pub zone: Hit,
}

impl Loader for HitPacket {
    const ID: u8 = 5;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.victim_id);
        w.write_u8(self.zone as u8);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { victim_id: r.read_u8()?, zone: Hit::from_raw(r.read_u8()?)? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetHP {
    pub hp: u8,
    pub kind: Damage,
    pub source: Vec3,
}

impl Loader for SetHP {
    const ID: u8 = 6;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.hp);
        w.write_u8(self.kind as u8);
        w.write_vec3(self.source);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            hp: r.read_u8()?,
            kind: Damage::from_raw(r.read_u8()?)?,
            source: r.read_vec3()?,
        })
    }
}

/// Grenade throws and rocket launches; `value` is the remaining fuse for
/// grenades and unused for rockets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UseOrientedItem {
    pub player_id: u8,
    pub tool: Tool,
    pub value: f32,
    pub position: Vec3,
    pub velocity: Vec3,
}

impl Loader for UseOrientedItem {
    const ID: u8 = 7;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.tool as u8);
        w.write_f32(self.value);
        w.write_vec3(self.position);
        w.write_vec3(self.velocity);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            tool: Tool::from_raw(r.read_u8()?)?,
            value: r.read_f32()?,
            position: r.read_vec3()?,
            velocity: r.read_vec3()?,
        })
    }
}

// ============================================================
// Tools
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetTool {
    pub player_id: u8,
    pub tool: Tool,
}

impl Loader for SetTool {
    const ID: u8 = 8;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.tool as u8);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { player_id: r.read_u8()?, tool: Tool::from_raw(r.read_u8()?)? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetColor {
    pub player_id: u8,
    pub color: Rgb,
}

impl Loader for SetColor {
    const ID: u8 = 9;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_color(self.color);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { player_id: r.read_u8()?, color: r.read_color()? })
    }
}

// ============================================================
// Players
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExistingPlayer {
    pub player_id: u8,
    pub team: TeamId,
    pub weapon: Weapon,
    pub tool: Tool,
    pub score: u8,
    pub color: Rgb,
    pub name: String,
}

impl Loader for ExistingPlayer {
    const ID: u8 = 10;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_i8(self.team as i8);
        w.write_u8(self.weapon as u8);
        w.write_u8(self.tool as u8);
        w.write_u8(self.score);
        w.write_color(self.color);
        w.write_fixed_str(&self.name, NAME_FIELD_WIDTH);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            team: TeamId::from_raw(r.read_i8()?)?,
            weapon: Weapon::from_raw(r.read_u8()?)?,
            tool: Tool::from_raw(r.read_u8()?)?,
            score: r.read_u8()?,
            color: r.read_color()?,
            name: r.read_fixed_str(NAME_FIELD_WIDTH)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlayer {
    pub player_id: u8,
    pub weapon: Weapon,
    pub team: TeamId,
    pub position: Vec3,
    pub name: String,
}

impl Loader for CreatePlayer {
    const ID: u8 = 11;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.weapon as u8);
        w.write_i8(self.team as i8);
        w.write_vec3(self.position);
        w.write_fixed_str(&self.name, NAME_FIELD_WIDTH);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            weapon: Weapon::from_raw(r.read_u8()?)?,
            team: TeamId::from_raw(r.read_i8()?)?,
            position: r.read_vec3()?,
            name: r.read_fixed_str(NAME_FIELD_WIDTH)?,
        })
    }
}

// ============================================================
// Blocks
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockAction {
    pub player_id: u8,
    pub action: BlockActionKind,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Loader for BlockAction {
    const ID: u8 = 12;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.action as u8);
        w.write_i32(self.x);
        w.write_i32(self.y);
        w.write_i32(self.z);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            action: BlockActionKind::from_raw(r.read_u8()?)?,
            x: r.read_i32()?,
            y: r.read_i32()?,
            z: r.read_i32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockLine {
    pub player_id: u8,
    pub start: (i32, i32, i32),
    pub end: (i32, i32, i32),
}

impl Loader for BlockLine {
    const ID: u8 = 13;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_i32(self.start.0);
        w.write_i32(self.start.1);
        w.write_i32(self.start.2);
        w.write_i32(self.end.0);
        w.write_i32(self.end.1);
        w.write_i32(self.end.2);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            start: (r.read_i32()?, r.read_i32()?, r.read_i32()?),
            end: (r.read_i32()?, r.read_i32()?, r.read_i32()?),
        })
    }
}

// ============================================================
// Game state
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TeamData {
    pub name: String,
    pub color: Rgb,
    pub score: u8,
}

impl TeamData {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_str(&self.name);
        w.write_color(self.color);
        w.write_u8(self.score);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { name: r.read_str()?, color: r.read_color()?, score: r.read_u8()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityData {
    pub id: u8,
    pub kind: EntityKind,
    pub position: Vec3,
    pub yaw: f32,
    pub state: TeamId,
    pub carrier: i8,
}

impl EntityData {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.id);
        w.write_u8(self.kind as u8);
        w.write_vec3(self.position);
        w.write_f32(self.yaw);
        w.write_i8(self.state as i8);
        w.write_i8(self.carrier);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            id: r.read_u8()?,
            kind: EntityKind::from_raw(r.read_u8()?)?,
            position: r.read_vec3()?,
            yaw: r.read_f32()?,
            state: TeamId::from_raw(r.read_i8()?)?,
            carrier: r.read_i8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateData {
    pub player_id: u8,
    pub fog_color: Rgb,
    pub team1: TeamData,
    pub team2: TeamData,
    pub mode_name: String,
    pub score_limit: u8,
    pub entities: Vec<EntityData>,
}

impl Loader for StateData {
    const ID: u8 = 14;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_color(self.fog_color);
        self.team1.encode(w);
        self.team2.encode(w);
        w.write_str(&self.mode_name);
        w.write_u8(self.score_limit);
        w.write_u8(self.entities.len() as u8);
        for e in &self.entities {
            e.encode(w);
        }
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        let player_id = r.read_u8()?;
        let fog_color = r.read_color()?;
        let team1 = TeamData::decode(r)?;
        let team2 = TeamData::decode(r)?;
        let mode_name = r.read_str()?;
        let score_limit = r.read_u8()?;
        let count = r.read_u8()?;
        let mut entities = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entities.push(EntityData::decode(r)?);
        }
        Ok(Self { player_id, fog_color, team1, team2, mode_name, score_limit, entities })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KillAction {
    pub player_id: u8,
    pub killer_id: u8,
    pub kind: Kill,
    pub respawn_time: u8,
}

impl Loader for KillAction {
    const ID: u8 = 15;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.killer_id);
        w.write_u8(self.kind as u8);
        w.write_u8(self.respawn_time);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            killer_id: r.read_u8()?,
            kind: Kill::from_raw(r.read_u8()?)?,
            respawn_time: r.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub player_id: u8,
    pub chat_type: Chat,
    pub value: String,
}

impl Loader for ChatMessage {
    const ID: u8 = 16;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.chat_type as u8);
        w.write_str(&self.value);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: r.read_u8()?,
            chat_type: Chat::from_raw(r.read_u8()?)?,
            value: r.read_str()?,
        })
    }
}

// ============================================================
// Loading: map and packs
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapStart {
    pub size: u32,
}

impl Loader for MapStart {
    const ID: u8 = 17;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.size);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { size: r.read_u32()? })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapChunk {
    pub data: Vec<u8>,
}

impl Loader for MapChunk {
    const ID: u8 = 18;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_bytes(&self.data);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { data: r.read_all().to_vec() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackStart {
    pub checksum: u32,
    pub size: u32,
}

impl Loader for PackStart {
    const ID: u8 = 19;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.checksum);
        w.write_u32(self.size);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { checksum: r.read_u32()?, size: r.read_u32()? })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackChunk {
    pub data: Vec<u8>,
}

impl Loader for PackChunk {
    const ID: u8 = 20;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_bytes(&self.data);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { data: r.read_all().to_vec() })
    }
}

/// Client's answer to PackStart: true when it already has the pack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackResponse {
    pub cached: bool,
}

impl Loader for PackResponse {
    const ID: u8 = 21;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.cached as u8);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { cached: r.read_u8()? != 0 })
    }
}

// ============================================================
// Misc server → client
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerLeft {
    pub player_id: u8,
}

impl Loader for PlayerLeft {
    const ID: u8 = 22;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { player_id: r.read_u8()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressBar {
    pub progress: f32,
    pub rate: f32,
    pub color1: Rgb,
    pub color2: Rgb,
    pub stopped: bool,
}

impl Loader for ProgressBar {
    const ID: u8 = 23;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_f32(self.progress);
        w.write_f32(self.rate);
        w.write_color(self.color1);
        w.write_color(self.color2);
        w.write_u8(self.stopped as u8);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            progress: r.read_f32()?,
            rate: r.read_f32()?,
            color1: r.read_color()?,
            color2: r.read_color()?,
            stopped: r.read_u8()? != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Restock;

impl Loader for Restock {
    const ID: u8 = 24;

    fn encode(&self, _w: &mut ByteWriter) {}

    fn decode(_r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FogColor {
    pub color: Rgb,
}

impl Loader for FogColor {
    const ID: u8 = 25;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_color(self.color);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { color: r.read_color()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponReload {
    pub player_id: u8,
    pub clip: u8,
    pub reserve: u8,
}

impl Loader for WeaponReload {
    const ID: u8 = 26;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.player_id);
        w.write_u8(self.clip);
        w.write_u8(self.reserve);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { player_id: r.read_u8()?, clip: r.read_u8()?, reserve: r.read_u8()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeTeam {
    pub team: TeamId,
}

impl Loader for ChangeTeam {
    const ID: u8 = 27;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_i8(self.team as i8);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { team: TeamId::from_raw(r.read_i8()?)? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeClass {
    pub weapon: Weapon,
}

impl Loader for ChangeClass {
    const ID: u8 = 28;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.weapon as u8);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { weapon: Weapon::from_raw(r.read_u8()?)? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetScore {
    pub kind: ScoreKind,
    pub specifier: i8,
    pub value: u8,
}

impl Loader for SetScore {
    const ID: u8 = 29;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.kind as u8);
        w.write_i8(self.specifier);
        w.write_u8(self.value);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            kind: ScoreKind::from_raw(r.read_u8()?)?,
            specifier: r.read_i8()?,
            value: r.read_u8()?,
        })
    }
}

// ============================================================
// Entities
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreateEntity {
    pub entity: EntityData,
}

impl Loader for CreateEntity {
    const ID: u8 = 30;

    fn encode(&self, w: &mut ByteWriter) {
        self.entity.encode(w);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { entity: EntityData::decode(r)? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityChangePayload {
    State(TeamId),
    Position(Vec3),
    Carrier(i8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeEntity {
    pub entity_id: u8,
    pub change: EntityChangePayload,
}

impl Loader for ChangeEntity {
    const ID: u8 = 31;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.entity_id);
        match self.change {
            EntityChangePayload::State(team) => {
                w.write_u8(EntityChange::SetState as u8);
                w.write_i8(team as i8);
            }
            EntityChangePayload::Position(pos) => {
                w.write_u8(EntityChange::SetPosition as u8);
                w.write_vec3(pos);
            }
            EntityChangePayload::Carrier(player) => {
                w.write_u8(EntityChange::SetCarrier as u8);
                w.write_i8(player);
            }
        }
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        let entity_id = r.read_u8()?;
        let change = match EntityChange::from_raw(r.read_u8()?)? {
            EntityChange::SetState => EntityChangePayload::State(TeamId::from_raw(r.read_i8()?)?),
            EntityChange::SetPosition => EntityChangePayload::Position(r.read_vec3()?),
            EntityChange::SetCarrier => EntityChangePayload::Carrier(r.read_i8()?),
        };
        Ok(Self { entity_id, change })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestroyEntity {
    pub entity_id: u8,
}

impl Loader for DestroyEntity {
    const ID: u8 = 32;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.entity_id);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { entity_id: r.read_u8()? })
    }
}

// ============================================================
// Sounds
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PlaySound {
    pub name: String,
    pub looping: bool,
    pub loop_id: u8,
    pub position: Option<Vec3>,
}

impl Loader for PlaySound {
    const ID: u8 = 33;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_str(&self.name);
        let flags = self.looping as u8 | (self.position.is_some() as u8) << 1;
        w.write_u8(flags);
        w.write_u8(self.loop_id);
        if let Some(pos) = self.position {
            w.write_vec3(pos);
        }
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        let name = r.read_str()?;
        let flags = r.read_u8()?;
        let loop_id = r.read_u8()?;
        let position = if flags & 2 != 0 { Some(r.read_vec3()?) } else { None };
        Ok(Self { name, looping: flags & 1 != 0, loop_id, position })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopSound {
    pub loop_id: u8,
}

impl Loader for StopSound {
    const ID: u8 = 34;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.loop_id);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { loop_id: r.read_u8()? })
    }
}

// ============================================================
// Interaction
// ============================================================

/// The "use" key; mounting and mode interactions hang off this.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UseCommand;

impl Loader for UseCommand {
    const ID: u8 = 35;

    fn encode(&self, _w: &mut ByteWriter) {}

    fn decode(_r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceMG {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub yaw: f32,
}

impl Loader for PlaceMG {
    const ID: u8 = 36;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_i32(self.x);
        w.write_i32(self.y);
        w.write_i32(self.z);
        w.write_f32(self.yaw);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { x: r.read_i32()?, y: r.read_i32()?, z: r.read_i32()?, yaw: r.read_f32()? })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialInfo {
    pub mode_name: String,
    pub mode_description: String,
}

impl Loader for InitialInfo {
    const ID: u8 = 37;

    fn encode(&self, w: &mut ByteWriter) {
        w.write_str(&self.mode_name);
        w.write_str(&self.mode_description);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self { mode_name: r.read_str()?, mode_description: r.read_str()? })
    }
}

// ============================================================
// The tagged union
// ============================================================

macro_rules! packet_union {
    ($($variant:ident),+ $(,)?) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum Packet {
            $($variant($variant)),+
        }

        $(
            impl From<$variant> for Packet {
                fn from(p: $variant) -> Packet {
                    Packet::$variant(p)
                }
            }
        )+

        impl Packet {
            pub fn id(&self) -> u8 {
                match self {
                    $(Packet::$variant(_) => $variant::ID),+
                }
            }

            /// `[id][payload]`, ready for the transport.
            pub fn to_bytes(&self) -> Vec<u8> {
                let mut w = ByteWriter::new();
                match self {
                    $(Packet::$variant(p) => {
                        w.write_u8($variant::ID);
                        p.encode(&mut w);
                    })+
                }
                w.into_vec()
            }

            pub fn from_bytes(data: &[u8]) -> Result<Packet, CodecError> {
                let mut r = ByteReader::new(data);
                let id = r.read_u8()?;
                match id {
                    $($variant::ID => Ok(Packet::$variant($variant::decode(&mut r)?)),)+
                    _ => Err(CodecError::UnknownPacket(id)),
                }
            }
        }
    };
}

packet_union!(
    PositionOrientationData,
    PositionData,
    WorldUpdate,
    InputData,
    WeaponInput,
    HitPacket,
    SetHP,
    UseOrientedItem,
    SetTool,
    SetColor,
    ExistingPlayer,
    CreatePlayer,
    BlockAction,
    BlockLine,
    StateData,
    KillAction,
    ChatMessage,
    MapStart,
    MapChunk,
    PackStart,
    PackChunk,
    PackResponse,
    PlayerLeft,
    ProgressBar,
    Restock,
    FogColor,
    WeaponReload,
    ChangeTeam,
    ChangeClass,
    SetScore,
    CreateEntity,
    ChangeEntity,
    DestroyEntity,
    PlaySound,
    StopSound,
    UseCommand,
    PlaceMG,
    InitialInfo,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: Packet) {
        let bytes = p.to_bytes();
        assert_eq!(bytes[0], p.id());
        let back = Packet::from_bytes(&bytes).expect("decode");
        assert_eq!(back, p);
    }

    #[test]
    fn test_roundtrip_every_packet() {
        let v = Vec3::new(1.5, -2.0, 40.25);
        let o = Vec3::new(0.0, 1.0, 0.0);
        let entity = EntityData {
            id: 3,
            kind: EntityKind::Flag,
            position: v,
            yaw: 1.25,
            state: TeamId::Team2,
            carrier: -1,
        };

        roundtrip(PositionOrientationData { position: v, orientation: o }.into());
        roundtrip(PositionData { position: v }.into());
        roundtrip(
            WorldUpdate {
                entries: vec![
                    WorldEntry { player_id: 0, position: v, orientation: o },
                    WorldEntry { player_id: 7, position: o, orientation: v },
                ],
            }
            .into(),
        );
        roundtrip(
            InputData { player_id: 2, input: InputFlags::UP | InputFlags::SPRINT }.into(),
        );
        roundtrip(WeaponInput { player_id: 1, primary: true, secondary: false }.into());
        roundtrip(HitPacket { victim_id: 9, zone: Hit::Head }.into());
        roundtrip(SetHP { hp: 64, kind: Damage::Other, source: v }.into());
        roundtrip(
            UseOrientedItem {
                player_id: 4,
                tool: Tool::Grenade,
                value: 2.5,
                position: v,
                velocity: o,
            }
            .into(),
        );
        roundtrip(SetTool { player_id: 5, tool: Tool::Block }.into());
        roundtrip(SetColor { player_id: 5, color: Rgb::new(1, 2, 3) }.into());
        roundtrip(
            ExistingPlayer {
                player_id: 0,
                team: TeamId::Team1,
                weapon: Weapon::Smg,
                tool: Tool::Weapon,
                score: 12,
                color: Rgb::new(112, 112, 112),
                name: "Deuce".into(),
            }
            .into(),
        );
        roundtrip(
            CreatePlayer {
                player_id: 0,
                weapon: Weapon::Shotgun,
                team: TeamId::Team2,
                position: v,
                name: "Deuce0".into(),
            }
            .into(),
        );
        roundtrip(
            BlockAction { player_id: 1, action: BlockActionKind::Build, x: 1, y: 2, z: 3 }.into(),
        );
        roundtrip(BlockLine { player_id: 1, start: (0, 0, 40), end: (9, 0, 40) }.into());
        roundtrip(
            StateData {
                player_id: 0,
                fog_color: Rgb::new(128, 232, 255),
                team1: TeamData { name: "Blue".into(), color: Rgb::new(44, 117, 179), score: 1 },
                team2: TeamData { name: "Green".into(), color: Rgb::new(137, 179, 44), score: 2 },
                mode_name: "CTF".into(),
                score_limit: 10,
                entities: vec![entity],
            }
            .into(),
        );
        roundtrip(
            KillAction { player_id: 3, killer_id: 4, kind: Kill::Headshot, respawn_time: 5 }
                .into(),
        );
        roundtrip(
            ChatMessage { player_id: 3, chat_type: Chat::Team, value: "on me".into() }.into(),
        );
        roundtrip(MapStart { size: 123456 }.into());
        roundtrip(MapChunk { data: vec![1, 2, 3, 4] }.into());
        roundtrip(PackStart { checksum: 0xdeadbeef, size: 4096 }.into());
        roundtrip(PackChunk { data: vec![9; 64] }.into());
        roundtrip(PackResponse { cached: true }.into());
        roundtrip(PlayerLeft { player_id: 31 }.into());
        roundtrip(
            ProgressBar {
                progress: 0.5,
                rate: -0.05,
                color1: Rgb::new(1, 1, 1),
                color2: Rgb::new(2, 2, 2),
                stopped: false,
            }
            .into(),
        );
        roundtrip(Restock.into());
        roundtrip(FogColor { color: Rgb::new(0, 0, 0) }.into());
        roundtrip(WeaponReload { player_id: 1, clip: 6, reserve: 42 }.into());
        roundtrip(ChangeTeam { team: TeamId::Spectator }.into());
        roundtrip(ChangeClass { weapon: Weapon::Sniper }.into());
        roundtrip(SetScore { kind: ScoreKind::Team, specifier: 1, value: 9 }.into());
        roundtrip(CreateEntity { entity }.into());
        roundtrip(
            ChangeEntity { entity_id: 3, change: EntityChangePayload::State(TeamId::Team1) }
                .into(),
        );
        roundtrip(
            ChangeEntity { entity_id: 3, change: EntityChangePayload::Position(v) }.into(),
        );
        roundtrip(ChangeEntity { entity_id: 3, change: EntityChangePayload::Carrier(7) }.into());
        roundtrip(DestroyEntity { entity_id: 3 }.into());
        roundtrip(
            PlaySound { name: "horn".into(), looping: true, loop_id: 2, position: Some(v) }
                .into(),
        );
        roundtrip(PlaySound { name: "pickup".into(), looping: false, loop_id: 0, position: None }.into());
        roundtrip(StopSound { loop_id: 2 }.into());
        roundtrip(UseCommand.into());
        roundtrip(PlaceMG { x: 10, y: 20, z: 30, yaw: 0.5 }.into());
        roundtrip(
            InitialInfo { mode_name: "CTF".into(), mode_description: "Capture the intel".into() }
                .into(),
        );
    }

    #[test]
    fn test_unknown_id() {
        assert_eq!(Packet::from_bytes(&[200]), Err(CodecError::UnknownPacket(200)));
    }

    #[test]
    fn test_bad_enum_value() {
        // HitPacket with a zone that does not exist
        let err = Packet::from_bytes(&[HitPacket::ID, 0, 9]).unwrap_err();
        assert!(matches!(err, CodecError::BadEnum { .. }));
    }

    #[test]
    fn test_truncated() {
        let full = Packet::from(MapStart { size: 77 }).to_bytes();
        assert_eq!(
            Packet::from_bytes(&full[..3]),
            Err(CodecError::UnexpectedEof)
        );
    }

    #[test]
    fn test_input_nibbles() {
        // walk bits stay in the low nibble, animation in the high
        let walk = InputFlags::UP | InputFlags::DOWN | InputFlags::LEFT | InputFlags::RIGHT;
        assert_eq!(walk.bits(), 0x0F);
        let anim = InputFlags::JUMP | InputFlags::CROUCH | InputFlags::SNEAK | InputFlags::SPRINT;
        assert_eq!(anim.bits(), 0xF0);
    }
}
