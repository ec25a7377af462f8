// entity.rs — server-owned world objects: flags, command posts, crates,
// machine guns
//
// Entities reference players by id, never by pointer; the carrier is
// resolved against the player table on use. All mutators are no-ops on
// a destroyed entity and skip packets when nothing changes.

use bunker_common::constants::{EntityKind, TeamId};
use bunker_common::math3d::Vec3;
use bunker_common::packets::{
    ChangeEntity, CreateEntity, DestroyEntity, EntityChangePayload, EntityData, Packet,
};

use crate::hooks::CollideEvent;
use crate::server::Server;

/// Players this close to an uncarried entity trigger its collision hook.
pub const ENTITY_TOUCH_DISTANCE: f32 = 3.0;

/// Machine-gun fire characteristics while mounted.
pub const MG_SHOOT_RATE: f64 = 0.2;
pub const MG_DAMAGE: u8 = 10;
/// Hit tests from a mounted gun originate this far above its base.
pub const MG_EYE_HEIGHT: f32 = 1.5;

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u8,
    pub kind: EntityKind,
    pub position: Vec3,
    pub yaw: f32,
    pub team: Option<TeamId>,
    pub carrier: Option<u8>,
    pub destroyed: bool,
    /// Mounted-gun rate limiting; unused for other kinds.
    pub last_fire: f64,
}

impl Entity {
    pub fn new(id: u8, kind: EntityKind, position: Vec3, team: Option<TeamId>) -> Self {
        Self { id, kind, position, yaw: 0.0, team, carrier: None, destroyed: false, last_fire: 0.0 }
    }

    pub fn mountable(&self) -> bool {
        self.kind == EntityKind::MachineGun
    }

    pub fn to_data(&self) -> EntityData {
        EntityData {
            id: self.id,
            kind: self.kind,
            position: self.position,
            yaw: self.yaw,
            state: self.team.unwrap_or(TeamId::Neutral),
            carrier: self.carrier.map(|c| c as i8).unwrap_or(-1),
        }
    }
}

impl Server {
    pub fn create_entity(
        &mut self,
        kind: EntityKind,
        position: Vec3,
        team: Option<TeamId>,
    ) -> Option<u8> {
        let id = self.entity_ids.take()?;
        let ent = Entity::new(id, kind, position, team);
        self.broadcast(&Packet::CreateEntity(CreateEntity { entity: ent.to_data() }));
        self.entities.insert(id, ent);
        Some(id)
    }

    /// Destroying twice is a no-op.
    pub fn destroy_entity(&mut self, id: u8) {
        let Some(ent) = self.entities.get_mut(&id) else { return };
        if ent.destroyed {
            return;
        }
        ent.destroyed = true;
        // unbind any mounted player
        if let Some(carrier) = ent.carrier {
            if let Some(conn) = self.connections.get_mut(&carrier) {
                if conn.mounted == Some(id) {
                    conn.mounted = None;
                }
            }
        }
        self.broadcast(&Packet::DestroyEntity(DestroyEntity { entity_id: id }));
        self.entities.remove(&id);
        self.entity_ids.put(id);
    }

    pub fn set_entity_team(&mut self, id: u8, team: Option<TeamId>) {
        let Some(ent) = self.entities.get_mut(&id) else { return };
        if ent.destroyed || ent.team == team {
            return;
        }
        ent.team = team;
        let state = team.unwrap_or(TeamId::Neutral);
        self.broadcast(&Packet::ChangeEntity(ChangeEntity {
            entity_id: id,
            change: EntityChangePayload::State(state),
        }));
    }

    pub fn set_entity_position(&mut self, id: u8, position: Vec3) {
        let Some(ent) = self.entities.get_mut(&id) else { return };
        if ent.destroyed {
            return;
        }
        ent.position = position;
        self.broadcast(&Packet::ChangeEntity(ChangeEntity {
            entity_id: id,
            change: EntityChangePayload::Position(position),
        }));
    }

    /// `set_carrier(same)` emits nothing.
    pub fn set_entity_carrier(&mut self, id: u8, carrier: Option<u8>) {
        let Some(ent) = self.entities.get_mut(&id) else { return };
        if ent.destroyed || ent.carrier == carrier {
            return;
        }
        ent.carrier = carrier;
        let wire = carrier.map(|c| c as i8).unwrap_or(-1);
        self.broadcast(&Packet::ChangeEntity(ChangeEntity {
            entity_id: id,
            change: EntityChangePayload::Carrier(wire),
        }));
    }

    /// Gravity-settle plus player collision for every live entity.
    pub fn update_entities(&mut self, _dt: f64) {
        let ids: Vec<u8> = self.entities.keys().copied().collect();
        let mut touches: Vec<CollideEvent> = Vec::new();

        for id in ids {
            let Some(ent) = self.entities.get(&id) else { continue };
            if ent.destroyed {
                continue;
            }

            // settle onto the ground under (or newly above) the entity
            let (x, y, z) = (ent.position.x, ent.position.y, ent.position.z);
            let ground = self.map.get_z(x as i32, y as i32, z as i32 - 1) as f32;
            if ground != z {
                self.set_entity_position(id, Vec3::new(x, y, ground));
            }

            let Some(ent) = self.entities.get(&id) else { continue };
            if ent.carrier.is_some() {
                continue;
            }
            let pos = ent.position;
            for (pid, conn) in &self.connections {
                if !conn.is_alive() {
                    continue;
                }
                if conn.body.position.sq_distance(pos)
                    <= ENTITY_TOUCH_DISTANCE * ENTITY_TOUCH_DISTANCE
                {
                    touches.push(CollideEvent { entity: id, player: *pid });
                }
            }
        }

        for touch in touches {
            // entity or player may be gone by the time we get here
            if !self.entities.contains_key(&touch.entity)
                || !self.connections.contains_key(&touch.player)
            {
                continue;
            }
            self.with_mode(|mode, server| {
                mode.on_entity_collide(server, touch.entity, touch.player)
            });
            self.hooks.on_entity_collide.fire(touch);
        }
    }

    /// The "use" key: mount a nearby machine gun, or get off one.
    pub fn try_mount(&mut self, player: u8) {
        let Some(conn) = self.connections.get(&player) else { return };
        if let Some(mounted) = conn.mounted {
            self.dismount(player, mounted);
            return;
        }
        let pos = conn.body.position;
        let target = self.entities.values().find(|e| {
            e.mountable()
                && !e.destroyed
                && e.carrier.is_none()
                && e.position.sq_distance(pos) <= ENTITY_TOUCH_DISTANCE * ENTITY_TOUCH_DISTANCE
        });
        let Some(id) = target.map(|e| e.id) else { return };
        self.set_entity_carrier(id, Some(player));
        if let Some(conn) = self.connections.get_mut(&player) {
            conn.mounted = Some(id);
        }
    }

    pub fn dismount(&mut self, player: u8, entity: u8) {
        if let Some(conn) = self.connections.get_mut(&player) {
            if conn.mounted == Some(entity) {
                conn.mounted = None;
            }
        }
        if self.entities.get(&entity).is_some_and(|e| e.carrier == Some(player)) {
            self.set_entity_carrier(entity, None);
        }
    }

    /// A mounted gun has its own rate limit and flat damage.
    pub fn mg_fire(&mut self, entity: u8) -> Option<(Vec3, u8)> {
        let now = self.time;
        let ent = self.entities.get_mut(&entity)?;
        if now - ent.last_fire < MG_SHOOT_RATE - bunker_common::constants::RAPID_TOLERANCE {
            return None;
        }
        ent.last_fire = now;
        let eye = Vec3::new(ent.position.x, ent.position.y, ent.position.z - MG_EYE_HEIGHT);
        Some((eye, MG_DAMAGE))
    }

    /// Drop every carrier binding held by `player` before its id goes
    /// back to the pool.
    pub fn clear_carriers_of(&mut self, player: u8) {
        let held: Vec<u8> = self
            .entities
            .values()
            .filter(|e| e.carrier == Some(player))
            .map(|e| e.id)
            .collect();
        for id in held {
            self.set_entity_carrier(id, None);
        }
    }
}
