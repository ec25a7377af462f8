// objects.rs — transient explosives: grenades and rockets
//
// Objects own their physics body and destroy themselves on detonation.
// The blast logic is shared: carve the crater, then deal line-of-sight
// gated falloff damage.

use bunker_common::constants::{
    BlockActionKind, Kill, Tool, EXPLOSION_RADIUS, ROCKET_FALLOFF, ROCKET_SPEED,
};
use bunker_common::math3d::{Mat4, Vec3};
use bunker_common::packets::{BlockAction, Packet, UseOrientedItem};
use bunker_common::world::{cast_ray, GenericMovement, Grenade};

use crate::hooks::ExplodeEvent;
use crate::server::Server;

#[derive(Debug)]
pub enum Explosive {
    Grenade { owner: u8, body: Grenade, explode_time: f64 },
    Rocket { owner: u8, body: GenericMovement, pitch: f32, yaw_mat: Mat4 },
}

impl Explosive {
    pub fn owner(&self) -> u8 {
        match self {
            Explosive::Grenade { owner, .. } | Explosive::Rocket { owner, .. } => *owner,
        }
    }

    pub fn position(&self) -> Vec3 {
        match self {
            Explosive::Grenade { body, .. } => body.position,
            Explosive::Rocket { body, .. } => body.position,
        }
    }
}

/// Pitch/yaw decomposition of the fired orientation, mirroring the
/// client's flight model so both simulate the same arc.
pub fn rocket_from_orientation(owner: u8, position: Vec3, orientation: Vec3) -> Explosive {
    let pitch = orientation.z.clamp(-1.0, 1.0).asin();
    let yaw = orientation.x.atan2(orientation.y);
    let yaw_mat = Mat4::rotation(yaw + std::f32::consts::PI, Vec3::new(0.0, 1.0, 0.0));
    Explosive::Rocket { owner, body: GenericMovement::new(position), pitch, yaw_mat }
}

impl Server {
    pub fn throw_grenade(&mut self, owner: u8, position: Vec3, velocity: Vec3, fuse: f32) {
        let body = Grenade::new(position, velocity);
        let explode_time = self.time + fuse as f64;
        self.objects.push(Explosive::Grenade { owner, body, explode_time });
        self.broadcast_others(
            &Packet::UseOrientedItem(UseOrientedItem {
                player_id: owner,
                tool: Tool::Grenade,
                value: fuse,
                position,
                velocity,
            }),
            owner,
        );
    }

    pub fn fire_rocket(&mut self, owner: u8, position: Vec3, orientation: Vec3) {
        self.objects.push(rocket_from_orientation(owner, position, orientation));
        self.broadcast_others(
            &Packet::UseOrientedItem(UseOrientedItem {
                player_id: owner,
                tool: Tool::Rpg,
                value: 0.0,
                position,
                velocity: orientation,
            }),
            owner,
        );
    }

    pub fn update_objects(&mut self, dt: f64) {
        let now = self.time;
        let mut detonations: Vec<(u8, Vec3)> = Vec::new();
        let mut bounces: Vec<ExplodeEvent> = Vec::new();

        let mut objects = std::mem::take(&mut self.objects);
        objects.retain_mut(|obj| match obj {
            Explosive::Grenade { owner, body, explode_time } => {
                if body.update(&self.map, dt as f32) {
                    bounces.push(ExplodeEvent {
                        player: *owner,
                        x: body.position.x,
                        y: body.position.y,
                        z: body.position.z,
                    });
                }
                if now >= *explode_time {
                    detonations.push((*owner, body.position));
                    false
                } else {
                    true
                }
            }
            Explosive::Rocket { owner, body, pitch, yaw_mat } => {
                let tilt = Mat4::rotation(*pitch, Vec3::new(-1.0, 0.0, 0.0));
                let rotation = tilt * *yaw_mat;
                let row = rotation.row(2);
                let velocity = Vec3::new(-row[0], -row[2], row[1]);
                body.position += velocity * (dt as f32 * ROCKET_SPEED);
                *pitch += ROCKET_FALLOFF.to_radians() * dt as f32;

                if body.update(&self.map, dt as f32) {
                    detonations.push((*owner, body.position));
                    false
                } else {
                    true
                }
            }
        });
        self.objects = objects;

        for b in bounces {
            self.hooks.on_grenade_bounce.fire(b);
        }
        for (owner, position) in detonations {
            self.explode(owner, position);
        }
    }

    /// Shared blast: crater first, then damage anything with a clear
    /// line to the center.
    pub fn explode(&mut self, owner: u8, center: Vec3) {
        let (cx, cy, cz) = center.floored();
        for x in cx - 1..=cx + 1 {
            for y in cy - 1..=cy + 1 {
                for z in cz - 1..=cz + 1 {
                    self.map.destroy_point(x, y, z);
                }
            }
        }
        self.broadcast(&Packet::BlockAction(BlockAction {
            player_id: owner,
            action: BlockActionKind::Grenade,
            x: cx,
            y: cy,
            z: cz,
        }));

        let mut victims: Vec<(u8, u8)> = Vec::new();
        for (pid, conn) in &self.connections {
            if !conn.is_alive() {
                continue;
            }
            let d2 = conn.body.position.sq_distance(center);
            if d2 >= EXPLOSION_RADIUS * EXPLOSION_RADIUS {
                continue;
            }
            if cast_ray(&self.map, conn.body.position, center).is_some() {
                continue; // something solid shields them
            }
            let damage = if d2 == 0.0 { 100.0 } else { (4096.0 / d2).min(100.0) };
            victims.push((*pid, damage as u8));
        }
        for (pid, damage) in victims {
            self.hurt_player(pid, damage, Kill::Grenade, Some(owner), center);
        }

        self.hooks.on_explode.fire(ExplodeEvent { player: owner, x: center.x, y: center.y, z: center.z });
    }
}
