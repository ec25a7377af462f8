// world.rs — world-object physics against the voxel map
//
// The integration scheme and constants follow the reference client, so a
// server-side body lands on the same block the player sees. Velocities
// are in the client's scaled units: displacement per step is
// velocity * dt * 32.

use crate::math3d::Vec3;
use crate::vxl::{VxlMap, MAP_Z};

const FALL_SLOW_DOWN: f32 = 0.24;
const FALL_DAMAGE_VELOCITY: f32 = 0.58;
const FALL_DAMAGE_SCALAR: f32 = 4096.0;
const JUMP_VELOCITY: f32 = -0.36;

/// Solidity as movement sees it: past the horizontal edges is a wall,
/// above the sky is open, the water surface (z = 63) clips at 62 so
/// bodies rest on it.
pub fn clipbox(map: &VxlMap, x: f32, y: f32, z: f32) -> bool {
    if x < 0.0 || x >= map.width() as f32 || y < 0.0 || y >= map.length() as f32 {
        return true;
    }
    if z < 0.0 {
        return false;
    }
    let mut sz = z as i32;
    if sz == MAP_Z as i32 - 1 {
        sz = MAP_Z as i32 - 2;
    } else if sz >= MAP_Z as i32 {
        return true;
    }
    map.is_solid(x as i32, y as i32, sz)
}

/// Walk the voxel grid from `from` toward `to`; the first solid cell on
/// the way is returned, `None` if the segment is clear. The cell
/// containing `from` is not tested.
pub fn cast_ray(map: &VxlMap, from: Vec3, to: Vec3) -> Option<(i32, i32, i32)> {
    let dir = to - from;
    let len = dir.length();
    if len < 1e-6 {
        return None;
    }
    let dir = dir * (1.0 / len);

    let (mut cx, mut cy, mut cz) = from.floored();
    let (tx, ty, tz) = to.floored();

    let step = |d: f32| if d > 0.0 { 1 } else { -1 };
    let (sx, sy, sz) = (step(dir.x), step(dir.y), step(dir.z));

    // distance along the ray to the first boundary crossing per axis
    let boundary = |pos: f32, cell: i32, s: i32| {
        if s > 0 {
            (cell + 1) as f32 - pos
        } else {
            pos - cell as f32
        }
    };
    let inv = |d: f32| if d.abs() < 1e-9 { f32::INFINITY } else { 1.0 / d.abs() };
    let (ix, iy, iz) = (inv(dir.x), inv(dir.y), inv(dir.z));
    let mut t_max_x = boundary(from.x, cx, sx) * ix;
    let mut t_max_y = boundary(from.y, cy, sy) * iy;
    let mut t_max_z = boundary(from.z, cz, sz) * iz;

    loop {
        if (cx, cy, cz) == (tx, ty, tz) {
            return None;
        }
        if t_max_x <= t_max_y && t_max_x <= t_max_z {
            if t_max_x > len {
                return None;
            }
            cx += sx;
            t_max_x += ix;
        } else if t_max_y <= t_max_z {
            if t_max_y > len {
                return None;
            }
            cy += sy;
            t_max_y += iy;
        } else {
            if t_max_z > len {
                return None;
            }
            cz += sz;
            t_max_z += iz;
        }
        if map.is_solid(cx, cy, cz) {
            return Some((cx, cy, cz));
        }
    }
}

// ============================================================
// Player body
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct Player {
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Vec3,

    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,

    pub jump: bool,
    pub crouch: bool,
    pub sneak: bool,
    pub sprint: bool,

    pub airborne: bool,
    pub wade: bool,
    pub alive: bool,
}

impl Player {
    pub fn new() -> Self {
        Self { alive: true, orientation: Vec3::new(1.0, 0.0, 0.0), ..Default::default() }
    }

    /// Teleport and zero the motion state.
    pub fn set_position(&mut self, pos: Vec3) {
        self.position = pos;
        self.velocity = Vec3::ZERO;
        self.airborne = false;
        self.wade = false;
    }

    pub fn set_orientation(&mut self, o: Vec3) {
        if o.is_finite() && o.sq_length() > 0.0 {
            self.orientation = o.normalized();
        }
    }

    pub fn set_walk(&mut self, forward: bool, backward: bool, left: bool, right: bool) {
        self.forward = forward;
        self.backward = backward;
        self.left = left;
        self.right = right;
    }

    pub fn set_animation(&mut self, jump: bool, crouch: bool, sneak: bool, sprint: bool) {
        if jump && !self.airborne {
            self.jump = true;
        }
        if crouch != self.crouch {
            // eye moves with the stance change
            if crouch {
                self.position.z += 0.45;
            } else {
                self.position.z -= 0.45;
            }
            self.crouch = crouch;
        }
        self.sneak = sneak;
        self.sprint = sprint;
    }

    /// One integration step. Returns fall damage taken this step (0 for
    /// none; landings below the damage threshold just slow the player).
    pub fn update(&mut self, map: &VxlMap, dt: f32) -> i32 {
        if !self.alive {
            return 0;
        }

        if self.jump && !self.airborne {
            self.velocity.z = JUMP_VELOCITY;
        }
        self.jump = false;

        let mut f = dt;
        if self.airborne {
            f *= 0.1;
        } else if self.crouch {
            f *= 0.3;
        } else if self.sneak {
            f *= 0.5;
        } else if self.sprint {
            f *= 1.3;
        }
        if (self.forward || self.backward) && (self.left || self.right) {
            f *= std::f32::consts::FRAC_1_SQRT_2;
        }

        let fwd = Vec3::new(self.orientation.x, self.orientation.y, 0.0).normalized();
        let strafe = Vec3::new(-fwd.y, fwd.x, 0.0);
        if self.forward {
            self.velocity.x += fwd.x * f;
            self.velocity.y += fwd.y * f;
        } else if self.backward {
            self.velocity.x -= fwd.x * f;
            self.velocity.y -= fwd.y * f;
        }
        if self.left {
            self.velocity.x += strafe.x * f;
            self.velocity.y += strafe.y * f;
        } else if self.right {
            self.velocity.x -= strafe.x * f;
            self.velocity.y -= strafe.y * f;
        }

        // gravity plus air drag on the vertical axis
        let drag = dt + 1.0;
        self.velocity.z += dt;
        self.velocity.z /= drag;

        let friction = if self.wade {
            dt * 6.0 + 1.0
        } else if !self.airborne {
            dt * 4.0 + 1.0
        } else {
            1.0
        };
        self.velocity.x /= friction;
        self.velocity.y /= friction;

        let falling = self.velocity.z;
        self.boxclip(map, dt);

        if self.velocity.z == 0.0 && falling > FALL_SLOW_DOWN {
            // landed hard enough to stagger
            self.velocity.x *= 0.5;
            self.velocity.y *= 0.5;
            if falling > FALL_DAMAGE_VELOCITY {
                let v = falling - FALL_DAMAGE_VELOCITY;
                return (v * v * FALL_DAMAGE_SCALAR) as i32;
            }
        }
        0
    }

    /// Axis-separated clip of the body box against the map, with step-up
    /// climbing when walking into a single block.
    fn boxclip(&mut self, map: &VxlMap, dt: f32) {
        let f = dt * 32.0;
        let nx = f * self.velocity.x + self.position.x;
        let ny = f * self.velocity.y + self.position.y;

        let (offset, m) = if self.crouch { (0.45, 0.9) } else { (0.9, 1.35) };
        let nz = self.position.z + offset;

        let mut climb = false;

        // x axis
        let fx = if self.velocity.x < 0.0 { -0.45 } else { 0.45 };
        let mut z = m;
        while z >= -1.36
            && !clipbox(map, nx + fx, self.position.y - 0.45, nz + z)
            && !clipbox(map, nx + fx, self.position.y + 0.45, nz + z)
        {
            z -= 0.9;
        }
        if z < -1.36 {
            self.position.x = nx;
        } else if !self.crouch && self.orientation.z < 0.5 && !self.sprint {
            z = 0.35;
            while z >= -2.36
                && !clipbox(map, nx + fx, self.position.y - 0.45, nz + z)
                && !clipbox(map, nx + fx, self.position.y + 0.45, nz + z)
            {
                z -= 0.9;
            }
            if z < -2.36 {
                self.position.x = nx;
                climb = true;
            } else {
                self.velocity.x = 0.0;
            }
        } else {
            self.velocity.x = 0.0;
        }

        // y axis
        let fy = if self.velocity.y < 0.0 { -0.45 } else { 0.45 };
        let mut z = m;
        while z >= -1.36
            && !clipbox(map, self.position.x - 0.45, ny + fy, nz + z)
            && !clipbox(map, self.position.x + 0.45, ny + fy, nz + z)
        {
            z -= 0.9;
        }
        if z < -1.36 {
            self.position.y = ny;
        } else if !self.crouch && self.orientation.z < 0.5 && !self.sprint && !climb {
            z = 0.35;
            while z >= -2.36
                && !clipbox(map, self.position.x - 0.45, ny + fy, nz + z)
                && !clipbox(map, self.position.x + 0.45, ny + fy, nz + z)
            {
                z -= 0.9;
            }
            if z < -2.36 {
                self.position.y = ny;
                climb = true;
            } else {
                self.velocity.y = 0.0;
            }
        } else {
            self.velocity.y = 0.0;
        }

        let mut nz = nz;
        let mut m = m;
        if climb {
            self.velocity.x *= 0.5;
            self.velocity.y *= 0.5;
            nz -= 1.0;
            m = -1.35;
        } else {
            if self.velocity.z < 0.0 {
                m = -m;
            }
            nz += self.velocity.z * f;
        }

        self.airborne = true;
        if clipbox(map, self.position.x - 0.45, self.position.y - 0.45, nz + m)
            || clipbox(map, self.position.x - 0.45, self.position.y + 0.45, nz + m)
            || clipbox(map, self.position.x + 0.45, self.position.y - 0.45, nz + m)
            || clipbox(map, self.position.x + 0.45, self.position.y + 0.45, nz + m)
        {
            if self.velocity.z >= 0.0 {
                self.wade = self.position.z > MAP_Z as f32 - 3.0;
                self.airborne = false;
            }
            self.velocity.z = 0.0;
        } else {
            self.position.z = nz - offset;
        }
    }
}

// ============================================================
// Grenade body
// ============================================================

#[derive(Debug, Clone)]
pub struct Grenade {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl Grenade {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }

    /// Ballistic step. Returns true when the grenade bounced this step;
    /// on a bounce the offending velocity component is reflected and the
    /// whole velocity damped.
    pub fn update(&mut self, map: &VxlMap, dt: f32) -> bool {
        self.velocity.z += dt;
        let next = self.position + self.velocity * (dt * 32.0);

        let old_cell = self.position.floored();
        let new_cell = next.floored();
        if new_cell != old_cell && clipbox(map, next.x, next.y, next.z) {
            if new_cell.2 != old_cell.2
                && ((new_cell.0 == old_cell.0 && new_cell.1 == old_cell.1)
                    || clipbox(map, self.position.x, self.position.y, next.z))
            {
                self.velocity.z = -self.velocity.z;
            } else if new_cell.0 != old_cell.0 {
                self.velocity.x = -self.velocity.x;
            } else {
                self.velocity.y = -self.velocity.y;
            }
            self.velocity = self.velocity * 0.36;
            return true;
        }
        self.position = next;
        false
    }
}

// ============================================================
// Generic moving point (rockets)
// ============================================================

#[derive(Debug, Clone)]
pub struct GenericMovement {
    pub position: Vec3,
}

impl GenericMovement {
    pub fn new(position: Vec3) -> Self {
        Self { position }
    }

    /// Terminal collision test at the current position: true once the
    /// point sits in a solid cell or leaves the vertical bounds.
    pub fn update(&mut self, map: &VxlMap, _dt: f32) -> bool {
        if self.position.z >= MAP_Z as f32 - 1.0 || self.position.z < 0.0 {
            return true;
        }
        clipbox(map, self.position.x, self.position.y, self.position.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled_player(map: &VxlMap, x: f32, y: f32) -> Player {
        let mut p = Player::new();
        p.set_position(Vec3::new(x, y, map.get_z(x as i32, y as i32, 0) as f32 - 3.0));
        for _ in 0..30 {
            p.update(map, 1.0 / 60.0);
        }
        p
    }

    #[test]
    fn test_cast_ray_clear_and_blocked() {
        let mut map = VxlMap::flat(64, 64);
        let a = Vec3::new(10.5, 10.5, 40.5);
        let b = Vec3::new(20.5, 10.5, 40.5);
        assert_eq!(cast_ray(&map, a, b), None);

        // one-voxel wall between them
        map.set_point(15, 10, 40, true, 0);
        assert_eq!(cast_ray(&map, a, b), Some((15, 10, 40)));
    }

    #[test]
    fn test_cast_ray_vertical_wall_column() {
        let mut map = VxlMap::flat(64, 64);
        for z in 39..=41 {
            map.set_point(15, 10, z, true, 0);
        }
        let hit = cast_ray(&map, Vec3::new(25.0, 10.5, 40.5), Vec3::new(10.0, 10.5, 40.5));
        assert_eq!(hit, Some((15, 10, 40)));
    }

    #[test]
    fn test_player_settles_on_ground() {
        let map = VxlMap::flat(64, 64);
        let p = settled_player(&map, 10.5, 10.5);
        assert!(!p.airborne);
        assert_eq!(p.velocity.z, 0.0);
    }

    #[test]
    fn test_player_walks_forward() {
        let map = VxlMap::flat(64, 64);
        let mut p = settled_player(&map, 10.5, 10.5);
        p.set_orientation(Vec3::new(1.0, 0.0, 0.0));
        p.set_walk(true, false, false, false);
        let x0 = p.position.x;
        for _ in 0..60 {
            p.update(&map, 1.0 / 60.0);
        }
        assert!(p.position.x > x0 + 0.5, "moved {}", p.position.x - x0);
        assert!((p.position.y - 10.5).abs() < 1e-3);
    }

    #[test]
    fn test_fall_damage_threshold() {
        let map = VxlMap::flat(64, 64);

        // short hop: no damage
        let mut p = Player::new();
        p.set_position(Vec3::new(10.5, 10.5, 58.0));
        let mut dmg = 0;
        for _ in 0..600 {
            dmg += p.update(&map, 1.0 / 60.0);
        }
        assert_eq!(dmg, 0);

        // long drop: hurts
        let mut p = Player::new();
        p.set_position(Vec3::new(10.5, 10.5, 20.0));
        p.airborne = true;
        let mut dmg = 0;
        for _ in 0..600 {
            dmg += p.update(&map, 1.0 / 60.0);
        }
        assert!(dmg > 0, "expected fall damage, got {dmg}");
    }

    #[test]
    fn test_grenade_falls_and_bounces() {
        let map = VxlMap::flat(64, 64);
        let mut g = Grenade::new(Vec3::new(10.5, 10.5, 40.0), Vec3::ZERO);
        let mut bounced = false;
        for _ in 0..600 {
            if g.update(&map, 1.0 / 60.0) {
                bounced = true;
                break;
            }
        }
        assert!(bounced);
        assert!(g.velocity.z <= 0.0, "bounce must reverse the fall");
        assert!(g.position.z < 62.5);
    }

    #[test]
    fn test_generic_movement_terminal() {
        let mut map = VxlMap::flat(64, 64);
        map.set_point(20, 10, 40, true, 0);
        let mut m = GenericMovement::new(Vec3::new(10.5, 10.5, 40.5));
        assert!(!m.update(&map, 1.0 / 60.0));
        m.position = Vec3::new(20.5, 10.5, 40.5);
        assert!(m.update(&map, 1.0 / 60.0));
    }
}
