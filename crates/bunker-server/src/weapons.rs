// weapons.rs — tools, weapons, ammo and reload bookkeeping
//
// All timing uses the server clock passed in by the caller; nothing in
// here reads wall time.

use bunker_common::constants::{Hit, Weapon, RAPID_TOLERANCE};

// ============================================================
// Plain tools
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSpec {
    pub max_primary: u16,
    pub max_secondary: u16,
    pub primary_rate: f64,
    pub secondary_rate: f64,
}

pub const SPADE_TOOL: ToolSpec =
    ToolSpec { max_primary: 0, max_secondary: 0, primary_rate: 0.2, secondary_rate: 1.0 };

pub const BLOCK_TOOL: ToolSpec =
    ToolSpec { max_primary: 50, max_secondary: 0, primary_rate: 0.5, secondary_rate: 1.0 };

pub const GRENADE_TOOL: ToolSpec =
    ToolSpec { max_primary: 3, max_secondary: 0, primary_rate: 0.0, secondary_rate: 0.0 };

#[derive(Debug, Clone)]
pub struct ToolState {
    pub spec: &'static ToolSpec,
    pub primary: bool,
    pub secondary: bool,
    pub primary_ammo: u16,
    pub secondary_ammo: u16,
    last_primary: f64,
    last_secondary: f64,
}

impl ToolState {
    pub fn new(spec: &'static ToolSpec) -> Self {
        Self {
            spec,
            primary: false,
            secondary: false,
            primary_ammo: spec.max_primary,
            secondary_ammo: spec.max_secondary,
            last_primary: f64::MIN,
            last_secondary: f64::MIN,
        }
    }

    pub fn restock(&mut self) {
        self.primary_ammo = self.spec.max_primary;
        self.secondary_ammo = self.spec.max_secondary;
    }

    pub fn release(&mut self) {
        self.primary = false;
        self.secondary = false;
    }

    /// Rate-limit gate over `times` uses. The last-use stamp is written
    /// whether or not the gate passes, so sustained spam keeps failing.
    pub fn check_rapid(&mut self, now: f64, primary: bool, times: u32) -> bool {
        let (last, rate) = if primary {
            (std::mem::replace(&mut self.last_primary, now), self.spec.primary_rate)
        } else {
            (std::mem::replace(&mut self.last_secondary, now), self.spec.secondary_rate)
        };
        now - last >= rate * times as f64 - RAPID_TOLERANCE
    }

    /// Spend one unit of primary ammo.
    pub fn consume(&mut self) -> bool {
        if self.primary_ammo > 0 {
            self.primary_ammo -= 1;
            true
        } else {
            false
        }
    }

    /// Get one unit back, capped at the maximum.
    pub fn refund(&mut self) {
        self.primary_ammo = (self.primary_ammo + 1).min(self.spec.max_primary);
    }
}

// ============================================================
// Weapons
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WeaponSpec {
    pub name: &'static str,
    pub max_clip: u16,
    pub max_reserve: u16,
    pub rate: f64,
    pub reload_time: f64,
    pub one_by_one: bool,
    /// torso, head, arms, legs; None means this weapon cannot hitscan.
    pub damage: [Option<u8>; 4],
    pub falloff: f32,
}

pub const SEMI: WeaponSpec = WeaponSpec {
    name: "Rifle",
    max_clip: 10,
    max_reserve: 50,
    rate: 0.5,
    reload_time: 2.5,
    one_by_one: false,
    damage: [Some(50), Some(150), Some(35), Some(35)],
    falloff: 0.03,
};

pub const SMG: WeaponSpec = WeaponSpec {
    name: "SMG",
    max_clip: 30,
    max_reserve: 120,
    rate: 0.11,
    reload_time: 2.5,
    one_by_one: false,
    damage: [Some(30), Some(80), Some(20), Some(20)],
    falloff: 0.20,
};

pub const SHOTGUN: WeaponSpec = WeaponSpec {
    name: "Shotgun",
    max_clip: 6,
    max_reserve: 48,
    rate: 1.0,
    reload_time: 0.5,
    one_by_one: true,
    damage: [Some(25), Some(30), Some(20), Some(20)],
    falloff: 0.40,
};

pub const SNIPER: WeaponSpec = WeaponSpec {
    name: "Sniper",
    max_clip: 5,
    max_reserve: 25,
    rate: 1.0,
    reload_time: 2.5,
    one_by_one: false,
    damage: [Some(50), Some(150), Some(35), Some(35)],
    falloff: 0.03,
};

/// Rockets, not hitscan; the projectile does the damage.
pub const RPG: WeaponSpec = WeaponSpec {
    name: "RPG",
    max_clip: 1,
    max_reserve: 5,
    rate: 1.0,
    reload_time: 4.0,
    one_by_one: false,
    damage: [None; 4],
    falloff: 0.0,
};

pub fn weapon_spec(w: Weapon) -> &'static WeaponSpec {
    match w {
        Weapon::Semi => &SEMI,
        Weapon::Smg => &SMG,
        Weapon::Shotgun => &SHOTGUN,
        Weapon::Sniper => &SNIPER,
    }
}

/// What a primary-press change asks the server to do besides updating
/// the held flag.
#[derive(Debug, PartialEq, Eq)]
pub struct TriggerChange {
    pub accepted: bool,
    /// Unicast current ammo, guarding against client-side desync.
    pub resend_ammo: bool,
}

#[derive(Debug, Clone)]
pub struct WeaponState {
    pub spec: &'static WeaponSpec,
    pub primary: bool,
    pub secondary: bool,
    pub clip: u16,
    pub reserve: u16,
    pub reloading: bool,
    reload_done_at: f64,
    last_primary: f64,
    next_auto: f64,
}

impl WeaponState {
    pub fn new(spec: &'static WeaponSpec) -> Self {
        Self {
            spec,
            primary: false,
            secondary: false,
            clip: spec.max_clip,
            reserve: spec.max_reserve,
            reloading: false,
            reload_done_at: 0.0,
            last_primary: f64::MIN,
            next_auto: 0.0,
        }
    }

    pub fn restock(&mut self) {
        self.clip = self.spec.max_clip;
        self.reserve = self.spec.max_reserve;
        self.reloading = false;
    }

    pub fn set_primary(&mut self, held: bool) -> TriggerChange {
        let mut resend_ammo = false;
        if held != self.primary && !held && !self.spec.one_by_one && !self.reloading {
            resend_ammo = true;
        }
        if self.clip == 0 && held {
            self.primary = false;
            return TriggerChange { accepted: false, resend_ammo };
        }
        if held && self.spec.one_by_one && self.reloading {
            // pressing the trigger interrupts a shell-by-shell reload
            self.reloading = false;
        }
        self.primary = held;
        TriggerChange { accepted: held, resend_ammo }
    }

    pub fn set_secondary(&mut self, held: bool) -> bool {
        self.secondary = held;
        held
    }

    pub fn check_rapid(&mut self, now: f64, times: u32) -> bool {
        let last = std::mem::replace(&mut self.last_primary, now);
        now - last >= self.spec.rate * times as f64 - RAPID_TOLERANCE
    }

    pub fn consume_round(&mut self) {
        self.clip = self.clip.saturating_sub(1);
    }

    /// Held-trigger bookkeeping: burn one round per rate window while
    /// the trigger stays down. Keeps the server's clip in step with the
    /// client's own firing.
    pub fn auto_fire(&mut self, now: f64) -> bool {
        if !self.primary || self.clip == 0 {
            return false;
        }
        if self.reloading && !self.spec.one_by_one {
            return false;
        }
        if now < self.next_auto {
            return false;
        }
        self.next_auto = now + self.spec.rate;
        self.clip -= 1;
        if self.clip == 0 {
            self.primary = false;
        }
        true
    }

    /// Begin a reload unless one is running or pointless.
    pub fn reload(&mut self, now: f64) -> bool {
        if self.reloading {
            return false;
        }
        if self.reserve == 0 || self.clip >= self.spec.max_clip {
            return false;
        }
        self.reloading = true;
        self.reload_done_at = now + self.spec.reload_time;
        true
    }

    /// Advance the reload machine. Returns (clip, reserve) when a step
    /// completed this tick; the caller unicasts WeaponReload then.
    pub fn tick(&mut self, now: f64) -> Option<(u16, u16)> {
        if !self.reloading || now < self.reload_done_at {
            return None;
        }
        self.reloading = false;
        if self.spec.one_by_one {
            self.clip += 1;
            self.reserve -= 1;
            // chain the next shell
            self.reload(now);
        } else {
            let take = (self.spec.max_clip - self.clip).min(self.reserve);
            self.clip += take;
            self.reserve -= take;
        }
        Some((self.clip, self.reserve))
    }

    /// Damage dealt to `zone` at `distance`, or None if this claim is
    /// impossible right now.
    pub fn get_damage(&self, zone: Hit, distance: f32) -> Option<u8> {
        if self.reloading && !self.spec.one_by_one {
            return None;
        }
        let base = match zone {
            Hit::Torso => self.spec.damage[0],
            Hit::Head => self.spec.damage[1],
            Hit::Arms => self.spec.damage[2],
            Hit::Legs => self.spec.damage[3],
            Hit::Melee => None,
        }?;
        let scale = 1.0 - (self.spec.falloff * distance / 30.0).min(1.0);
        Some((base as f32 * scale).round() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rapid_window_bound() {
        // a weapon of rate R accepts at most ceil(T/R)+1 uses in T seconds
        let mut w = WeaponState::new(&SEMI); // rate 0.5
        let mut accepted = 0;
        let mut t = 0.0;
        while t < 5.0 {
            if w.check_rapid(t, 1) {
                accepted += 1;
            }
            t += 0.05;
        }
        assert!(accepted <= 11, "accepted {accepted}");

        // a client firing exactly at the rate is never rejected
        let mut w = WeaponState::new(&SEMI);
        for i in 0..10 {
            assert!(w.check_rapid(1.0 + i as f64 * 0.5, 1));
        }
    }

    #[test]
    fn test_rapid_tolerance() {
        let mut w = WeaponState::new(&SEMI);
        assert!(w.check_rapid(1.0, 1));
        // a hair early is still fine (client-side jitter)
        assert!(w.check_rapid(1.48, 1));
        // plainly early is not
        assert!(!w.check_rapid(1.8, 1));
    }

    #[test]
    fn test_plain_reload_transfers_from_reserve() {
        let mut w = WeaponState::new(&SMG);
        for _ in 0..30 {
            w.consume_round();
        }
        assert_eq!(w.clip, 0);
        assert!(w.reload(10.0));
        assert!(w.tick(11.0).is_none(), "reload still running");
        assert_eq!(w.tick(12.5), Some((30, 90)));
        assert!(!w.reloading);
    }

    #[test]
    fn test_reload_noop_cases() {
        let mut w = WeaponState::new(&SMG);
        assert!(!w.reload(0.0), "full clip");
        w.clip = 0;
        w.reserve = 0;
        assert!(!w.reload(0.0), "empty reserve");
        w.reserve = 30;
        assert!(w.reload(0.0));
        assert!(!w.reload(0.1), "already reloading");
    }

    #[test]
    fn test_shotgun_chain_and_cancel() {
        let mut w = WeaponState::new(&SHOTGUN);
        for _ in 0..6 {
            w.consume_round();
        }
        assert_eq!((w.clip, w.reserve), (0, 48));

        assert!(w.reload(100.0));
        // first shell lands after 0.5s and the chain re-arms
        assert_eq!(w.tick(100.5), Some((1, 47)));
        assert!(w.reloading);

        // trigger pressed before the second shell: chain cancelled
        let change = w.set_primary(true);
        assert!(change.accepted);
        assert!(!w.reloading);
        assert!(w.tick(101.5).is_none());
        assert_eq!((w.clip, w.reserve), (1, 47));
    }

    #[test]
    fn test_shotgun_chain_runs_to_full() {
        let mut w = WeaponState::new(&SHOTGUN);
        for _ in 0..6 {
            w.consume_round();
        }
        w.reload(0.0);
        let mut t = 0.0;
        for expect in 1..=6 {
            t += 0.5;
            assert_eq!(w.tick(t), Some((expect, 48 - expect)));
        }
        assert!(!w.reloading, "chain stops at a full clip");
    }

    #[test]
    fn test_empty_clip_refuses_trigger() {
        let mut w = WeaponState::new(&SEMI);
        w.clip = 0;
        let change = w.set_primary(true);
        assert!(!change.accepted);
        assert!(!w.primary);
    }

    #[test]
    fn test_release_requests_ammo_resend() {
        let mut w = WeaponState::new(&SEMI);
        w.set_primary(true);
        let change = w.set_primary(false);
        assert!(change.resend_ammo);
    }

    #[test]
    fn test_damage_table_and_falloff() {
        let w = WeaponState::new(&SMG);
        assert_eq!(w.get_damage(Hit::Torso, 0.0), Some(30));
        assert_eq!(w.get_damage(Hit::Head, 0.0), Some(80));
        // falloff 0.2 at 30 units: 30 * (1 - 0.2) = 24
        assert_eq!(w.get_damage(Hit::Torso, 30.0), Some(24));
        // far enough that the scale floors out
        assert_eq!(w.get_damage(Hit::Torso, 10_000.0), Some(0));
        assert_eq!(w.get_damage(Hit::Melee, 0.0), None);

        let semi = WeaponState::new(&SEMI);
        assert_eq!(semi.get_damage(Hit::Head, 0.0), Some(150));
    }

    #[test]
    fn test_reloading_blocks_damage() {
        let mut w = WeaponState::new(&SMG);
        w.consume_round();
        w.reload(0.0);
        assert_eq!(w.get_damage(Hit::Torso, 0.0), None);
        // one-by-one weapons can fire mid-reload
        let mut s = WeaponState::new(&SHOTGUN);
        s.consume_round();
        s.reload(0.0);
        assert!(s.get_damage(Hit::Torso, 0.0).is_some());
    }

    #[test]
    fn test_auto_fire_tracks_rate() {
        let mut w = WeaponState::new(&SEMI); // rate 0.5, clip 10
        w.set_primary(true);
        let mut fired = 0;
        let mut t = 0.0;
        while t < 2.0 {
            if w.auto_fire(t) {
                fired += 1;
            }
            t += 1.0 / 60.0;
        }
        // 2 seconds at 0.5s per round
        assert_eq!(fired, 4);
        assert_eq!(w.clip, 6);

        // drained clip releases the trigger on its own
        w.clip = 1;
        assert!(w.auto_fire(100.0));
        assert!(!w.primary);
        assert!(!w.auto_fire(200.0));
    }

    #[test]
    fn test_tool_rapid_and_ammo() {
        let mut b = ToolState::new(&BLOCK_TOOL);
        assert_eq!(b.primary_ammo, 50);
        assert!(b.consume());
        b.refund();
        b.refund();
        assert_eq!(b.primary_ammo, 50, "refund caps at the maximum");
        assert!(b.check_rapid(10.0, true, 1));
        assert!(!b.check_rapid(10.1, true, 1));

        let mut g = ToolState::new(&GRENADE_TOOL);
        // zero rate means the gate always passes
        assert!(g.check_rapid(0.0, true, 1));
        assert!(g.check_rapid(0.0, true, 1));
        assert!(g.consume());
        assert!(g.consume());
        assert!(g.consume());
        assert!(!g.consume());
    }
}
