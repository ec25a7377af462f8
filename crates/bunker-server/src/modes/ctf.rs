// modes/ctf.rs — capture the flag
//
// One intel flag and one command post per team. Touching the enemy
// intel binds it to you; standing at your own post banks it for a
// point. Posts also restock friendlies, at most once every 3 seconds.

use std::collections::HashMap;

use bunker_common::constants::{EntityKind, Kill, TeamId};
use bunker_common::math3d::Vec3;

use crate::connection::StoreValue;
use crate::modes::{crate_pickup, score_kill, GameMode};
use crate::server::Server;

const RESTOCK_INTERVAL: f64 = 3.0;

pub struct Ctf {
    score_limit: u8,
    intel: HashMap<TeamId, u8>,
    posts: HashMap<TeamId, u8>,
}

impl Ctf {
    pub fn new() -> Self {
        Self { score_limit: 10, intel: HashMap::new(), posts: HashMap::new() }
    }

    fn intel_of(&self, entity: u8) -> Option<TeamId> {
        self.intel.iter().find(|(_, id)| **id == entity).map(|(t, _)| *t)
    }

    fn post_of(&self, entity: u8) -> Option<TeamId> {
        self.posts.iter().find(|(_, id)| **id == entity).map(|(t, _)| *t)
    }

    fn reset_intel(&mut self, server: &mut Server, team: TeamId) {
        if let Some(&id) = self.intel.get(&team) {
            let pos = server.random_team_position(team);
            server.set_entity_carrier(id, None);
            server.set_entity_position(id, pos);
        }
    }

    /// Anything this player is hauling falls right where they were.
    fn drop_intel(&mut self, server: &mut Server, player: u8) {
        let held: Vec<u8> = self
            .intel
            .values()
            .copied()
            .filter(|id| {
                server.entities.get(id).is_some_and(|e| e.carrier == Some(player))
            })
            .collect();
        for id in held {
            let pos = server
                .connections
                .get(&player)
                .map(|c| c.body.position)
                .unwrap_or(Vec3::ZERO);
            server.set_entity_carrier(id, None);
            server.set_entity_position(id, pos);
        }
    }

    fn capture(&mut self, server: &mut Server, player: u8, intel_team: TeamId) {
        self.reset_intel(server, intel_team);
        let Some(team) = server.connections.get(&player).map(|c| c.team) else { return };
        server.add_team_score(team, 1);
        let name = server
            .connections
            .get(&player)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let intel_name = server
            .teams
            .get(intel_team)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        server.broadcast_hud_message(&format!("{name} captured the {intel_name} Intel"));
        server.play_sound("horn", None);
        self.check_win(server);
    }
}

impl GameMode for Ctf {
    fn name(&self) -> &str {
        "CTF"
    }

    fn description(&self) -> &str {
        "Steal the enemy intel and bring it to your post"
    }

    fn score_limit(&self) -> u8 {
        self.score_limit
    }

    fn init(&mut self, server: &mut Server) {
        self.score_limit = server.config.score_limit;
        for team in [TeamId::Team1, TeamId::Team2] {
            let intel_pos = server.random_team_position(team);
            if let Some(id) = server.create_entity(EntityKind::Flag, intel_pos, Some(team)) {
                self.intel.insert(team, id);
            }
            let post_pos = server.random_team_position(team);
            if let Some(id) = server.create_entity(EntityKind::CommandPost, post_pos, Some(team))
            {
                self.posts.insert(team, id);
            }
        }
    }

    fn deinit(&mut self, server: &mut Server) {
        for (_, id) in self.intel.drain() {
            server.destroy_entity(id);
        }
        for (_, id) in self.posts.drain() {
            server.destroy_entity(id);
        }
    }

    fn on_entity_collide(&mut self, server: &mut Server, entity: u8, player: u8) {
        let Some(player_team) = server.connections.get(&player).map(|c| c.team) else {
            return;
        };

        if let Some(intel_team) = self.intel_of(entity) {
            if intel_team == player_team {
                return;
            }
            server.set_entity_carrier(entity, Some(player));
            let name = server
                .connections
                .get(&player)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            let intel_name = server
                .teams
                .get(intel_team)
                .map(|t| t.name.clone())
                .unwrap_or_default();
            server.broadcast_hud_message(&format!("{name} picked up the {intel_name} Intel"));
            server.play_sound("pickup", None);
            return;
        }

        if let Some(post_team) = self.post_of(entity) {
            if post_team != player_team {
                return;
            }
            let now = server.time;
            let mut resupply = false;
            if let Some(conn) = server.connections.get_mut(&player) {
                let last = conn
                    .store
                    .get("ctf_last_restock")
                    .map(|v| v.as_float())
                    .unwrap_or(0.0);
                if now - last >= RESTOCK_INTERVAL {
                    conn.store
                        .insert("ctf_last_restock".to_string(), StoreValue::Float(now));
                    resupply = true;
                }
            }
            if resupply {
                server.restock_player(player);
            }
            if let Some(enemy) = player_team.other() {
                let carried = self
                    .intel
                    .get(&enemy)
                    .and_then(|id| server.entities.get(id))
                    .is_some_and(|e| e.carrier == Some(player));
                if carried {
                    self.capture(server, player, enemy);
                }
            }
            return;
        }

        crate_pickup(server, entity, player);
    }

    fn on_player_leave(&mut self, server: &mut Server, player: u8) {
        self.drop_intel(server, player);
    }

    fn on_player_kill(
        &mut self,
        server: &mut Server,
        victim: u8,
        _cause: Kill,
        killer: Option<u8>,
    ) {
        self.drop_intel(server, victim);
        score_kill(server, victim, killer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunker_common::constants::Weapon;

    use crate::connection::ConnState;
    use crate::modes::testutil::{join, server_with_mode};
    use crate::net::PeerId;

    fn intel_id(server: &Server, team: TeamId) -> u8 {
        server
            .entities
            .values()
            .find(|e| e.kind == EntityKind::Flag && e.team == Some(team))
            .unwrap()
            .id
    }

    #[test]
    fn test_init_spawns_flags_and_posts() {
        let server = server_with_mode("ctf");
        let flags = server.entities.values().filter(|e| e.kind == EntityKind::Flag).count();
        let posts = server
            .entities
            .values()
            .filter(|e| e.kind == EntityKind::CommandPost)
            .count();
        assert_eq!(flags, 2);
        assert_eq!(posts, 2);
    }

    #[test]
    fn test_enemy_intel_pickup_binds_carrier() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Taker", TeamId::Team1, Weapon::Smg);
        let enemy_intel = intel_id(&server, TeamId::Team2);

        // walk the player onto the intel and run a tick
        let pos = server.entities[&enemy_intel].position;
        server.connections.get_mut(&p).unwrap().body.position = pos;
        server.update_entities(1.0 / 30.0);

        assert_eq!(server.entities[&enemy_intel].carrier, Some(p));
    }

    #[test]
    fn test_own_intel_ignored() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Guard", TeamId::Team1, Weapon::Smg);
        let own_intel = intel_id(&server, TeamId::Team1);
        let pos = server.entities[&own_intel].position;
        server.connections.get_mut(&p).unwrap().body.position = pos;
        server.update_entities(1.0 / 30.0);
        assert_eq!(server.entities[&own_intel].carrier, None);
    }

    #[test]
    fn test_intel_drops_on_disconnect() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Runner", TeamId::Team1, Weapon::Smg);
        let enemy_intel = intel_id(&server, TeamId::Team2);

        let pickup_pos = server.entities[&enemy_intel].position;
        server.connections.get_mut(&p).unwrap().body.position = pickup_pos;
        server.update_entities(1.0 / 30.0);
        assert_eq!(server.entities[&enemy_intel].carrier, Some(p));

        // wander off, then vanish
        let last = Vec3::new(30.5, 31.5, 55.0);
        server.connections.get_mut(&p).unwrap().body.position = last;
        server.handle_peer_disconnect(PeerId(0));

        let intel = &server.entities[&enemy_intel];
        assert_eq!(intel.carrier, None);
        assert_eq!(intel.position, last);
        // and the id is reusable without a stale carrier
        assert_eq!(server.player_ids.take(), Some(p));
    }

    #[test]
    fn test_capture_scores_and_resets_intel() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Cap", TeamId::Team1, Weapon::Smg);
        let enemy_intel = intel_id(&server, TeamId::Team2);
        let own_post = server
            .entities
            .values()
            .find(|e| e.kind == EntityKind::CommandPost && e.team == Some(TeamId::Team1))
            .unwrap()
            .id;

        let pos = server.entities[&enemy_intel].position;
        server.connections.get_mut(&p).unwrap().body.position = pos;
        server.update_entities(1.0 / 30.0);
        assert_eq!(server.entities[&enemy_intel].carrier, Some(p));

        let post_pos = server.entities[&own_post].position;
        server.connections.get_mut(&p).unwrap().body.position = post_pos;
        server.update_entities(1.0 / 30.0);

        assert_eq!(server.teams.team1.score, 1);
        assert_eq!(server.entities[&enemy_intel].carrier, None);
    }

    #[test]
    fn test_kill_drops_intel() {
        let mut server = server_with_mode("ctf");
        let p = join(&mut server, 0, "Dead", TeamId::Team1, Weapon::Smg);
        let enemy_intel = intel_id(&server, TeamId::Team2);
        let pos = server.entities[&enemy_intel].position;
        server.connections.get_mut(&p).unwrap().body.position = pos;
        server.update_entities(1.0 / 30.0);
        assert_eq!(server.entities[&enemy_intel].carrier, Some(p));

        server.kill_player(p, Kill::Weapon, None);
        assert_eq!(server.connections[&p].state, ConnState::Dead);
        assert_eq!(server.entities[&enemy_intel].carrier, None);
    }
}
