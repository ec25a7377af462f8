// modes/tc.rs — territory control
//
// Seven command posts strung across the middle of the map. Standing in
// a territory's radius pushes its progress toward your team; 0.0 is
// fully team-1, 1.0 fully team-2, and crossing the middle neutralizes.
// A team owning every territory ends the round.

use std::collections::HashMap;

use bunker_common::constants::{
    EntityKind, TeamId, MAX_TERRITORY_COUNT, TC_CAPTURE_DISTANCE, TC_CAPTURE_RATE,
};
use bunker_common::math3d::Vec3;
use bunker_common::packets::{Packet, ProgressBar};

use crate::modes::GameMode;
use crate::server::Server;

#[derive(Debug, Default, Clone)]
struct TerritoryState {
    progress: f32,
    rate: f32,
    occupants: Vec<u8>,
}

pub struct Tc {
    territories: Vec<u8>,
    state: HashMap<u8, TerritoryState>,
}

impl Tc {
    pub fn new() -> Self {
        Self { territories: Vec::new(), state: HashMap::new() }
    }

    fn owner_for(progress: f32, previous: f32) -> Option<Option<TeamId>> {
        if progress == 0.0 {
            Some(Some(TeamId::Team1))
        } else if progress == 1.0 {
            Some(Some(TeamId::Team2))
        } else if previous < 0.5 && progress >= 0.5 || previous > 0.5 && progress <= 0.5 {
            Some(None)
        } else {
            None
        }
    }

    fn update_scores(&self, server: &mut Server) {
        let mut owned = [0u8; 2];
        for id in &self.territories {
            match server.entities.get(id).and_then(|e| e.team) {
                Some(TeamId::Team1) => owned[0] += 1,
                Some(TeamId::Team2) => owned[1] += 1,
                _ => {}
            }
        }
        server.set_team_score(TeamId::Team1, owned[0]);
        server.set_team_score(TeamId::Team2, owned[1]);
    }

    fn send_progress(&self, server: &mut Server, state: &TerritoryState, stopped_to: &[u8]) {
        let bar = ProgressBar {
            progress: state.progress,
            rate: state.rate,
            color1: server.teams.team1.color,
            color2: server.teams.team2.color,
            stopped: false,
        };
        let packet = Packet::ProgressBar(bar);
        for player in &state.occupants {
            server.send_to_player(*player, &packet);
        }
        let stop = Packet::ProgressBar(ProgressBar { stopped: true, ..bar });
        for player in stopped_to {
            server.send_to_player(*player, &stop);
        }
    }
}

impl GameMode for Tc {
    fn name(&self) -> &str {
        "TC"
    }

    fn description(&self) -> &str {
        "Hold the line of territories"
    }

    fn score_limit(&self) -> u8 {
        MAX_TERRITORY_COUNT as u8
    }

    fn init(&mut self, server: &mut Server) {
        // middle band of the map, one territory per column slice
        let length = server.map.length() as i32;
        let y1 = length * 3 / 8;
        let y2 = length * 5 / 8;
        let interval = server.map.width() as i32 / MAX_TERRITORY_COUNT as i32;

        for i in 0..MAX_TERRITORY_COUNT {
            let x1 = interval * i as i32;
            let (x, y, z) = server.map.random_point(&mut server.rng, x1, y1, x1 + interval, y2);
            let team = if i < MAX_TERRITORY_COUNT / 2 {
                Some(TeamId::Team1)
            } else if i > (MAX_TERRITORY_COUNT - 1) / 2 {
                Some(TeamId::Team2)
            } else {
                None
            };
            let pos = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32);
            if let Some(id) = server.create_entity(EntityKind::CommandPost, pos, team) {
                self.territories.push(id);
                let progress = match team {
                    Some(TeamId::Team1) => 0.0,
                    Some(TeamId::Team2) => 1.0,
                    _ => 0.5,
                };
                self.state.insert(id, TerritoryState { progress, rate: 0.0, occupants: Vec::new() });
            }
        }
        self.update_scores(server);
    }

    fn deinit(&mut self, server: &mut Server) {
        for id in self.territories.drain(..) {
            server.destroy_entity(id);
        }
        self.state.clear();
    }

    fn update(&mut self, server: &mut Server, dt: f64) {
        let ids = self.territories.clone();
        for id in ids {
            let Some(pos) = server.entities.get(&id).map(|e| e.position) else { continue };

            let mut occupants: Vec<u8> = server
                .connections
                .iter()
                .filter(|(_, c)| c.is_alive())
                .filter(|(_, c)| {
                    c.body.position.sq_distance(pos)
                        <= TC_CAPTURE_DISTANCE * TC_CAPTURE_DISTANCE
                })
                .map(|(pid, _)| *pid)
                .collect();
            occupants.sort_unstable();

            let mut rate = 0.0f32;
            for pid in &occupants {
                rate += match server.connections.get(pid).map(|c| c.team) {
                    Some(TeamId::Team1) => -TC_CAPTURE_RATE,
                    Some(TeamId::Team2) => TC_CAPTURE_RATE,
                    _ => 0.0,
                };
            }

            let st = self.state.entry(id).or_default();
            let occupancy_changed = occupants != st.occupants;
            let left: Vec<u8> = st
                .occupants
                .iter()
                .copied()
                .filter(|p| !occupants.contains(p))
                .collect();
            let previous = st.progress;
            st.progress = (st.progress + rate * dt as f32).clamp(0.0, 1.0);
            let rate_changed = rate != st.rate;
            st.rate = rate;
            st.occupants = occupants;
            let progress = st.progress;
            let snapshot = st.clone();

            if occupancy_changed || rate_changed {
                self.send_progress(server, &snapshot, &left);
            }

            if let Some(new_team) = Self::owner_for(progress, previous) {
                if server.entities.get(&id).is_some_and(|e| e.team != new_team) {
                    server.set_entity_team(id, new_team);
                    let grid = server.map.to_grid(pos.x, pos.y);
                    let line = match new_team.and_then(|t| server.teams.get(t)) {
                        Some(team) => format!("{} team captured {grid}", team.name),
                        None => format!("{grid} has been neutralized"),
                    };
                    server.broadcast_hud_message(&line);
                    self.update_scores(server);
                    self.check_win(server);
                }
            }
        }
    }

    // Territories never move with players; intel rules do not apply.
    fn on_entity_collide(&mut self, server: &mut Server, entity: u8, player: u8) {
        crate::modes::crate_pickup(server, entity, player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunker_common::constants::Weapon;

    use crate::modes::testutil::{join, server_with_mode};

    fn neutral_territory(server: &Server) -> u8 {
        server
            .entities
            .values()
            .find(|e| e.kind == EntityKind::CommandPost && e.team.is_none())
            .unwrap()
            .id
    }

    #[test]
    fn test_init_layout() {
        let server = server_with_mode("tc");
        assert_eq!(server.entities.len(), MAX_TERRITORY_COUNT);
        let team1 = server.entities.values().filter(|e| e.team == Some(TeamId::Team1)).count();
        let team2 = server.entities.values().filter(|e| e.team == Some(TeamId::Team2)).count();
        let neutral = server.entities.values().filter(|e| e.team.is_none()).count();
        assert_eq!(team1, 3);
        assert_eq!(team2, 3);
        assert_eq!(neutral, 1);
        // initial scores reflect ownership
        assert_eq!(server.teams.team1.score, 3);
        assert_eq!(server.teams.team2.score, 3);
    }

    #[test]
    fn test_lone_capture_progress_and_flip() {
        let mut server = server_with_mode("tc");
        let p = join(&mut server, 0, "Cap", TeamId::Team2, Weapon::Semi);
        let territory = neutral_territory(&server);
        let pos = server.entities[&territory].position;
        server.connections.get_mut(&p).unwrap().body.position = pos;

        // a lone team-2 occupant pushes 0.5 → 1.0 at TC_CAPTURE_RATE/s
        let dt = 0.1;
        let mut elapsed = 0.0;
        while elapsed < 0.5 / TC_CAPTURE_RATE as f64 + 1.0 {
            server.time += dt;
            server.with_mode(|m, s| m.update(s, dt));
            elapsed += dt;
            // keep the player pinned on the point
            server.connections.get_mut(&p).unwrap().body.position = pos;
        }

        assert_eq!(server.entities[&territory].team, Some(TeamId::Team2));
        assert_eq!(server.teams.team2.score, 4);
    }

    #[test]
    fn test_opposing_occupants_cancel() {
        let mut server = server_with_mode("tc");
        let a = join(&mut server, 0, "One", TeamId::Team1, Weapon::Semi);
        let b = join(&mut server, 1, "Two", TeamId::Team2, Weapon::Semi);
        let territory = neutral_territory(&server);
        let pos = server.entities[&territory].position;
        server.connections.get_mut(&a).unwrap().body.position = pos;
        server.connections.get_mut(&b).unwrap().body.position = pos;

        for _ in 0..100 {
            server.with_mode(|m, s| m.update(s, 0.1));
        }
        assert_eq!(server.entities[&territory].team, None, "stalemate holds");
    }

    #[test]
    fn test_full_sweep_wins_and_resets() {
        let mut server = server_with_mode("tc");
        join(&mut server, 0, "W", TeamId::Team2, Weapon::Semi);
        server.set_team_score(TeamId::Team2, MAX_TERRITORY_COUNT as u8);
        server.with_mode(|m, s| m.check_win(s));

        // the round reset rebuilt the line: 3/3/1 ownership, scores to
        // match
        assert_eq!(server.entities.len(), MAX_TERRITORY_COUNT);
        assert_eq!(server.teams.team1.score, 3);
        assert_eq!(server.teams.team2.score, 3);
    }
}
