// modes/de.rs — bomb defusal
//
// The terrorists carry a bomb to one of two sites and hold still to
// plant it; forty seconds of beeping later it goes off for the round.
// Counter-terrorists win rounds by keeping the fuse from running out.

use bunker_common::bytes::Rgb;
use bunker_common::constants::{EntityKind, TeamId, Tool};
use bunker_common::math3d::Vec3;

use crate::connection::StoreValue;
use crate::modes::GameMode;
use crate::server::Server;

const PLANT_SECONDS: u32 = 5;
const FUSE_SECONDS: f64 = 40.0;
const PLANT_RETRY_INTERVAL: f64 = 3.0;

#[derive(Debug, Clone, Copy)]
struct PlantJob {
    player: u8,
    remaining: u32,
    next_step: f64,
}

#[derive(Debug, Clone, Copy)]
struct Fuse {
    detonate_at: f64,
    next_beep: f64,
}

pub struct Defusal {
    score_limit: u8,
    bomb: Option<u8>,
    sites: Vec<u8>,
    planter: Option<u8>,
    plant: Option<PlantJob>,
    fuse: Option<Fuse>,
}

impl Defusal {
    pub fn new() -> Self {
        Self {
            score_limit: 10,
            bomb: None,
            sites: Vec::new(),
            planter: None,
            plant: None,
            fuse: None,
        }
    }

    fn bomb_carried_by(&self, server: &Server, player: u8) -> bool {
        self.bomb
            .and_then(|id| server.entities.get(&id))
            .is_some_and(|e| e.carrier == Some(player))
    }

    fn plant_bomb(&mut self, server: &mut Server, player: u8) {
        let Some(bomb) = self.bomb else { return };
        let Some(pos) = server.connections.get(&player).map(|c| c.body.position) else {
            return;
        };
        server.set_entity_carrier(bomb, None);
        server.set_entity_team(bomb, Some(TeamId::Team2));
        server.set_entity_position(bomb, pos);
        self.planter = Some(player);
        self.fuse =
            Some(Fuse { detonate_at: server.time + FUSE_SECONDS, next_beep: server.time });

        let name = server
            .connections
            .get(&player)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        server.broadcast_hud_message(&format!("{name} planted the bomb"));
        server.play_sound("c4plant", Some(pos));
    }

    fn detonate(&mut self, server: &mut Server) {
        let Some(bomb) = self.bomb else { return };
        let Some(pos) = server.entities.get(&bomb).map(|e| e.position) else { return };
        let planter = self.planter.unwrap_or(0);
        server.broadcast_hud_message("Boom.");
        server.explode(planter, pos);
        server.add_team_score(TeamId::Team2, 1);
        self.check_win(server);
        // fresh round unless the win already rebuilt everything
        if self.fuse.is_some() {
            self.round_reset(server);
        }
    }

    fn round_reset(&mut self, server: &mut Server) {
        self.deinit(server);
        self.init_round(server);
    }

    fn init_round(&mut self, server: &mut Server) {
        self.planter = None;
        self.plant = None;
        self.fuse = None;

        let bomb_pos = server.random_team_position(TeamId::Team2);
        self.bomb = server.create_entity(EntityKind::Flag, bomb_pos, Some(TeamId::Team1));
        for _ in 0..2 {
            let pos = server.random_team_position(TeamId::Team1);
            if let Some(id) = server.create_entity(EntityKind::CommandPost, pos, None) {
                self.sites.push(id);
            }
        }
    }
}

impl GameMode for Defusal {
    fn name(&self) -> &str {
        "Defusal"
    }

    fn description(&self) -> &str {
        "Plant the bomb, or keep it from going off"
    }

    fn score_limit(&self) -> u8 {
        self.score_limit
    }

    fn init(&mut self, server: &mut Server) {
        self.score_limit = server.config.score_limit;
        server.teams.team1.name = "Counter-Terrorists".to_string();
        server.teams.team1.color = Rgb::new(93, 121, 174);
        server.teams.team2.name = "Terrorists".to_string();
        server.teams.team2.color = Rgb::new(222, 155, 53);
        self.init_round(server);
    }

    fn deinit(&mut self, server: &mut Server) {
        if let Some(id) = self.bomb.take() {
            server.destroy_entity(id);
        }
        for id in self.sites.drain(..) {
            server.destroy_entity(id);
        }
    }

    fn on_entity_collide(&mut self, server: &mut Server, entity: u8, player: u8) {
        let Some(team) = server.connections.get(&player).map(|c| c.team) else { return };

        if Some(entity) == self.bomb {
            // only terrorists may pick it up, and not once planted
            if team == TeamId::Team2 && self.planter.is_none() {
                server.set_entity_carrier(entity, Some(player));
                let name = server
                    .connections
                    .get(&player)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                server.broadcast_hud_message(&format!("{name} picked up the bomb"));
            }
            return;
        }

        if self.sites.contains(&entity) {
            if team != TeamId::Team2
                || self.planter.is_some()
                || !self.bomb_carried_by(server, player)
            {
                return;
            }
            let now = server.time;
            let mut start = false;
            if let Some(conn) = server.connections.get_mut(&player) {
                let last = conn
                    .store
                    .get("de_last_plant")
                    .map(|v| v.as_float())
                    .unwrap_or(f64::MIN);
                if now - last >= PLANT_RETRY_INTERVAL {
                    conn.store.insert("de_last_plant".to_string(), StoreValue::Float(now));
                    start = self.plant.is_none();
                }
            }
            if start {
                self.plant =
                    Some(PlantJob { player, remaining: PLANT_SECONDS, next_step: now });
            }
            return;
        }

        crate::modes::crate_pickup(server, entity, player);
    }

    fn update(&mut self, server: &mut Server, _dt: f64) {
        let now = server.time;

        if let Some(job) = self.plant {
            if now >= job.next_step {
                // planting takes standing still with the block tool out
                let holds_still = server
                    .connections
                    .get(&job.player)
                    .is_some_and(|c| c.is_alive() && c.tool == Tool::Block);
                if !holds_still {
                    self.plant = None;
                } else if job.remaining == 0 {
                    self.plant = None;
                    self.plant_bomb(server, job.player);
                } else {
                    // pin the planter in place for the countdown
                    let pos = server
                        .connections
                        .get(&job.player)
                        .map(|c| c.body.position)
                        .unwrap_or(Vec3::ZERO);
                    if let Some(conn) = server.connections.get_mut(&job.player) {
                        conn.body.set_position(pos);
                    }
                    server.send_to_player(
                        job.player,
                        &bunker_common::packets::Packet::ChatMessage(
                            bunker_common::packets::ChatMessage {
                                player_id: 0xFF,
                                chat_type: bunker_common::constants::Chat::System,
                                value: format!(
                                    "Planting, {} seconds remaining.",
                                    job.remaining
                                ),
                            },
                        ),
                    );
                    self.plant = Some(PlantJob {
                        player: job.player,
                        remaining: job.remaining - 1,
                        next_step: now + 1.0,
                    });
                }
            }
        }

        if let Some(fuse) = self.fuse {
            if now >= fuse.detonate_at {
                self.detonate(server);
            } else if now >= fuse.next_beep {
                let pos = self
                    .bomb
                    .and_then(|id| server.entities.get(&id))
                    .map(|e| e.position);
                server.play_sound("c4beep", pos);
                // beeps tighten as the fuse runs down
                let fraction = (fuse.detonate_at - now) / FUSE_SECONDS;
                self.fuse = Some(Fuse {
                    detonate_at: fuse.detonate_at,
                    next_beep: now + fraction + 0.1,
                });
            }
        }
    }

    fn on_player_leave(&mut self, server: &mut Server, player: u8) {
        // a vanished carrier drops the bomb where they stood
        if self.bomb_carried_by(server, player) {
            if let Some(bomb) = self.bomb {
                let pos = server
                    .connections
                    .get(&player)
                    .map(|c| c.body.position)
                    .unwrap_or(Vec3::ZERO);
                server.set_entity_carrier(bomb, None);
                server.set_entity_position(bomb, pos);
            }
        }
        if self.plant.is_some_and(|j| j.player == player) {
            self.plant = None;
        }
    }
}
