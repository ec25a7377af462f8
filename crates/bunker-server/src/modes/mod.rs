// modes/mod.rs — game-mode collaborators
//
// A mode subscribes to the core through this trait: the server calls in
// at well-defined points and the mode reads and writes authoritative
// state through `&mut Server`. Per-player mode state lives in the
// connection's store, per-entity state in the mode itself, keyed by
// entity id.

use tracing::warn;

use bunker_common::constants::{EntityKind, Kill, TeamId};
use bunker_common::math3d::Vec3;

use crate::hooks::{BlockEvent, ChatEvent, GameEndEvent, HurtEvent, KillEvent, Outcome};
use crate::server::Server;

pub mod ctf;
pub mod de;
pub mod tc;

pub trait GameMode {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn score_limit(&self) -> u8;

    /// Build the mode's world: entities, sounds, counters.
    fn init(&mut self, server: &mut Server);

    /// Tear the mode's world back down; init may follow for a fresh
    /// round.
    fn deinit(&mut self, server: &mut Server) {
        let _ = server;
    }

    fn update(&mut self, server: &mut Server, dt: f64) {
        let _ = (server, dt);
    }

    /// None asks the server for a plain random spawn in the player's
    /// team half.
    fn get_spawn_point(&mut self, server: &mut Server, player: u8) -> Option<Vec3> {
        let _ = (server, player);
        None
    }

    fn on_player_join(&mut self, server: &mut Server, player: u8) {
        let _ = (server, player);
    }

    fn on_player_leave(&mut self, server: &mut Server, player: u8) {
        let _ = (server, player);
    }

    fn on_player_spawn(&mut self, server: &mut Server, player: u8) {
        let _ = (server, player);
    }

    fn on_player_hurt(
        &mut self,
        server: &mut Server,
        player: u8,
        damage: u8,
        damager: Option<u8>,
        cause: Kill,
    ) {
        let _ = (server, player, damage, damager, cause);
    }

    /// Default scoring: a kill is worth one, a suicide costs one.
    fn on_player_kill(
        &mut self,
        server: &mut Server,
        victim: u8,
        cause: Kill,
        killer: Option<u8>,
    ) {
        let _ = cause;
        score_kill(server, victim, killer);
    }

    /// Crates are useful in every mode; anything else is mode business.
    fn on_entity_collide(&mut self, server: &mut Server, entity: u8, player: u8) {
        crate_pickup(server, entity, player);
    }

    fn on_use_command(&mut self, server: &mut Server, player: u8) {
        let _ = (server, player);
    }

    fn try_player_hurt(&mut self, server: &mut Server, ev: &HurtEvent) -> Option<Outcome<u8>> {
        let _ = (server, ev);
        None
    }

    fn try_player_kill(&mut self, server: &mut Server, ev: &KillEvent) -> Option<Outcome<f64>> {
        let _ = (server, ev);
        None
    }

    fn try_build_block(&mut self, server: &mut Server, ev: &BlockEvent) -> Option<Outcome<()>> {
        let _ = (server, ev);
        None
    }

    fn try_destroy_block(&mut self, server: &mut Server, ev: &BlockEvent) -> Option<Outcome<()>> {
        let _ = (server, ev);
        None
    }

    fn try_chat_message(
        &mut self,
        server: &mut Server,
        ev: &ChatEvent,
    ) -> Option<Outcome<String>> {
        let _ = (server, ev);
        None
    }

    /// End of round: announce, rebuild, respawn everyone.
    fn reset(&mut self, server: &mut Server, winner: Option<TeamId>) {
        server.hooks.on_game_end.fire(GameEndEvent { winner });
        if let Some(team) = winner {
            if let Some(t) = server.teams.get(team) {
                let line = format!("{} team wins!", t.name);
                server.broadcast_hud_message(&line);
            }
            server.play_sound("horn", None);
        }
        self.deinit(server);
        server.set_team_score(TeamId::Team1, 0);
        server.set_team_score(TeamId::Team2, 0);
        self.init(server);

        let players: Vec<u8> = server
            .connections
            .iter()
            .filter(|(_, c)| c.joined)
            .map(|(id, _)| *id)
            .collect();
        for id in players {
            if let Some(conn) = server.connections.get_mut(&id) {
                if conn.state == crate::connection::ConnState::Spawned {
                    conn.state = crate::connection::ConnState::Dead;
                }
                conn.respawn_at = None;
            }
            server.spawn_player(id);
        }
    }

    fn check_win(&mut self, server: &mut Server) {
        let limit = self.score_limit();
        for team in [TeamId::Team1, TeamId::Team2] {
            if server.teams.get(team).is_some_and(|t| t.score >= limit) {
                self.reset(server, Some(team));
                return;
            }
        }
    }
}

/// Pick the mode by its config name.
pub fn load(name: &str) -> Box<dyn GameMode> {
    match name.to_ascii_lowercase().as_str() {
        "ctf" => Box::new(ctf::Ctf::new()),
        "tc" => Box::new(tc::Tc::new()),
        "de" | "defusal" => Box::new(de::Defusal::new()),
        other => {
            warn!(mode = other, "unknown mode, falling back to ctf");
            Box::new(ctf::Ctf::new())
        }
    }
}

// ============================================================
// Shared behaviors
// ============================================================

pub fn score_kill(server: &mut Server, victim: u8, killer: Option<u8>) {
    match killer {
        Some(k) if k != victim => server.add_player_score(k, 1),
        _ => server.add_player_score(victim, -1),
    }
}

/// Health and ammo crates restore and vanish on touch.
pub fn crate_pickup(server: &mut Server, entity: u8, player: u8) {
    let Some(kind) = server.entities.get(&entity).map(|e| e.kind) else { return };
    match kind {
        EntityKind::HealthCrate => {
            let pos = server
                .connections
                .get(&player)
                .map(|c| c.body.position)
                .unwrap_or(Vec3::ZERO);
            server.set_player_hp(player, 100, pos);
            server.destroy_entity(entity);
        }
        EntityKind::AmmoCrate => {
            server.restock_player(player);
            server.destroy_entity(entity);
        }
        _ => {}
    }
}

#[cfg(test)]
pub mod testutil {
    use bunker_common::constants::{TeamId, Weapon, PROTOCOL_VERSION};
    use bunker_common::packets::{ExistingPlayer, Packet};

    use crate::config::ServerConfig;
    use crate::net::PeerId;
    use crate::server::Server;

    pub fn server_with_mode(mode: &str) -> Server {
        let cfg = ServerConfig {
            port: 0,
            mode: mode.to_string(),
            map_width: 64,
            map_length: 64,
            seed: Some(7),
            respawn_time: 4.0,
            ..Default::default()
        };
        Server::new(cfg).expect("test server")
    }

    /// Walk a fake peer through connect → load → join → spawn.
    pub fn join(
        server: &mut Server,
        slot: usize,
        name: &str,
        team: TeamId,
        weapon: Weapon,
    ) -> u8 {
        server.handle_connect(PeerId(slot), PROTOCOL_VERSION);
        let player = *server.peer_index.get(&slot).expect("id allocated");
        let hello = Packet::ExistingPlayer(ExistingPlayer {
            player_id: player,
            team,
            weapon,
            tool: bunker_common::constants::Tool::Weapon,
            score: 0,
            color: bunker_common::bytes::Rgb::new(112, 112, 112),
            name: name.to_string(),
        });
        server.handle_receive(PeerId(slot), &hello.to_bytes());
        player
    }
}
