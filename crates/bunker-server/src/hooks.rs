// hooks.rs — the script-facing event bus
//
// Two hook kinds. `Event` is fan-out with deferred delivery: firing
// queues the payload and the tick loop drains the queue once the
// triggering operation has fully settled. `TryEvent` is synchronous and
// overridable: the first subscriber returning Some decides the outcome.
//
// Subscribers are closures over `&mut Server`; the id handed back at
// registration is the cancellation token. A failing subscriber is
// logged and skipped, it never vetoes the operation by erroring.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use bunker_common::constants::{BlockActionKind, Chat, Kill, TeamId};

use crate::server::Server;

pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

fn next_handler_id() -> HandlerId {
    NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)
}

/// What an overridable subscriber may decide.
pub enum Outcome<R> {
    Cancel,
    Override(R),
}

type Callback<A> = Box<dyn FnMut(&mut Server, &A) -> anyhow::Result<()>>;
type TryCallback<A, R> = Box<dyn FnMut(&mut Server, &A) -> anyhow::Result<Option<Outcome<R>>>>;

pub struct Event<A> {
    handlers: Vec<(HandlerId, Callback<A>)>,
    queue: Vec<A>,
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self { handlers: Vec::new(), queue: Vec::new() }
    }
}

impl<A> Event<A> {
    pub fn subscribe(
        &mut self,
        f: impl FnMut(&mut Server, &A) -> anyhow::Result<()> + 'static,
    ) -> HandlerId {
        let id = next_handler_id();
        self.handlers.push((id, Box::new(f)));
        id
    }

    /// Removing an already-removed id is fine.
    pub fn remove(&mut self, id: HandlerId) {
        self.handlers.retain(|(h, _)| *h != id);
    }

    /// Queue a delivery for the end of the current tick.
    pub fn fire(&mut self, args: A) {
        if !self.handlers.is_empty() {
            self.queue.push(args);
        }
    }

    fn dispatch_queued(&mut self, server: &mut Server) {
        for args in std::mem::take(&mut self.queue) {
            for (id, f) in &mut self.handlers {
                if let Err(e) = f(server, &args) {
                    warn!(handler = *id, error = %e, "event hook failed");
                }
            }
        }
    }

    fn absorb(&mut self, mut newer: Self) {
        self.handlers.append(&mut newer.handlers);
        self.queue.append(&mut newer.queue);
    }
}

pub struct TryEvent<A, R> {
    handlers: Vec<(HandlerId, TryCallback<A, R>)>,
}

impl<A, R> Default for TryEvent<A, R> {
    fn default() -> Self {
        Self { handlers: Vec::new() }
    }
}

impl<A, R> TryEvent<A, R> {
    pub fn subscribe(
        &mut self,
        f: impl FnMut(&mut Server, &A) -> anyhow::Result<Option<Outcome<R>>> + 'static,
    ) -> HandlerId {
        let id = next_handler_id();
        self.handlers.push((id, Box::new(f)));
        id
    }

    pub fn remove(&mut self, id: HandlerId) {
        self.handlers.retain(|(h, _)| *h != id);
    }

    /// Ask subscribers in registration order; the first Some wins.
    pub fn check(&mut self, server: &mut Server, args: &A) -> Option<Outcome<R>> {
        for (id, f) in &mut self.handlers {
            match f(server, args) {
                Ok(Some(outcome)) => return Some(outcome),
                Ok(None) => {}
                Err(e) => warn!(handler = *id, error = %e, "overridable hook failed"),
            }
        }
        None
    }

    fn absorb(&mut self, mut newer: Self) {
        self.handlers.append(&mut newer.handlers);
    }
}

// ============================================================
// Event payloads
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct PlayerEvent {
    pub player: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct SpawnEvent {
    pub player: u8,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct HurtEvent {
    pub player: u8,
    pub damage: u8,
    pub damager: Option<u8>,
    pub cause: Kill,
}

#[derive(Debug, Clone, Copy)]
pub struct KillEvent {
    pub player: u8,
    pub cause: Kill,
    pub killer: Option<u8>,
    pub respawn_time: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockEvent {
    pub player: u8,
    pub action: BlockActionKind,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub player: u8,
    pub chat_type: Chat,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CollideEvent {
    pub entity: u8,
    pub player: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ExplodeEvent {
    pub player: u8,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct GameEndEvent {
    pub winner: Option<TeamId>,
}

// ============================================================
// The registry
// ============================================================

#[derive(Default)]
pub struct Hooks {
    pub on_player_connect: Event<PlayerEvent>,
    pub on_player_join: Event<PlayerEvent>,
    pub on_player_leave: Event<PlayerEvent>,
    pub on_player_spawn: Event<SpawnEvent>,
    pub on_player_hurt: Event<HurtEvent>,
    pub on_player_kill: Event<KillEvent>,
    pub on_build_block: Event<BlockEvent>,
    pub on_destroy_block: Event<BlockEvent>,
    pub on_chat_message: Event<ChatEvent>,
    pub on_use_command: Event<PlayerEvent>,
    pub on_entity_collide: Event<CollideEvent>,
    pub on_grenade_bounce: Event<ExplodeEvent>,
    pub on_explode: Event<ExplodeEvent>,
    pub on_game_end: Event<GameEndEvent>,

    pub try_player_spawn: TryEvent<SpawnEvent, (f32, f32, f32)>,
    pub try_player_hurt: TryEvent<HurtEvent, u8>,
    pub try_player_kill: TryEvent<KillEvent, f64>,
    pub try_build_block: TryEvent<BlockEvent, ()>,
    pub try_destroy_block: TryEvent<BlockEvent, ()>,
    pub try_chat_message: TryEvent<ChatEvent, String>,
}

impl Hooks {
    /// Deliver everything queued during this tick. `self` must already
    /// be detached from the server (the caller owns it).
    pub fn drain(&mut self, server: &mut Server) {
        self.on_player_connect.dispatch_queued(server);
        self.on_player_join.dispatch_queued(server);
        self.on_player_spawn.dispatch_queued(server);
        self.on_player_hurt.dispatch_queued(server);
        self.on_player_kill.dispatch_queued(server);
        self.on_build_block.dispatch_queued(server);
        self.on_destroy_block.dispatch_queued(server);
        self.on_chat_message.dispatch_queued(server);
        self.on_use_command.dispatch_queued(server);
        self.on_entity_collide.dispatch_queued(server);
        self.on_grenade_bounce.dispatch_queued(server);
        self.on_explode.dispatch_queued(server);
        self.on_game_end.dispatch_queued(server);
        self.on_player_leave.dispatch_queued(server);
    }

    /// Fold in registrations (and fires) that happened while this
    /// registry was detached from the server.
    pub fn absorb(&mut self, newer: Hooks) {
        self.on_player_connect.absorb(newer.on_player_connect);
        self.on_player_join.absorb(newer.on_player_join);
        self.on_player_leave.absorb(newer.on_player_leave);
        self.on_player_spawn.absorb(newer.on_player_spawn);
        self.on_player_hurt.absorb(newer.on_player_hurt);
        self.on_player_kill.absorb(newer.on_player_kill);
        self.on_build_block.absorb(newer.on_build_block);
        self.on_destroy_block.absorb(newer.on_destroy_block);
        self.on_chat_message.absorb(newer.on_chat_message);
        self.on_use_command.absorb(newer.on_use_command);
        self.on_entity_collide.absorb(newer.on_entity_collide);
        self.on_grenade_bounce.absorb(newer.on_grenade_bounce);
        self.on_explode.absorb(newer.on_explode);
        self.on_game_end.absorb(newer.on_game_end);
        self.try_player_spawn.absorb(newer.try_player_spawn);
        self.try_player_hurt.absorb(newer.try_player_hurt);
        self.try_player_kill.absorb(newer.try_player_kill);
        self.try_build_block.absorb(newer.try_build_block);
        self.try_destroy_block.absorb(newer.try_destroy_block);
        self.try_chat_message.absorb(newer.try_chat_message);
    }
}
