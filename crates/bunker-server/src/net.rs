// net.rs — reliable-UDP host
//
// One nonblocking socket serves every peer. Two frame shapes:
//
//   out-of-band:  [0xFFFFFFFF][cmd u8][args...]
//   connected:    [seq u32][rel_ack u32]
//                 [n_rel u8]{[rseq u32][len u16][bytes]}*
//                 [n_unseq u8]{[len u16][bytes]}*
//
// Reliable messages are numbered per peer and delivered in order on the
// far side; a sliding window with periodic retransmit keeps streaming
// (map transfer) fast without giving up ordering. Unsequenced payloads
// ride along in whatever datagram goes out next and are dropped when
// they arrive late — latest wins.
//
// Datagrams that match neither shape are probe traffic: "HELLO" earns a
// "HI", "HELLOLAN" a JSON server description.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use serde::Serialize;
use tracing::{debug, trace};

use bunker_common::bytes::{ByteReader, ByteWriter};
use bunker_common::constants::Disconnect;

const OOB_HEADER: u32 = 0xFFFF_FFFF;
const OOB_CONNECT: u8 = 1;
const OOB_ACCEPT: u8 = 2;
const OOB_DISCONNECT: u8 = 3;

const MAX_DATAGRAM: usize = 1400;
const RELIABLE_WINDOW: usize = 64;
const RELIABLE_RESEND: f64 = 0.2;
const CONNECT_RETRY: f64 = 0.25;
const CONNECT_TIMEOUT: f64 = 5.0;
const CONNECTION_TIMEOUT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Connect { peer: PeerId, version: u32 },
    Receive { peer: PeerId, data: Vec<u8> },
    Disconnect { peer: PeerId },
}

/// Reply body for the LAN discovery probe.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LanInfo {
    pub name: String,
    pub players_current: usize,
    pub players_max: usize,
    pub map: String,
    pub game_mode: String,
    pub game_version: u32,
}

struct Peer {
    addr: SocketAddr,
    /// Client side only: still waiting for the accept reply.
    pending_accept: bool,
    version: u32,
    created: f64,
    last_received: f64,
    last_sent: f64,
    last_resend: f64,

    outgoing_seq: u32,
    incoming_seq: u32,

    out_reliable: VecDeque<(u32, Vec<u8>)>,
    next_rel_seq: u32,
    unsent_from: u32,
    in_rel_expected: u32,
    in_rel_buffer: BTreeMap<u32, Vec<u8>>,
    unseq_out: Vec<Vec<u8>>,
}

impl Peer {
    fn new(addr: SocketAddr, now: f64, version: u32, pending_accept: bool) -> Self {
        Self {
            addr,
            pending_accept,
            version,
            created: now,
            last_received: now,
            last_sent: f64::MIN,
            last_resend: f64::MIN,
            outgoing_seq: 1,
            incoming_seq: 0,
            out_reliable: VecDeque::new(),
            next_rel_seq: 0,
            unsent_from: 0,
            in_rel_expected: 0,
            in_rel_buffer: BTreeMap::new(),
            unseq_out: Vec::new(),
        }
    }
}

pub struct Host {
    socket: UdpSocket,
    peers: Vec<Option<Peer>>,
    addr_index: HashMap<SocketAddr, usize>,
    events: VecDeque<NetEvent>,
    pub info: LanInfo,
}

impl Host {
    pub fn bind<A: ToSocketAddrs>(addr: A, max_peers: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            peers: (0..max_peers).map(|_| None).collect(),
            addr_index: HashMap::new(),
            events: VecDeque::new(),
            info: LanInfo::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_count(&self) -> usize {
        self.addr_index.len()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .map(|(i, _)| PeerId(i))
            .collect()
    }

    /// Client role: open a connection advertising `version`.
    pub fn connect(&mut self, addr: SocketAddr, version: u32, now: f64) -> io::Result<PeerId> {
        let slot = self
            .free_slot()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no free peer slot"))?;
        let peer = Peer::new(addr, now, version, true);
        self.addr_index.insert(addr, slot);
        self.peers[slot] = Some(peer);
        self.send_oob(addr, OOB_CONNECT, &version.to_le_bytes());
        Ok(PeerId(slot))
    }

    fn free_slot(&self) -> Option<usize> {
        self.peers.iter().position(|p| p.is_none())
    }

    /// Drain the socket and hand back one event at a time; call until
    /// None each tick.
    pub fn service(&mut self, now: f64) -> Option<NetEvent> {
        if let Some(ev) = self.events.pop_front() {
            return Some(ev);
        }
        let mut buf = [0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    self.handle_datagram(addr, &buf[..len], now);
                    if let Some(ev) = self.events.pop_front() {
                        return Some(ev);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(_) => return None,
            }
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, data: &[u8], now: f64) {
        // discovery probes arrive raw, without any framing
        if data == b"HELLO" {
            let _ = self.socket.send_to(b"HI", addr);
            return;
        }
        if data == b"HELLOLAN" {
            if let Ok(reply) = serde_json::to_vec(&self.info) {
                let _ = self.socket.send_to(&reply, addr);
            }
            return;
        }
        if data.len() < 4 {
            return;
        }

        let head = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if head == OOB_HEADER {
            self.handle_oob(addr, &data[4..], now);
        } else if let Some(&slot) = self.addr_index.get(&addr) {
            self.handle_connected(slot, data, now);
        } else {
            trace!(%addr, "dropping datagram from unknown address");
        }
    }

    fn handle_oob(&mut self, addr: SocketAddr, data: &[u8], now: f64) {
        let Some(&cmd) = data.first() else { return };
        match cmd {
            OOB_CONNECT => {
                if data.len() < 5 {
                    return;
                }
                let version = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
                if let Some(&slot) = self.addr_index.get(&addr) {
                    // retransmitted handshake; re-accept quietly
                    if self.peers[slot].is_some() {
                        self.send_oob(addr, OOB_ACCEPT, &[]);
                    }
                    return;
                }
                let Some(slot) = self.free_slot() else {
                    self.send_oob(addr, OOB_DISCONNECT, &[Disconnect::Full as u8]);
                    return;
                };
                self.addr_index.insert(addr, slot);
                self.peers[slot] = Some(Peer::new(addr, now, version, false));
                self.send_oob(addr, OOB_ACCEPT, &[]);
                debug!(%addr, slot, version, "peer connected");
                self.events.push_back(NetEvent::Connect { peer: PeerId(slot), version });
            }
            OOB_ACCEPT => {
                if let Some(&slot) = self.addr_index.get(&addr) {
                    if let Some(peer) = self.peers[slot].as_mut() {
                        if peer.pending_accept {
                            peer.pending_accept = false;
                            peer.last_received = now;
                            let version = peer.version;
                            self.events
                                .push_back(NetEvent::Connect { peer: PeerId(slot), version });
                        }
                    }
                }
            }
            OOB_DISCONNECT => {
                if let Some(&slot) = self.addr_index.get(&addr) {
                    self.drop_peer(slot);
                    self.events.push_back(NetEvent::Disconnect { peer: PeerId(slot) });
                }
            }
            _ => {}
        }
    }

    fn handle_connected(&mut self, slot: usize, data: &[u8], now: f64) {
        let Some(peer) = self.peers[slot].as_mut() else { return };
        let mut deliveries: Vec<Vec<u8>> = Vec::new();
        let mut r = ByteReader::new(data);
        let Ok(seq) = r.read_u32() else { return };
        let Ok(rel_ack) = r.read_u32() else { return };
        peer.last_received = now;

        // everything below rel_ack has arrived over there
        while peer.out_reliable.front().is_some_and(|(s, _)| *s < rel_ack) {
            peer.out_reliable.pop_front();
        }

        let Ok(n_rel) = r.read_u8() else { return };
        for _ in 0..n_rel {
            let Ok(rseq) = r.read_u32() else { return };
            let Ok(len) = r.read_u16() else { return };
            let Ok(bytes) = r.read_bytes(len as usize) else { return };
            if rseq == peer.in_rel_expected {
                peer.in_rel_expected += 1;
                deliveries.push(bytes.to_vec());
                // release anything this unblocked
                while let Some(next) = peer.in_rel_buffer.remove(&peer.in_rel_expected) {
                    peer.in_rel_expected += 1;
                    deliveries.push(next);
                }
            } else if rseq > peer.in_rel_expected
                && rseq - peer.in_rel_expected < RELIABLE_WINDOW as u32 * 4
            {
                peer.in_rel_buffer.insert(rseq, bytes.to_vec());
            }
            // stale retransmits fall through silently
        }

        let fresh = seq > peer.incoming_seq;
        if fresh {
            peer.incoming_seq = seq;
        }
        if let Ok(n_unseq) = r.read_u8() {
            for _ in 0..n_unseq {
                let Ok(len) = r.read_u16() else { break };
                let Ok(bytes) = r.read_bytes(len as usize) else { break };
                if fresh {
                    deliveries.push(bytes.to_vec());
                }
            }
        }

        self.events.extend(
            deliveries
                .into_iter()
                .map(|data| NetEvent::Receive { peer: PeerId(slot), data }),
        );
    }

    // ============================================================
    // Sending
    // ============================================================

    /// Queue a reliable message.
    pub fn send(&mut self, peer: PeerId, data: &[u8]) {
        if let Some(p) = self.peers.get_mut(peer.0).and_then(Option::as_mut) {
            let seq = p.next_rel_seq;
            p.next_rel_seq += 1;
            p.out_reliable.push_back((seq, data.to_vec()));
        }
    }

    pub fn send_unsequenced(&mut self, peer: PeerId, data: &[u8]) {
        if let Some(p) = self.peers.get_mut(peer.0).and_then(Option::as_mut) {
            p.unseq_out.push(data.to_vec());
        }
    }

    pub fn broadcast(&mut self, data: &[u8]) {
        for id in self.connected_ids() {
            self.send(id, data);
        }
    }

    pub fn broadcast_unsequenced(&mut self, data: &[u8]) {
        for id in self.connected_ids() {
            self.send_unsequenced(id, data);
        }
    }

    fn connected_ids(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.as_ref().is_some_and(|p| !p.pending_accept))
            .map(|(i, _)| PeerId(i))
            .collect()
    }

    /// Server-initiated disconnect; no event is raised for it.
    pub fn disconnect(&mut self, peer: PeerId, reason: Disconnect) {
        if let Some(p) = self.peers.get(peer.0).and_then(Option::as_ref) {
            let addr = p.addr;
            self.send_oob(addr, OOB_DISCONNECT, &[reason as u8]);
            self.drop_peer(peer.0);
        }
    }

    fn drop_peer(&mut self, slot: usize) {
        if let Some(p) = self.peers[slot].take() {
            self.addr_index.remove(&p.addr);
        }
    }

    fn send_oob(&self, addr: SocketAddr, cmd: u8, args: &[u8]) {
        let mut w = ByteWriter::new();
        w.write_u32(OOB_HEADER);
        w.write_u8(cmd);
        w.write_bytes(args);
        let _ = self.socket.send_to(w.as_slice(), addr);
    }

    /// Transmit pending traffic and sweep timeouts. Call once per tick.
    pub fn flush(&mut self, now: f64) {
        for slot in 0..self.peers.len() {
            let Some(peer) = self.peers[slot].as_mut() else { continue };

            if peer.pending_accept {
                if now - peer.created > CONNECT_TIMEOUT {
                    self.drop_peer(slot);
                    self.events.push_back(NetEvent::Disconnect { peer: PeerId(slot) });
                } else if now - peer.last_sent > CONNECT_RETRY {
                    peer.last_sent = now;
                    let (addr, version) = (peer.addr, peer.version);
                    self.send_oob(addr, OOB_CONNECT, &version.to_le_bytes());
                }
                continue;
            }

            if now - peer.last_received > CONNECTION_TIMEOUT {
                debug!(addr = %peer.addr, slot, "peer timed out");
                self.drop_peer(slot);
                self.events.push_back(NetEvent::Disconnect { peer: PeerId(slot) });
                continue;
            }

            self.transmit(slot, now);
        }
    }

    fn transmit(&mut self, slot: usize, now: f64) {
        let Some(peer) = self.peers[slot].as_mut() else { return };
        let addr = peer.addr;

        let resend = now - peer.last_resend >= RELIABLE_RESEND;
        if resend {
            peer.last_resend = now;
        }

        // everything in the window that is new (or due for retransmit)
        let mut blocks: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut max_sent = None;
        for (rseq, bytes) in peer.out_reliable.iter().take(RELIABLE_WINDOW) {
            if resend || *rseq >= peer.unsent_from {
                blocks.push((*rseq, bytes.clone()));
                max_sent = Some(*rseq);
            }
        }
        if let Some(m) = max_sent {
            peer.unsent_from = peer.unsent_from.max(m + 1);
        }
        let mut unseq = std::mem::take(&mut peer.unseq_out);
        let rel_ack = peer.in_rel_expected;

        // pack into as few datagrams as it takes; every flush sends at
        // least one so acks and keepalives keep moving
        let mut first = true;
        while first || !blocks.is_empty() || !unseq.is_empty() {
            first = false;
            let peer = self.peers[slot].as_mut().unwrap();
            let mut w = ByteWriter::new();
            w.write_u32(peer.outgoing_seq);
            peer.outgoing_seq += 1;
            w.write_u32(rel_ack);
            peer.last_sent = now;

            let mut n_rel = 0u8;
            let mut body = ByteWriter::new();
            while let Some((rseq, bytes)) = blocks.first() {
                let block_len = 6 + bytes.len();
                if n_rel > 0 && w.len() + body.len() + block_len > MAX_DATAGRAM {
                    break;
                }
                if n_rel == u8::MAX {
                    break;
                }
                body.write_u32(*rseq);
                body.write_u16(bytes.len() as u16);
                body.write_bytes(bytes);
                n_rel += 1;
                blocks.remove(0);
            }
            w.write_u8(n_rel);
            w.write_bytes(body.as_slice());

            let mut n_unseq = 0u8;
            let mut tail = ByteWriter::new();
            while let Some(bytes) = unseq.first() {
                let block_len = 2 + bytes.len();
                if (n_unseq > 0 || n_rel > 0) && w.len() + tail.len() + 1 + block_len > MAX_DATAGRAM
                {
                    break;
                }
                if n_unseq == u8::MAX {
                    break;
                }
                tail.write_u16(bytes.len() as u16);
                tail.write_bytes(bytes);
                n_unseq += 1;
                unseq.remove(0);
            }
            w.write_u8(n_unseq);
            w.write_bytes(tail.as_slice());

            let _ = self.socket.send_to(w.as_slice(), addr);
        }
    }
}
