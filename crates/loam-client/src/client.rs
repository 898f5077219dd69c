use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use loam_geom::Vec3;
use loam_map::{BlockPayload, GenState, MapError, VoxelMap};
use loam_mesh_cpu::{BlockMesh, MeshInput};
use loam_net::{
    Command, Direction, PROTOCOL_VERSION, PeerId, PlayerPos, Transport, TransportEvent, decode,
    encode,
};
use loam_runtime::{MeshBuildQueue, MeshWorker};
use loam_world::{BlockPos, ContentTable, Node, NodePos, affected_blocks};

use crate::ClientError;
use crate::config::ClientConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    /// Hello sent, waiting for Init.
    AwaitingInit,
    /// Init2 sent, waiting for content definitions.
    AwaitingContent,
    Ready,
    Denied(String),
    Disconnected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub blocks_received: u64,
    pub bad_blocks: u64,
    pub meshes_built: u64,
    pub acks_sent: u64,
    pub evictions: u64,
    pub unloaded: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalPlayer {
    pub position: Vec3,
    pub speed: Vec3,
    pub pitch: f32,
    pub yaw: f32,
}

/// Receiving side of the world: keeps a local map, meshes what arrives and
/// acknowledges blocks once their mesh exists.
pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: T,
    phase: ClientPhase,
    map: Arc<VoxelMap>,
    mesh_queue: Arc<MeshBuildQueue>,
    mesh_worker: Option<MeshWorker>,
    content: Option<Arc<ContentTable>>,
    meshes: HashMap<BlockPos, BlockMesh>,
    deferred: VecDeque<BlockPos>,
    deferred_set: HashSet<BlockPos>,
    pending_acks: Vec<BlockPos>,
    player: LocalPlayer,
    playerpos_timer: f32,
    seed: Option<i32>,
    time_of_day: Option<(u16, f32)>,
    chat: Vec<String>,
    stats: ClientStats,
}

impl<T: Transport> Client<T> {
    /// Sends Hello and returns a client waiting for the server's Init.
    pub fn connect(config: ClientConfig, transport: T) -> Result<Self, ClientError> {
        let hello = Command::Hello {
            player_name: config.player_name.clone(),
            protocol_version: PROTOCOL_VERSION,
        };
        transport.send(PeerId::SERVER, encode(&hello)?)?;
        let mesh_queue = Arc::new(MeshBuildQueue::new(config.mesh_queue_limit));
        Ok(Self {
            config,
            transport,
            phase: ClientPhase::AwaitingInit,
            map: Arc::new(VoxelMap::new()),
            mesh_queue,
            mesh_worker: None,
            content: None,
            meshes: HashMap::new(),
            deferred: VecDeque::new(),
            deferred_set: HashSet::new(),
            pending_acks: Vec::new(),
            player: LocalPlayer {
                position: Vec3::ZERO,
                speed: Vec3::ZERO,
                pitch: 0.0,
                yaw: 0.0,
            },
            playerpos_timer: 0.0,
            seed: None,
            time_of_day: None,
            chat: Vec::new(),
            stats: ClientStats::default(),
        })
    }

    pub fn phase(&self) -> &ClientPhase {
        &self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ClientPhase::Ready
    }

    pub fn map(&self) -> &Arc<VoxelMap> {
        &self.map
    }

    pub fn mesh(&self, pos: BlockPos) -> Option<&BlockMesh> {
        self.meshes.get(&pos)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh_queue(&self) -> &Arc<MeshBuildQueue> {
        &self.mesh_queue
    }

    pub fn player(&self) -> LocalPlayer {
        self.player
    }

    pub fn seed(&self) -> Option<i32> {
        self.seed
    }

    pub fn time_of_day(&self) -> Option<(u16, f32)> {
        self.time_of_day
    }

    pub fn chat(&self) -> &[String] {
        &self.chat
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn set_player(&mut self, position: Vec3, speed: Vec3, pitch: f32, yaw: f32) {
        self.player = LocalPlayer {
            position,
            speed,
            pitch,
            yaw,
        };
    }

    /// Places a node locally and asks the server to do the same.
    pub fn place_node(&mut self, pos: NodePos, node: Node) -> Result<(), ClientError> {
        self.local_edit(pos, node)?;
        self.send(&Command::PlaceNode { pos, node })
    }

    pub fn dig_node(&mut self, pos: NodePos) -> Result<(), ClientError> {
        self.local_edit(pos, Node::AIR)?;
        self.send(&Command::DigNode { pos })
    }

    pub fn say(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(&Command::ChatMessage(text.to_string()))
    }

    /// One client tick: network input, mesh results, acknowledgements,
    /// position report and unloading.
    pub fn step(&mut self, dtime: f32) -> Result<(), ClientError> {
        while let Some(event) = self.transport.try_recv() {
            match event {
                TransportEvent::Data(_, bytes) => match decode(&bytes) {
                    Ok(cmd) => self.handle_command(cmd)?,
                    Err(e) => log::debug!(target: "net", "undecodable packet: {}", e),
                },
                TransportEvent::Disconnected(_) => {
                    if !matches!(self.phase, ClientPhase::Denied(_)) {
                        self.phase = ClientPhase::Disconnected;
                    }
                    return Err(ClientError::Disconnected);
                }
                TransportEvent::Connected(_) => {}
            }
        }

        self.requeue_deferred();
        self.collect_meshes();

        if !self.pending_acks.is_empty() {
            let acks = std::mem::take(&mut self.pending_acks);
            self.stats.acks_sent += acks.len() as u64;
            self.send(&Command::GotBlocks(acks))?;
        }

        if self.is_ready() {
            self.playerpos_timer += dtime;
            if self.playerpos_timer >= self.config.playerpos_send_interval {
                self.playerpos_timer = 0.0;
                self.send(&Command::PlayerPos(self.player_report()))?;
            }
            self.unload_far_blocks()?;
        }
        Ok(())
    }

    /// Stops the mesh worker.
    pub fn shutdown(&mut self) {
        self.mesh_worker = None;
    }

    fn send(&self, cmd: &Command) -> Result<(), ClientError> {
        self.transport.send(PeerId::SERVER, encode(cmd)?)?;
        Ok(())
    }

    fn player_report(&self) -> PlayerPos {
        PlayerPos {
            position: self.player.position,
            speed: self.player.speed,
            pitch: self.player.pitch,
            yaw: self.player.yaw,
            fov: self.config.horizontal_fov(),
            wanted_range: self.config.wanted_range,
        }
    }

    fn handle_command(&mut self, cmd: Command) -> Result<(), ClientError> {
        if !cmd.accepted_by(Direction::ToClient) {
            log::debug!(target: "net", "server sent server-bound {}", cmd.name());
            return Ok(());
        }
        match cmd {
            Command::Init {
                protocol_version,
                spawn,
                seed,
            } => {
                if self.phase != ClientPhase::AwaitingInit {
                    return Ok(());
                }
                if protocol_version != PROTOCOL_VERSION {
                    return Err(ClientError::ProtocolMismatch(protocol_version));
                }
                self.seed = Some(seed);
                self.player.position = spawn;
                self.phase = ClientPhase::AwaitingContent;
                self.send(&Command::Init2)?;
            }
            Command::AccessDenied { reason } => {
                log::warn!(target: "net", "access denied: {}", reason);
                self.phase = ClientPhase::Denied(reason.clone());
                return Err(ClientError::AccessDenied(reason));
            }
            Command::ContentDefs(defs) => {
                let content = Arc::new(ContentTable::from_defs(defs));
                if self.mesh_worker.is_none() {
                    self.mesh_worker = Some(MeshWorker::spawn(
                        self.mesh_queue.clone(),
                        content.clone(),
                    )?);
                }
                log::info!(target: "net", "received {} content definitions", content.len());
                self.content = Some(content);
                self.phase = ClientPhase::Ready;
            }
            Command::BlockData { pos, payload } => self.receive_block(pos, &payload),
            Command::AddNode { pos, node } => self.apply_remote_edit(pos, node),
            Command::RemoveNode { pos } => self.apply_remote_edit(pos, Node::AIR),
            Command::TimeOfDay { time, speed } => self.time_of_day = Some((time, speed)),
            Command::ChatMessage(line) => {
                log::info!("chat: {}", line);
                self.chat.push(line);
            }
            other => log::debug!(target: "net", "ignoring {}", other.name()),
        }
        Ok(())
    }

    fn receive_block(&mut self, pos: BlockPos, payload: &[u8]) {
        if pos.over_limit() {
            self.stats.bad_blocks += 1;
            log::warn!(target: "net", "block {:?} is outside the world", pos);
            return;
        }
        let block = match BlockPayload::decode(payload) {
            Ok(p) => p.into_block(pos, GenState::Generated),
            Err(e) => {
                self.stats.bad_blocks += 1;
                log::warn!(target: "net", "block {:?}: {}", pos, e);
                return;
            }
        };
        self.stats.blocks_received += 1;
        self.map.insert(block);
        self.enqueue_mesh(pos, true, false);
        for neighbor in pos.face_neighbors() {
            if self.map.is_usable(neighbor) {
                self.enqueue_mesh(neighbor, false, false);
            }
        }
    }

    fn apply_remote_edit(&mut self, pos: NodePos, node: Node) {
        if pos.over_limit() {
            log::debug!(target: "net", "edit at {:?} is outside the world", pos);
            return;
        }
        match self.map.set_node(pos, node) {
            Ok(()) => self.remesh_urgent(pos),
            Err(MapError::NotLoaded(_)) => {}
            Err(e) => log::debug!(target: "edits", "edit at {:?}: {}", pos, e),
        }
    }

    fn local_edit(&mut self, pos: NodePos, node: Node) -> Result<(), ClientError> {
        if !self.is_ready() {
            return Err(ClientError::NotReady);
        }
        self.map.set_node(pos, node)?;
        self.remesh_urgent(pos);
        Ok(())
    }

    fn remesh_urgent(&mut self, pos: NodePos) {
        for block in affected_blocks(pos) {
            if self.map.is_usable(block) {
                self.enqueue_mesh(block, false, true);
            }
        }
    }

    fn enqueue_mesh(&mut self, pos: BlockPos, ack: bool, urgent: bool) {
        let Some(input) = MeshInput::gather(&self.map, pos) else {
            if ack {
                self.pending_acks.push(pos);
            }
            return;
        };
        if let Some(evicted) = self.mesh_queue.enqueue(input, ack, urgent) {
            self.stats.evictions += 1;
            if evicted.ack {
                self.pending_acks.push(evicted.pos);
            }
            if self.deferred_set.insert(evicted.pos) {
                self.deferred.push_back(evicted.pos);
            }
        }
    }

    /// Gives evicted blocks another turn once the queue has room.
    fn requeue_deferred(&mut self) {
        while self.mesh_queue.len() < self.mesh_queue.capacity() {
            let Some(pos) = self.deferred.pop_front() else {
                break;
            };
            self.deferred_set.remove(&pos);
            if self.map.is_usable(pos) {
                self.enqueue_mesh(pos, false, false);
            }
        }
    }

    fn collect_meshes(&mut self) {
        let Some(worker) = &self.mesh_worker else {
            return;
        };
        for result in worker.drain_results() {
            if result.ack {
                self.pending_acks.push(result.pos);
            }
            if !self.map.contains(result.pos) {
                continue;
            }
            self.stats.meshes_built += 1;
            match result.mesh {
                Some(mesh) => {
                    self.meshes.insert(result.pos, mesh);
                }
                None => {
                    self.meshes.remove(&result.pos);
                }
            }
        }
    }

    fn unload_far_blocks(&mut self) -> Result<(), ClientError> {
        let center = BlockPos::containing(self.player.position);
        let limit = self.config.block_unload_distance;
        let removed = self
            .map
            .remove_where(|b| b.pos.shell_distance(center) > limit);
        if removed.is_empty() {
            return Ok(());
        }
        for pos in &removed {
            self.meshes.remove(pos);
        }
        self.stats.unloaded += removed.len() as u64;
        log::debug!(target: "net", "unloaded {} blocks", removed.len());
        self.send(&Command::DeletedBlocks(removed))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, PoisonError};

    use loam_map::MapBlock;
    use loam_net::TransportError;
    use loam_world::BLOCK_VOLUME;

    use super::*;

    #[derive(Default)]
    struct ScriptedTransport {
        inbox: Mutex<VecDeque<TransportEvent>>,
        sent: Mutex<Vec<Command>>,
    }

    impl ScriptedTransport {
        fn push(&self, cmd: Command) {
            let bytes = encode(&cmd).unwrap();
            self.inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(TransportEvent::Data(PeerId::SERVER, bytes));
        }

        fn take_sent(&self) -> Vec<Command> {
            std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
        }
    }

    impl Transport for &ScriptedTransport {
        fn send(&self, _peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(decode(&bytes).unwrap());
            Ok(())
        }

        fn try_recv(&self) -> Option<TransportEvent> {
            self.inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
        }

        fn disconnect(&self, _peer: PeerId) {}
    }

    fn block_data(pos: BlockPos) -> Command {
        let mut nodes = vec![Node::AIR; BLOCK_VOLUME];
        nodes[0] = Node::new(1);
        let block = MapBlock::from_nodes(pos, nodes, GenState::Generated);
        Command::BlockData {
            pos,
            payload: block.encode().unwrap(),
        }
    }

    fn init() -> Command {
        Command::Init {
            protocol_version: PROTOCOL_VERSION,
            spawn: Vec3::new(8.0, 20.0, 8.0),
            seed: 3,
        }
    }

    #[test]
    fn handshake_sends_init2_and_becomes_ready() {
        let t = ScriptedTransport::default();
        let mut client = Client::connect(ClientConfig::default(), &t).unwrap();
        assert!(matches!(t.take_sent()[0], Command::Hello { .. }));

        t.push(init());
        client.step(0.0).unwrap();
        assert_eq!(client.phase(), &ClientPhase::AwaitingContent);
        assert_eq!(client.seed(), Some(3));
        assert_eq!(t.take_sent(), vec![Command::Init2]);

        t.push(Command::ContentDefs(ContentTable::builtin().defs()));
        client.step(0.0).unwrap();
        assert!(client.is_ready());
        assert_eq!(client.player().position, Vec3::new(8.0, 20.0, 8.0));
    }

    #[test]
    fn access_denied_is_an_error() {
        let t = ScriptedTransport::default();
        let mut client = Client::connect(ClientConfig::default(), &t).unwrap();
        t.push(Command::AccessDenied {
            reason: "full".to_string(),
        });
        assert!(matches!(client.step(0.0), Err(ClientError::AccessDenied(r)) if r == "full"));
        assert_eq!(client.phase(), &ClientPhase::Denied("full".to_string()));
    }

    #[test]
    fn evicted_block_is_acked_and_deferred() {
        let t = ScriptedTransport::default();
        let cfg = ClientConfig {
            mesh_queue_limit: 1,
            ..ClientConfig::default()
        };
        // No content definitions, so no worker drains the queue.
        let mut client = Client::connect(cfg, &t).unwrap();
        t.take_sent();
        let a = BlockPos::new(0, 0, 0);
        let b = BlockPos::new(5, 0, 0);
        t.push(block_data(a));
        t.push(block_data(b));
        client.step(0.0).unwrap();

        assert_eq!(client.stats().evictions, 1);
        assert!(client.mesh_queue().contains(b));
        assert!(t.take_sent().contains(&Command::GotBlocks(vec![a])));
        assert_eq!(client.deferred.front(), Some(&a));
    }

    #[test]
    fn local_edit_needs_a_finished_handshake() {
        let t = ScriptedTransport::default();
        let mut client = Client::connect(ClientConfig::default(), &t).unwrap();
        assert!(matches!(
            client.dig_node(NodePos::new(0, 0, 0)),
            Err(ClientError::NotReady)
        ));
    }

    #[test]
    fn remote_edit_on_unknown_block_is_ignored() {
        let t = ScriptedTransport::default();
        let mut client = Client::connect(ClientConfig::default(), &t).unwrap();
        t.push(Command::RemoveNode {
            pos: NodePos::new(100, 100, 100),
        });
        client.step(0.0).unwrap();
        assert!(client.map().is_empty());
    }

    #[test]
    fn positions_outside_the_world_are_dropped() {
        let t = ScriptedTransport::default();
        let mut client = Client::connect(ClientConfig::default(), &t).unwrap();
        t.push(block_data(BlockPos::new(i32::MAX, 0, 0)));
        t.push(Command::AddNode {
            pos: NodePos::new(i32::MAX, i32::MIN, 0),
            node: Node::new(1),
        });
        t.push(Command::RemoveNode {
            pos: NodePos::new(0, 0, i32::MAX),
        });
        t.push(block_data(BlockPos::new(1, 0, 0)));
        client.step(0.0).unwrap();
        assert_eq!(client.stats().bad_blocks, 1);
        assert_eq!(client.stats().blocks_received, 1);
        assert_eq!(client.map().positions(), vec![BlockPos::new(1, 0, 0)]);
    }

    #[test]
    fn position_report_carries_the_widest_fov() {
        let t = ScriptedTransport::default();
        let mut client = Client::connect(ClientConfig::default(), &t).unwrap();
        t.push(init());
        t.push(Command::ContentDefs(ContentTable::builtin().defs()));
        client.step(1.0).unwrap();
        let fov = t.take_sent().into_iter().find_map(|c| match c {
            Command::PlayerPos(p) => Some(p.fov),
            _ => None,
        });
        assert_eq!(fov, Some(ClientConfig::default().horizontal_fov()));
    }

    #[test]
    fn far_blocks_are_unloaded_and_reported() {
        let t = ScriptedTransport::default();
        let mut client = Client::connect(ClientConfig::default(), &t).unwrap();
        t.push(init());
        t.push(Command::ContentDefs(ContentTable::builtin().defs()));
        let far = BlockPos::new(40, 0, 0);
        t.push(block_data(far));
        client.step(0.0).unwrap();
        let sent = t.take_sent();
        assert!(sent.contains(&Command::DeletedBlocks(vec![far])));
        assert!(!client.map().contains(far));
    }
}
