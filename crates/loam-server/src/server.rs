use std::sync::Arc;

use loam_edit::{EditAction, EditEventBus, MapEdit, PeerSnapshot};
use loam_map::{BlockStore, VoxelMap};
use loam_net::{
    Command, Direction, PROTOCOL_VERSION, PeerId, Transport, TransportEvent, decode, encode,
};
use loam_runtime::{EmergeOutcome, EmergeQueue, EmergeResult, EmergeWorkers};
use loam_world::{BlockGenerator, BlockPos, ContentTable, Node, NodePos, WorldConfig};

use crate::ServerError;
use crate::config::ServerConfig;
use crate::dispatcher::{DispatchStats, GlobalSendDispatcher};
use crate::peers::{ClientState, PeerRegistry, RemoteClient};
use crate::scheduler::{PlayerView, SendLimits};
use crate::sight::shell;

const TIME_OF_DAY_INTERVAL: f32 = 5.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub steps: u64,
    pub blocks_sent: u64,
    pub acks: u64,
    pub emerged: u64,
    pub generated: u64,
    pub emerge_failures: u64,
    pub edits: u64,
    pub direct_edits: u64,
    pub invalidations: u64,
    pub dropped_commands: u64,
    pub saved_blocks: u64,
}

/// Authoritative side of the world. Everything happens inside [`Server::step`]
/// except block loading, which runs on the emerge workers.
pub struct Server<T: Transport> {
    config: ServerConfig,
    seed: i32,
    map: Arc<VoxelMap>,
    store: Arc<dyn BlockStore>,
    emerge_queue: Arc<EmergeQueue>,
    emerge: EmergeWorkers,
    edits: EditEventBus,
    peers: PeerRegistry,
    dispatcher: GlobalSendDispatcher,
    content: ContentTable,
    transport: T,
    time_of_day: f32,
    time_of_day_timer: f32,
    save_timer: f32,
    stats: ServerStats,
    last_dispatch: DispatchStats,
}

impl<T: Transport> Server<T> {
    pub fn new(
        config: ServerConfig,
        world: &WorldConfig,
        store: Arc<dyn BlockStore>,
        transport: T,
    ) -> Result<Self, ServerError> {
        Self::with_generator(config, world.seed, store, world.build_generator(), transport)
    }

    pub fn with_generator(
        config: ServerConfig,
        seed: i32,
        store: Arc<dyn BlockStore>,
        generator: Arc<dyn BlockGenerator>,
        transport: T,
    ) -> Result<Self, ServerError> {
        let map = Arc::new(VoxelMap::new());
        let emerge_queue = Arc::new(EmergeQueue::new(config.emerge_limits()));
        let emerge = EmergeWorkers::new(
            config.num_emerge_threads,
            emerge_queue.clone(),
            map.clone(),
            store.clone(),
            generator,
        )?;
        let dispatcher = GlobalSendDispatcher::new(
            config.max_simultaneous_block_sends_server_total,
            SendLimits::from(&config),
            config.candidates_per_peer,
        );
        let edits = EditEventBus::new(config.edit_notify_radius, config.edit_notify_radius_busy);
        log::info!(
            "server up: seed {}, send distance {}, generate distance {}",
            seed,
            config.max_block_send_distance,
            config.max_block_generate_distance
        );
        Ok(Self {
            config,
            seed,
            map,
            store,
            emerge_queue,
            emerge,
            edits,
            peers: PeerRegistry::default(),
            dispatcher,
            content: ContentTable::builtin(),
            transport,
            time_of_day: 6000.0,
            time_of_day_timer: 0.0,
            save_timer: 0.0,
            stats: ServerStats::default(),
            last_dispatch: DispatchStats::default(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn map(&self) -> &Arc<VoxelMap> {
        &self.map
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn client(&self, peer: PeerId) -> Option<&RemoteClient> {
        self.peers.get(peer)
    }

    pub fn emerge_queue(&self) -> &Arc<EmergeQueue> {
        &self.emerge_queue
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn last_dispatch(&self) -> DispatchStats {
        self.last_dispatch
    }

    /// Queues loading of the blocks around spawn on the server's own behalf.
    /// Returns how many requests the emerge queue accepted.
    pub fn prepare_spawn_area(&self, radius: i32) -> usize {
        let center = BlockPos::containing(self.config.spawn_point());
        let mut accepted = 0;
        for d in 0..=radius.max(0) {
            for pos in shell(center, d) {
                if !self.map.is_usable(pos) && self.emerge_queue.push(pos, PeerId::SERVER, true) {
                    accepted += 1;
                }
            }
        }
        accepted
    }

    /// Changes a node on the server's own behalf and tells the peers.
    pub fn set_node(&mut self, pos: NodePos, node: Node) -> Result<(), ServerError> {
        self.map.set_node(pos, node)?;
        let edit = if node.is_air() {
            MapEdit::RemoveNode { pos }
        } else {
            MapEdit::SetNode { pos, node }
        };
        self.edits.on_edit(edit, None);
        self.stats.edits += 1;
        Ok(())
    }

    /// One server tick: network input, finished emerges, edit fan-out,
    /// block sending and housekeeping, in that order.
    pub fn step(&mut self, dtime: f32) -> Result<(), ServerError> {
        self.stats.steps += 1;
        while let Some(event) = self.transport.try_recv() {
            self.handle_event(event);
        }

        for result in self.emerge.drain_results() {
            self.handle_emerge_result(result)?;
        }

        for client in self.peers.iter_mut() {
            client.time_from_building += dtime;
            let expired = client
                .blocks
                .expire_sending(dtime, self.config.block_send_timeout);
            if !expired.is_empty() {
                log::debug!(
                    target: "net",
                    "{}: {} block transfers timed out",
                    client.id,
                    expired.len()
                );
                client.scheduler.reset();
            }
        }

        self.flush_edits();

        self.last_dispatch = self.dispatcher.dispatch(
            &mut self.peers,
            &self.map,
            &self.emerge_queue,
            &self.transport,
            dtime,
        );
        self.stats.blocks_sent += self.last_dispatch.sent as u64;

        self.advance_time_of_day(dtime);

        self.save_timer += dtime;
        if self.save_timer >= self.config.map_save_interval {
            self.save_timer = 0.0;
            self.save()?;
        }
        Ok(())
    }

    /// Writes modified blocks to the store.
    pub fn save(&mut self) -> Result<usize, ServerError> {
        let n = self.map.save_modified(self.store.as_ref())?;
        self.stats.saved_blocks += n as u64;
        Ok(n)
    }

    /// Saves the map and stops the emerge workers.
    pub fn shutdown(&mut self) -> Result<(), ServerError> {
        for id in self.peers.active_ids() {
            self.send(id, &Command::ChatMessage("server shutting down".to_string()));
        }
        self.emerge.shutdown();
        self.save()?;
        log::info!("server stopped after {} steps", self.stats.steps);
        Ok(())
    }

    fn send(&self, peer: PeerId, cmd: &Command) -> bool {
        let bytes = match encode(cmd) {
            Ok(b) => b,
            Err(e) => {
                log::warn!(target: "net", "encode {} for {}: {}", cmd.name(), peer, e);
                return false;
            }
        };
        match self.transport.send(peer, bytes) {
            Ok(()) => true,
            Err(e) => {
                log::debug!(target: "net", "send {} to {}: {}", cmd.name(), peer, e);
                false
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(peer) => {
                log::info!(target: "net", "peer {} connected", peer);
                self.peers.insert(peer);
            }
            TransportEvent::Disconnected(peer) => self.drop_peer(peer),
            TransportEvent::Data(peer, bytes) => match decode(&bytes) {
                Ok(cmd) => self.handle_command(peer, cmd),
                Err(e) => {
                    self.stats.dropped_commands += 1;
                    log::debug!(target: "net", "undecodable packet from {}: {}", peer, e);
                }
            },
        }
    }

    fn drop_peer(&mut self, peer: PeerId) {
        if let Some(client) = self.peers.remove(peer) {
            log::info!(
                target: "net",
                "peer {} ({}) left; {} blocks sent, {} excess acks",
                peer,
                client.name,
                client.blocks.sent_count(),
                client.blocks.excess_gotblocks()
            );
        }
        self.emerge_queue.forget_peer(peer);
    }

    fn handle_command(&mut self, peer: PeerId, cmd: Command) {
        if !cmd.accepted_by(Direction::ToServer) {
            self.stats.dropped_commands += 1;
            log::debug!(target: "net", "{} sent client-bound {}", peer, cmd.name());
            return;
        }
        let Some(state) = self.peers.get(peer).map(|c| c.state) else {
            self.stats.dropped_commands += 1;
            log::debug!(target: "net", "{} from unknown peer {}", cmd.name(), peer);
            return;
        };
        match (state, cmd) {
            (
                ClientState::Created,
                Command::Hello {
                    player_name,
                    protocol_version,
                },
            ) => self.handle_hello(peer, player_name, protocol_version),
            (ClientState::AwaitingInit2, Command::Init2) => self.handle_init2(peer),
            (ClientState::Active, Command::PlayerPos(report)) => {
                let view = PlayerView::from_report(&report);
                if let Some(client) = self.peers.get_mut(peer) {
                    match view {
                        Some(v) => client.view = Some(v),
                        None => log::debug!(target: "net", "{} sent a bad position", peer),
                    }
                }
            }
            (ClientState::Active, Command::GotBlocks(list)) => {
                self.stats.acks += list.len() as u64;
                if let Some(client) = self.peers.get_mut(peer) {
                    for pos in list {
                        client.blocks.got_block(pos);
                    }
                }
            }
            (ClientState::Active, Command::DeletedBlocks(list)) => {
                if let Some(client) = self.peers.get_mut(peer) {
                    client.set_blocks_not_sent(&list);
                }
            }
            (ClientState::Active, Command::PlaceNode { pos, node }) => {
                self.handle_player_edit(peer, MapEdit::SetNode { pos, node });
            }
            (ClientState::Active, Command::DigNode { pos }) => {
                self.handle_player_edit(peer, MapEdit::RemoveNode { pos });
            }
            (ClientState::Active, Command::ChatMessage(text)) => {
                let name = self
                    .peers
                    .get(peer)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                let line = Command::ChatMessage(format!("<{name}> {text}"));
                for id in self.peers.active_ids() {
                    self.send(id, &line);
                }
            }
            (_, Command::Opaque { opcode, bytes }) => {
                log::trace!(target: "net", "{}: opaque {} ({} bytes)", peer, opcode, bytes.len());
            }
            (state, cmd) => {
                self.stats.dropped_commands += 1;
                log::debug!(target: "net", "{} sent {} while {:?}", peer, cmd.name(), state);
            }
        }
    }

    fn handle_hello(&mut self, peer: PeerId, name: String, version: u16) {
        if version != PROTOCOL_VERSION {
            log::info!(
                target: "net",
                "refusing {} ({}): protocol {} != {}",
                peer,
                name,
                version,
                PROTOCOL_VERSION
            );
            self.send(
                peer,
                &Command::AccessDenied {
                    reason: format!("server speaks protocol {PROTOCOL_VERSION}"),
                },
            );
            self.transport.disconnect(peer);
            self.drop_peer(peer);
            return;
        }
        let init = Command::Init {
            protocol_version: PROTOCOL_VERSION,
            spawn: self.config.spawn_point(),
            seed: self.seed,
        };
        if self.send(peer, &init) {
            if let Some(client) = self.peers.get_mut(peer) {
                client.name = name;
                client.state = ClientState::AwaitingInit2;
            }
        }
    }

    fn handle_init2(&mut self, peer: PeerId) {
        self.send(peer, &Command::ContentDefs(self.content.defs()));
        self.send(peer, &self.time_of_day_command());
        if let Some(client) = self.peers.get_mut(peer) {
            client.state = ClientState::Active;
            log::info!(target: "net", "{} ({}) joined", peer, client.name);
        }
    }

    fn handle_player_edit(&mut self, peer: PeerId, edit: MapEdit) {
        if let MapEdit::SetNode { pos, .. } | MapEdit::RemoveNode { pos } = &edit {
            if pos.over_limit() {
                log::debug!(target: "edits", "{} edited {:?} outside the world", peer, pos);
                self.stats.dropped_commands += 1;
                return;
            }
        }
        let result = match &edit {
            MapEdit::SetNode { pos, node } => {
                if self.content.get(node.content).is_none() {
                    log::debug!(target: "edits", "{} placed unknown content {}", peer, node.content);
                    return;
                }
                self.map.set_node(*pos, *node)
            }
            MapEdit::RemoveNode { pos } => self.map.set_node(*pos, Node::AIR),
            MapEdit::BlockRegenerated(_) | MapEdit::Bulk(_) => return,
        };
        match result {
            Ok(()) => {
                if let Some(client) = self.peers.get_mut(peer) {
                    client.time_from_building = 0.0;
                }
                self.stats.edits += 1;
                self.edits.on_edit(edit, Some(peer));
            }
            Err(e) => {
                log::debug!(target: "edits", "{} edit rejected: {}", peer, e);
                // The client predicted the edit; make it fetch the truth.
                for block in edit.modified_blocks() {
                    if let Some(client) = self.peers.get_mut(peer) {
                        client.set_block_not_sent(block);
                    }
                }
            }
        }
    }

    fn handle_emerge_result(&mut self, result: EmergeResult) -> Result<(), ServerError> {
        let EmergeResult {
            pos,
            requesters,
            outcome,
        } = result;
        match &outcome {
            EmergeOutcome::Fatal(msg) => {
                log::error!("map store failure at {:?}: {}", pos, msg);
                for id in self.peers.active_ids() {
                    self.send(
                        id,
                        &Command::AccessDenied {
                            reason: "server map error".to_string(),
                        },
                    );
                }
                return Err(ServerError::Fatal(msg.clone()));
            }
            EmergeOutcome::Failed(msg) => {
                self.stats.emerge_failures += 1;
                log::warn!("emerge {:?} failed: {}", pos, msg);
            }
            _ => {}
        }
        if !outcome.is_loaded() {
            return Ok(());
        }
        self.stats.emerged += 1;
        if outcome == EmergeOutcome::Generated {
            self.stats.generated += 1;
        }

        for peer in &requesters {
            if let Some(client) = self.peers.get_mut(*peer) {
                client.set_block_not_sent(pos);
            }
        }
        let server_only = requesters.iter().all(|p| *p == PeerId::SERVER);
        if server_only && outcome == EmergeOutcome::Generated {
            self.edits.on_edit(MapEdit::BlockRegenerated(pos), None);
        }
        Ok(())
    }

    fn flush_edits(&mut self) {
        if self.edits.pending_len() == 0 {
            return;
        }
        let snapshots: Vec<PeerSnapshot> = self
            .peers
            .active_ids()
            .into_iter()
            .filter_map(|id| self.peers.get(id))
            .map(|c| PeerSnapshot {
                id: c.id,
                position: c.view.map(|v| v.position),
            })
            .collect();
        for action in self.edits.flush(&snapshots) {
            match action {
                EditAction::Notify { peer, command } => {
                    self.stats.direct_edits += 1;
                    self.send(peer, &command);
                }
                EditAction::Invalidate { peer, blocks } => {
                    self.stats.invalidations += 1;
                    if let Some(client) = self.peers.get_mut(peer) {
                        client.set_blocks_not_sent(&blocks);
                    }
                }
            }
        }
    }

    fn time_of_day_command(&self) -> Command {
        Command::TimeOfDay {
            time: self.time_of_day as u16,
            speed: self.config.time_speed,
        }
    }

    fn advance_time_of_day(&mut self, dtime: f32) {
        self.time_of_day =
            (self.time_of_day + dtime * self.config.time_speed * 24000.0 / 86400.0) % 24000.0;
        self.time_of_day_timer += dtime;
        if self.time_of_day_timer < TIME_OF_DAY_INTERVAL {
            return;
        }
        self.time_of_day_timer = 0.0;
        let cmd = self.time_of_day_command();
        for id in self.peers.active_ids() {
            self.send(id, &cmd);
        }
    }
}

impl<T: Transport> Drop for Server<T> {
    fn drop(&mut self) {
        self.emerge.shutdown();
    }
}
