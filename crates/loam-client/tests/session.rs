use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loam_client::{Client, ClientConfig};
use loam_geom::Vec3;
use loam_map::MemoryStore;
use loam_net::{LoopbackClient, LoopbackHub, LoopbackServer};
use loam_server::{BlockSendState, Server, ServerConfig};
use loam_world::{BlockPos, FlatGenerator, Node, NodePos};

const ORIGIN: BlockPos = BlockPos::new(0, 0, 0);

struct World {
    hub: LoopbackHub,
    server: Server<LoopbackServer>,
    clients: Vec<Client<LoopbackClient>>,
}

impl World {
    fn new() -> Self {
        let hub = LoopbackHub::new();
        let server = Server::with_generator(
            ServerConfig::default(),
            11,
            Arc::new(MemoryStore::new()),
            Arc::new(FlatGenerator::new(8)),
            hub.server_endpoint(),
        )
        .unwrap();
        Self {
            hub,
            server,
            clients: Vec::new(),
        }
    }

    fn join(&mut self, name: &str, position: Vec3) -> usize {
        let cfg = ClientConfig {
            player_name: name.to_string(),
            wanted_range: 3,
            ..ClientConfig::default()
        };
        let mut client = Client::connect(cfg, self.hub.connect()).unwrap();
        client.set_player(position, Vec3::ZERO, 0.0, 0.0);
        self.clients.push(client);
        self.clients.len() - 1
    }

    fn tick(&mut self) {
        self.server.step(0.05).unwrap();
        for c in &mut self.clients {
            c.step(0.05).unwrap();
        }
    }

    fn run_until(&mut self, mut done: impl FnMut(&World) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            self.tick();
            if done(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

fn origin_sent(world: &World, client: usize) -> bool {
    let peer = loam_net::PeerId(client as u32 + 1);
    world
        .server
        .client(peer)
        .and_then(|c| c.blocks.state(ORIGIN))
        == Some(BlockSendState::Sent)
}

#[test]
fn client_meshes_and_acknowledges_blocks() {
    let mut world = World::new();
    let a = world.join("a", Vec3::new(8.0, 10.0, 8.0));
    assert!(world.run_until(|w| origin_sent(w, a)));
    let client = &world.clients[a];
    assert!(client.map().is_usable(ORIGIN));
    assert!(client.stats().acks_sent > 0);
    assert!(world.run_until(|w| w.clients[a].mesh(ORIGIN).is_some()));
}

#[test]
fn local_dig_reaches_the_server_and_other_clients() {
    let mut world = World::new();
    let a = world.join("a", Vec3::new(8.0, 10.0, 8.0));
    let b = world.join("b", Vec3::new(10.0, 10.0, 10.0));
    assert!(world.run_until(|w| origin_sent(w, a) && origin_sent(w, b)));

    let target = NodePos::new(5, 2, 5);
    assert!(
        world.clients[a]
            .map()
            .get_node(target)
            .is_some_and(|n| !n.is_air())
    );
    world.clients[a].dig_node(target).unwrap();
    assert_eq!(world.clients[a].map().get_node(target), Some(Node::AIR));

    assert!(world.run_until(|w| {
        w.server.map().get_node(target) == Some(Node::AIR)
            && w.clients[b].map().get_node(target) == Some(Node::AIR)
    }));
}

#[test]
fn walking_away_unloads_and_reports_blocks() {
    let mut world = World::new();
    let a = world.join("a", Vec3::new(8.0, 10.0, 8.0));
    assert!(world.run_until(|w| origin_sent(w, a)));

    world.clients[a].set_player(Vec3::new(16.0 * 40.0, 10.0, 8.0), Vec3::ZERO, 0.0, 0.0);
    assert!(world.run_until(|w| !w.clients[a].map().contains(ORIGIN) && !origin_sent(w, a)));
    assert!(world.clients[a].stats().unloaded > 0);
}

#[test]
fn chat_is_relayed_with_the_sender_name() {
    let mut world = World::new();
    let a = world.join("ada", Vec3::new(8.0, 10.0, 8.0));
    let b = world.join("bo", Vec3::new(8.0, 10.0, 8.0));
    assert!(world.run_until(|w| w.clients.iter().all(|c| c.is_ready())));
    world.clients[a].say("hi").unwrap();
    assert!(world.run_until(|w| w.clients[b].chat().iter().any(|l| l == "<ada> hi")));
}
