use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::HashSet;
use loam_client::{Client, ClientConfig, ClientStats};
use loam_geom::Vec3;
use loam_map::MemoryStore;
use loam_net::{LoopbackClient, LoopbackHub};
use loam_server::{Server, ServerStats};
use loam_world::content::CONTENT_STONE;
use loam_world::{BlockPos, Node, NodePos};

use crate::config::LoamConfig;

#[derive(Clone, Copy, Debug)]
pub struct SimOptions {
    pub clients: usize,
    pub ticks: u32,
    /// Sleep for the full server step between ticks instead of yielding.
    pub realtime: bool,
}

#[derive(Clone, Debug)]
pub struct ClientReport {
    pub name: String,
    pub blocks: usize,
    pub meshes: usize,
    pub stats: ClientStats,
}

#[derive(Clone, Debug)]
pub struct SimReport {
    pub ticks: u32,
    pub elapsed: Duration,
    pub server: ServerStats,
    pub server_blocks: usize,
    pub stored_blocks: usize,
    /// Distinct blocks held by at least one client.
    pub covered_blocks: usize,
    pub clients: Vec<ClientReport>,
}

/// Where player `i` stands at time `t`: circling spawn on its own orbit.
fn orbit(spawn: Vec3, i: usize, t: f32) -> (Vec3, Vec3, f32) {
    let radius = 12.0 + 10.0 * i as f32;
    let omega = 0.15;
    let phase = i as f32 * 2.1;
    let a = t * omega + phase;
    let pos = Vec3::new(
        spawn.x + radius * a.cos(),
        spawn.y,
        spawn.z + radius * a.sin(),
    );
    let speed = Vec3::new(-radius * omega * a.sin(), 0.0, radius * omega * a.cos());
    // Yaw that turns the camera toward the direction of travel.
    let yaw = (-speed.x).atan2(speed.z);
    (pos, speed, yaw)
}

/// Digs the node under the player's feet, or puts stone back if it is air.
fn toggle_floor(client: &mut Client<LoopbackClient>) {
    let feet = client.player().position;
    let below = NodePos::containing(feet - Vec3::new(0.0, 1.0, 0.0));
    let result = match client.map().get_node(below) {
        Some(n) if n.is_air() => client.place_node(below, Node::new(CONTENT_STONE)),
        Some(_) => client.dig_node(below),
        None => return,
    };
    if let Err(e) = result {
        log::debug!(target: "edits", "edit at {:?} skipped: {}", below, e);
    }
}

/// Runs one server and `opts.clients` loopback clients in this process.
pub fn run_simulation(cfg: &LoamConfig, opts: &SimOptions) -> Result<SimReport, Box<dyn Error>> {
    let started = Instant::now();
    let hub = LoopbackHub::new();
    let store = Arc::new(MemoryStore::new());
    let mut server = Server::new(
        cfg.server.clone(),
        &cfg.world,
        store.clone(),
        hub.server_endpoint(),
    )?;
    let queued = server.prepare_spawn_area(1);
    log::info!("queued {} spawn blocks", queued);

    let spawn = cfg.server.spawn_point();
    let mut clients = Vec::with_capacity(opts.clients);
    for i in 0..opts.clients {
        let client_cfg = ClientConfig {
            player_name: format!("{}{}", cfg.client.player_name, i),
            ..cfg.client.clone()
        };
        clients.push(Client::connect(client_cfg, hub.connect())?);
    }

    let dtime = cfg.server.dedicated_server_step.max(0.001);
    let mut t = 0.0f32;
    for tick in 0..opts.ticks {
        server.step(dtime)?;
        for (i, client) in clients.iter_mut().enumerate() {
            if client.is_ready() {
                let (pos, speed, yaw) = orbit(spawn, i, t);
                client.set_player(pos, speed, 0.0, yaw);
                if i == 0 && tick % 50 == 49 {
                    toggle_floor(client);
                }
            }
            client.step(dtime)?;
        }
        t += dtime;
        if tick % 100 == 99 {
            let s = server.stats();
            log::info!(
                "tick {}: {} blocks sent, {} generated, {} acks",
                tick + 1,
                s.blocks_sent,
                s.generated,
                s.acks
            );
        }
        if opts.realtime {
            thread::sleep(Duration::from_secs_f32(dtime));
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }

    let mut covered: HashSet<BlockPos> = HashSet::new();
    let mut reports = Vec::with_capacity(clients.len());
    for (i, client) in clients.iter_mut().enumerate() {
        covered.extend(client.map().positions());
        reports.push(ClientReport {
            name: format!("{}{}", cfg.client.player_name, i),
            blocks: client.map().len(),
            meshes: client.mesh_count(),
            stats: client.stats(),
        });
        client.shutdown();
    }
    server.shutdown()?;

    Ok(SimReport {
        ticks: opts.ticks,
        elapsed: started.elapsed(),
        server: server.stats(),
        server_blocks: server.map().len(),
        stored_blocks: store.len(),
        covered_blocks: covered.len(),
        clients: reports,
    })
}
