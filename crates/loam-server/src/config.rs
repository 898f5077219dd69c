use std::error::Error;
use std::fs;
use std::path::Path;

use loam_geom::Vec3;
use loam_runtime::EmergeLimits;
use serde::{Deserialize, Serialize};

/// Server tunables. Distances are in blocks, times in seconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_sends_per_client")]
    pub max_simultaneous_block_sends_per_client: usize,
    #[serde(default = "default_sends_total")]
    pub max_simultaneous_block_sends_server_total: usize,
    #[serde(default = "default_generate_distance")]
    pub max_block_generate_distance: i32,
    #[serde(default = "default_send_distance")]
    pub max_block_send_distance: i32,
    #[serde(default = "default_optimize_distance")]
    pub block_send_optimize_distance: i32,
    #[serde(default = "default_building_time")]
    pub full_block_send_enable_min_time_from_building: f32,
    #[serde(default = "default_send_timeout")]
    pub block_send_timeout: f32,
    #[serde(default = "default_emerge_total")]
    pub emergequeue_limit_total: usize,
    #[serde(default)]
    pub emergequeue_limit_diskonly: Option<usize>,
    #[serde(default)]
    pub emergequeue_limit_generate: Option<usize>,
    #[serde(default = "default_emerge_threads")]
    pub num_emerge_threads: usize,
    #[serde(default = "default_notify_radius")]
    pub edit_notify_radius: f32,
    #[serde(default = "default_notify_radius_busy")]
    pub edit_notify_radius_busy: f32,
    #[serde(default = "default_step")]
    pub dedicated_server_step: f32,
    #[serde(default = "default_candidates_per_peer")]
    pub candidates_per_peer: usize,
    #[serde(default = "default_save_interval")]
    pub map_save_interval: f32,
    #[serde(default = "default_time_speed")]
    pub time_speed: f32,
    #[serde(default = "default_spawn")]
    pub spawn: [f32; 3],
}

fn default_sends_per_client() -> usize {
    4
}
fn default_sends_total() -> usize {
    20
}
fn default_generate_distance() -> i32 {
    7
}
fn default_send_distance() -> i32 {
    9
}
fn default_optimize_distance() -> i32 {
    4
}
fn default_building_time() -> f32 {
    2.0
}
fn default_send_timeout() -> f32 {
    10.0
}
fn default_emerge_total() -> usize {
    EmergeLimits::DEFAULT_TOTAL
}
fn default_emerge_threads() -> usize {
    1
}
fn default_notify_radius() -> f32 {
    loam_edit::DEFAULT_NOTIFY_RADIUS
}
fn default_notify_radius_busy() -> f32 {
    loam_edit::DEFAULT_BUSY_NOTIFY_RADIUS
}
fn default_step() -> f32 {
    0.1
}
fn default_candidates_per_peer() -> usize {
    32
}
fn default_save_interval() -> f32 {
    5.3
}
fn default_time_speed() -> f32 {
    72.0
}
fn default_spawn() -> [f32; 3] {
    [8.0, 24.0, 8.0]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_block_sends_per_client: default_sends_per_client(),
            max_simultaneous_block_sends_server_total: default_sends_total(),
            max_block_generate_distance: default_generate_distance(),
            max_block_send_distance: default_send_distance(),
            block_send_optimize_distance: default_optimize_distance(),
            full_block_send_enable_min_time_from_building: default_building_time(),
            block_send_timeout: default_send_timeout(),
            emergequeue_limit_total: default_emerge_total(),
            emergequeue_limit_diskonly: None,
            emergequeue_limit_generate: None,
            num_emerge_threads: default_emerge_threads(),
            edit_notify_radius: default_notify_radius(),
            edit_notify_radius_busy: default_notify_radius_busy(),
            dedicated_server_step: default_step(),
            candidates_per_peer: default_candidates_per_peer(),
            map_save_interval: default_save_interval(),
            time_speed: default_time_speed(),
            spawn: default_spawn(),
        }
    }
}

impl ServerConfig {
    pub fn emerge_limits(&self) -> EmergeLimits {
        let derived = EmergeLimits::for_workers(self.num_emerge_threads);
        EmergeLimits {
            total: self.emergequeue_limit_total,
            diskonly_per_peer: self
                .emergequeue_limit_diskonly
                .unwrap_or(derived.diskonly_per_peer),
            generate_per_peer: self
                .emergequeue_limit_generate
                .unwrap_or(derived.generate_per_peer),
        }
    }

    pub fn spawn_point(&self) -> Vec3 {
        Vec3::new(self.spawn[0], self.spawn[1], self.spawn[2])
    }
}

pub fn load_server_config_from_path(path: &Path) -> Result<ServerConfig, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    let cfg: ServerConfig = toml::from_str(&s)?;
    Ok(cfg)
}
