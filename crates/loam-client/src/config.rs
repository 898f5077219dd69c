use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Mesh tasks held before the oldest non-urgent one is evicted.
    #[serde(default = "default_mesh_queue_limit")]
    pub mesh_queue_limit: usize,
    /// Blocks farther than this from the player (Chebyshev, in blocks) are
    /// dropped and reported to the server.
    #[serde(default = "default_unload_distance")]
    pub block_unload_distance: i32,
    #[serde(default = "default_playerpos_interval")]
    pub playerpos_send_interval: f32,
    /// Radius in blocks the client asks the server to fill.
    #[serde(default = "default_wanted_range")]
    pub wanted_range: i16,
    /// Vertical field of view of the camera.
    #[serde(default = "default_fov")]
    pub fov_degrees: f32,
}

fn default_player_name() -> String {
    "player".to_string()
}
fn default_mesh_queue_limit() -> usize {
    512
}
fn default_unload_distance() -> i32 {
    12
}
fn default_playerpos_interval() -> f32 {
    0.1
}
fn default_wanted_range() -> i16 {
    9
}
fn default_fov() -> f32 {
    72.0
}

/// Width over height of the view the fov applies to.
const VIEW_ASPECT: f32 = 4.0 / 3.0;

impl ClientConfig {
    /// Widest angle of the view in radians; this is what the server's
    /// sight test needs.
    pub fn horizontal_fov(&self) -> f32 {
        self.fov_degrees.to_radians() * VIEW_ASPECT
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: default_player_name(),
            mesh_queue_limit: default_mesh_queue_limit(),
            block_unload_distance: default_unload_distance(),
            playerpos_send_interval: default_playerpos_interval(),
            wanted_range: default_wanted_range(),
            fov_degrees: default_fov(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: ClientConfig = toml::from_str("player_name = \"ada\"\n").unwrap();
        assert_eq!(cfg.player_name, "ada");
        assert_eq!(cfg.mesh_queue_limit, 512);
        assert_eq!(cfg.block_unload_distance, 12);
    }

    #[test]
    fn horizontal_fov_widens_the_vertical_one() {
        let cfg = ClientConfig::default();
        let expected = 96.0f32.to_radians();
        assert!((cfg.horizontal_fov() - expected).abs() < 1e-5);
    }
}
