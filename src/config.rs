use std::error::Error;
use std::fs;
use std::path::Path;

use loam_client::ClientConfig;
use loam_server::ServerConfig;
use loam_world::WorldConfig;
use serde::{Deserialize, Serialize};

/// Whole-program configuration; each section falls back to its defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoamConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub world: WorldConfig,
}

impl LoamConfig {
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

pub fn load_config_from_path(path: &Path) -> Result<LoamConfig, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    let cfg: LoamConfig = toml::from_str(&s).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_optional() {
        let cfg: LoamConfig = toml::from_str("[server]\nmax_block_send_distance = 5\n").unwrap();
        assert_eq!(cfg.server.max_block_send_distance, 5);
        assert_eq!(cfg.client.mesh_queue_limit, 512);
        assert_eq!(cfg.world.seed, WorldConfig::default().seed);
    }

    #[test]
    fn defaults_survive_a_toml_round_trip() {
        let text = LoamConfig::default().to_toml().unwrap();
        let back: LoamConfig = toml::from_str(&text).unwrap();
        assert_eq!(
            back.server.max_simultaneous_block_sends_server_total,
            ServerConfig::default().max_simultaneous_block_sends_server_total
        );
        assert_eq!(back.client.player_name, "player");
    }
}
