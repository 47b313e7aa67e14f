use crate::config::{ChunkSysConfig, RenderConfig, WorldGenConfig};
use crate::world::column::{VoxelColumn, MAX_Z_SIZE};
use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub log_level: String,
    pub chunks: ChunkSysConfig,
    pub render: RenderConfig,
    pub worldgen: WorldGenConfig,
}

impl EngineConfig {
    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    /// Reads the config at `path`, writing the defaults there first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        if !path.exists() {
            let default_config = EngineConfig {
                log_level: "info".to_string(),
                ..Default::default()
            };
            let toml_content = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, toml_content).context("Failed to write default config")?;
            return Ok(default_config);
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: EngineConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let chunks = &self.chunks;
        ensure!(
            VoxelColumn::valid_height(chunks.z_size),
            "z_size must be a positive multiple of 16 no larger than {}, got {}",
            MAX_Z_SIZE,
            chunks.z_size
        );
        ensure!(chunks.world_radius > 0, "world_radius must be positive");
        ensure!(chunks.view_radius >= 0, "view_radius must not be negative");
        ensure!(
            chunks.max_outstanding_requests > 0,
            "max_outstanding_requests must be at least 1"
        );
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "voxstream", "voxstream")
        .context("Couldn't determine project directory")?;
    Ok(proj_dirs.config_dir().join("engine.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");

        let created = EngineConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.chunks.max_outstanding_requests, 3);

        std::fs::write(&path, "log_level = \"debug\"\n[chunks]\nview_radius = 4\n").unwrap();
        let loaded = EngineConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded.chunks.view_radius, 4);
        assert_eq!(loaded.chunks.z_size, 256);
        assert_eq!(loaded.render.lod_distance_sq, 9216.0);
        assert_eq!(loaded.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_rejects_ragged_column_height() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[chunks]\nz_size = 100\n").unwrap();
        let err = EngineConfig::load_or_create(&path).unwrap_err();
        assert!(err.to_string().contains("z_size"));

        std::fs::write(&path, "[chunks]\nz_size = 65536\n").unwrap();
        assert!(EngineConfig::load_or_create(&path).is_err());
        std::fs::write(&path, "[chunks]\nz_size = 65520\n").unwrap();
        assert!(EngineConfig::load_or_create(&path).is_ok());
    }
}
