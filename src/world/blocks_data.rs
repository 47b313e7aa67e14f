// blocks_data.rs - Block registry and the built-in block set

use crate::world::block_flags::BlockFlags;
use crate::world::block_id::BlockId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate block ID: {0}")]
    DuplicateId(BlockId),
    #[error("Duplicate block name: {0}")]
    DuplicateName(String),
    #[error("Light value {0} exceeds 15")]
    LightOutOfRange(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockProperties {
    pub name: String,
    pub flags: BlockFlags,
    /// How much sunlight/block light is lost passing through this block.
    pub light_attenuation: u8,
    pub light_emission: u8,
}

impl BlockProperties {
    pub fn new(name: &str, flags: BlockFlags) -> Self {
        let light_attenuation = if flags.is_opaque() { 15 } else { 0 };
        Self {
            name: name.to_string(),
            flags,
            light_attenuation,
            light_emission: 0,
        }
    }

    pub fn with_attenuation(mut self, attenuation: u8) -> Self {
        self.light_attenuation = attenuation;
        self
    }

    pub fn with_emission(mut self, emission: u8) -> Self {
        self.light_emission = emission;
        self
    }
}

/// Block type table handed to every component that needs block semantics.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    properties: Vec<Option<BlockProperties>>,
    by_name: HashMap<String, BlockId>,
}

pub const AIR: BlockId = BlockId(0);
pub const STONE: BlockId = BlockId(1);
pub const DIRT: BlockId = BlockId(2);
pub const GRASS: BlockId = BlockId(3);
pub const WATER: BlockId = BlockId(4);
pub const GLASS: BlockId = BlockId(5);
pub const LEAVES: BlockId = BlockId(6);
pub const TORCH: BlockId = BlockId(7);
pub const GLOWSTONE: BlockId = BlockId(8);
pub const LOG: BlockId = BlockId(9);
pub const SAND: BlockId = BlockId(10);
pub const BEDROCK: BlockId = BlockId(11);
pub const TALL_GRASS: BlockId = BlockId(12);

impl BlockRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            properties: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.properties.push(Some(BlockProperties::new("air", BlockFlags::NONE)));
        registry.by_name.insert("air".to_string(), AIR);
        registry
    }

    pub fn with_defaults() -> Self {
        let solid = BlockFlags::new().with_solid(true).with_opaque(true);
        let see_through = BlockFlags::new().with_solid(true).with_translucent(true);
        let flora = BlockFlags::new().with_flora(true).with_translucent(true);

        let mut registry = Self::new();
        let defaults = [
            (STONE, BlockProperties::new("stone", solid)),
            (DIRT, BlockProperties::new("dirt", solid)),
            (GRASS, BlockProperties::new("grass", solid)),
            (
                WATER,
                BlockProperties::new(
                    "water",
                    BlockFlags::new().with_liquid(true).with_translucent(true),
                )
                .with_attenuation(2),
            ),
            (GLASS, BlockProperties::new("glass", see_through)),
            (LEAVES, BlockProperties::new("leaves", see_through).with_attenuation(1)),
            (TORCH, BlockProperties::new("torch", flora).with_emission(14)),
            (GLOWSTONE, BlockProperties::new("glowstone", solid).with_emission(15)),
            (LOG, BlockProperties::new("log", solid)),
            (SAND, BlockProperties::new("sand", solid)),
            (BEDROCK, BlockProperties::new("bedrock", solid)),
            (TALL_GRASS, BlockProperties::new("tall_grass", flora)),
        ];
        for (id, props) in defaults {
            registry.insert(id, props);
        }
        registry
    }

    pub fn register(&mut self, id: BlockId, props: BlockProperties) -> Result<(), RegistryError> {
        if props.light_attenuation > 15 {
            return Err(RegistryError::LightOutOfRange(props.light_attenuation));
        }
        if props.light_emission > 15 {
            return Err(RegistryError::LightOutOfRange(props.light_emission));
        }
        let index = id.0 as usize;
        if self.properties.get(index).map_or(false, |p| p.is_some()) {
            return Err(RegistryError::DuplicateId(id));
        }
        if self.by_name.contains_key(&props.name) {
            return Err(RegistryError::DuplicateName(props.name));
        }
        self.insert(id, props);
        Ok(())
    }

    fn insert(&mut self, id: BlockId, props: BlockProperties) {
        let index = id.0 as usize;
        if self.properties.len() <= index {
            self.properties.resize(index + 1, None);
        }
        self.by_name.insert(props.name.clone(), id);
        self.properties[index] = Some(props);
    }

    pub fn get(&self, id: BlockId) -> Option<&BlockProperties> {
        self.properties.get(id.0 as usize).and_then(|p| p.as_ref())
    }

    pub fn get_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    /// Unknown ids behave like plain opaque stone.
    pub fn flags(&self, id: BlockId) -> BlockFlags {
        match self.get(id) {
            Some(props) => props.flags,
            None => BlockFlags::SOLID | BlockFlags::OPAQUE,
        }
    }

    pub fn attenuation(&self, id: BlockId) -> u8 {
        self.get(id).map_or(15, |p| p.light_attenuation)
    }

    pub fn emission(&self, id: BlockId) -> u8 {
        self.get(id).map_or(0, |p| p.light_emission)
    }

    pub fn is_opaque(&self, id: BlockId) -> bool {
        self.flags(id).is_opaque()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let registry = BlockRegistry::with_defaults();
        assert_eq!(registry.get_by_name("stone"), Some(STONE));
        assert!(registry.is_opaque(STONE));
        assert!(!registry.is_opaque(AIR));
        assert_eq!(registry.attenuation(STONE), 15);
        assert_eq!(registry.attenuation(WATER), 2);
        assert_eq!(registry.emission(TORCH), 14);
        assert_eq!(registry.attenuation(AIR), 0);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = BlockRegistry::with_defaults();
        let result = registry.register(STONE, BlockProperties::new("other", BlockFlags::NONE));
        assert!(matches!(result, Err(RegistryError::DuplicateId(_))));

        let result = registry.register(BlockId(200), BlockProperties::new("stone", BlockFlags::NONE));
        assert!(matches!(result, Err(RegistryError::DuplicateName(_))));
    }

    #[test]
    fn test_unknown_ids_are_opaque() {
        let registry = BlockRegistry::with_defaults();
        assert!(registry.is_opaque(BlockId(999)));
        assert_eq!(registry.attenuation(BlockId(999)), 15);
    }
}
