use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BlockFlags: u32 {
        const NONE = 0;
        const SOLID = 1 << 0;
        /// Fully covers its cell: hides neighbour faces and blocks light.
        const OPAQUE = 1 << 1;
        const TRANSLUCENT = 1 << 2;
        const LIQUID = 1 << 3;
        const FLORA = 1 << 4;
    }
}

impl BlockFlags {
    pub fn new() -> Self {
        Self::NONE
    }

    pub fn with_solid(self, value: bool) -> Self {
        self.with(Self::SOLID, value)
    }

    pub fn with_opaque(self, value: bool) -> Self {
        self.with(Self::OPAQUE, value)
    }

    pub fn with_translucent(self, value: bool) -> Self {
        self.with(Self::TRANSLUCENT, value)
    }

    pub fn with_liquid(self, value: bool) -> Self {
        self.with(Self::LIQUID, value)
    }

    pub fn with_flora(self, value: bool) -> Self {
        self.with(Self::FLORA, value)
    }

    fn with(self, flag: Self, value: bool) -> Self {
        if value {
            self | flag
        } else {
            self & !flag
        }
    }

    pub fn is_solid(&self) -> bool {
        self.contains(Self::SOLID)
    }

    pub fn is_opaque(&self) -> bool {
        self.contains(Self::OPAQUE)
    }

    pub fn is_translucent(&self) -> bool {
        self.contains(Self::TRANSLUCENT)
    }

    pub fn is_liquid(&self) -> bool {
        self.contains(Self::LIQUID)
    }

    pub fn is_flora(&self) -> bool {
        self.contains(Self::FLORA)
    }
}

impl Default for BlockFlags {
    fn default() -> Self {
        Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_toggles() {
        let flags = BlockFlags::new().with_solid(true).with_opaque(true);
        assert!(flags.is_solid() && flags.is_opaque());
        let flags = flags.with_opaque(false).with_translucent(true);
        assert!(!flags.is_opaque());
        assert!(flags.is_translucent());
    }
}
