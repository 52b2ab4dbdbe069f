//! `src/model/id_code.rs`
//!
//! Data-block type codes found inside library files, and the `filter_id`
//! bitmask used by the library/asset filters.

use bitflags::bitflags;
use enum_map::Enum;
use serde::{Deserialize, Serialize};

/// Two-character data-block code packed into a `u16`, first character in the
/// low byte. Ordering follows the packed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Enum)]
#[repr(u16)]
pub enum IdCode {
    Action = code(b"AC"),
    Brush = code(b"BR"),
    Camera = code(b"CA"),
    Collection = code(b"GR"),
    Image = code(b"IM"),
    Light = code(b"LA"),
    Material = code(b"MA"),
    Mesh = code(b"ME"),
    NodeTree = code(b"NT"),
    Object = code(b"OB"),
    Scene = code(b"SC"),
    Texture = code(b"TE"),
    World = code(b"WO"),
}

const fn code(chars: &[u8; 2]) -> u16 {
    (chars[0] as u16) | ((chars[1] as u16) << 8)
}

bitflags! {
    /// Per-type filter bits; `IdFilter::all()` lets every type through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct IdFilter: u64 {
        const ACTION     = 1 << 0;
        const BRUSH      = 1 << 1;
        const CAMERA     = 1 << 2;
        const COLLECTION = 1 << 3;
        const IMAGE      = 1 << 4;
        const LIGHT      = 1 << 5;
        const MATERIAL   = 1 << 6;
        const MESH       = 1 << 7;
        const NODE_TREE  = 1 << 8;
        const OBJECT     = 1 << 9;
        const SCENE      = 1 << 10;
        const TEXTURE    = 1 << 11;
        const WORLD      = 1 << 12;
    }
}

impl IdCode {
    pub const ALL: [Self; 13] = [
        Self::Action,
        Self::Brush,
        Self::Camera,
        Self::Collection,
        Self::Image,
        Self::Light,
        Self::Material,
        Self::Mesh,
        Self::NodeTree,
        Self::Object,
        Self::Scene,
        Self::Texture,
        Self::World,
    ];

    /// Group (directory) name used inside library paths, e.g. `lib.blend/Object/Cube`.
    #[must_use]
    pub const fn group_name(self) -> &'static str {
        match self {
            Self::Action => "Action",
            Self::Brush => "Brush",
            Self::Camera => "Camera",
            Self::Collection => "Collection",
            Self::Image => "Image",
            Self::Light => "Light",
            Self::Material => "Material",
            Self::Mesh => "Mesh",
            Self::NodeTree => "NodeTree",
            Self::Object => "Object",
            Self::Scene => "Scene",
            Self::Texture => "Texture",
            Self::World => "World",
        }
    }

    #[must_use]
    pub fn from_group_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.group_name() == name)
    }

    #[must_use]
    pub const fn filter_bit(self) -> IdFilter {
        match self {
            Self::Action => IdFilter::ACTION,
            Self::Brush => IdFilter::BRUSH,
            Self::Camera => IdFilter::CAMERA,
            Self::Collection => IdFilter::COLLECTION,
            Self::Image => IdFilter::IMAGE,
            Self::Light => IdFilter::LIGHT,
            Self::Material => IdFilter::MATERIAL,
            Self::Mesh => IdFilter::MESH,
            Self::NodeTree => IdFilter::NODE_TREE,
            Self::Object => IdFilter::OBJECT,
            Self::Scene => IdFilter::SCENE,
            Self::Texture => IdFilter::TEXTURE,
            Self::World => IdFilter::WORLD,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for IdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.group_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name_roundtrip_is_total() {
        for code in IdCode::ALL {
            assert_eq!(IdCode::from_group_name(code.group_name()), Some(code));
        }
        assert_eq!(IdCode::from_group_name("Objects"), None);
    }

    #[test]
    fn test_filter_bits_are_distinct() {
        let combined = IdCode::ALL
            .into_iter()
            .fold(IdFilter::empty(), |acc, code| acc | code.filter_bit());
        assert_eq!(combined, IdFilter::all());
    }

    #[test]
    fn test_packed_value() {
        assert_eq!(IdCode::Object.as_u16(), u16::from(b'O') | (u16::from(b'B') << 8));
        assert_eq!(IdCode::Object.cmp(&IdCode::Mesh), IdCode::Object.as_u16().cmp(&IdCode::Mesh.as_u16()));
    }
}
