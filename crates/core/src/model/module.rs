use std::fmt;

use serde::{Deserialize, Serialize};

use super::Address;

/// Rotation values are expressed in millionths of a degree and wrap here.
pub const ROTATION_MODULUS: u32 = 360_000_000;

/// Three-axis value carried by most modules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xyz<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Xyz<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    pub fn splat(value: T) -> Self {
        Self {
            x: value,
            y: value,
            z: value,
        }
    }
}

/// Reference frame a point's transform is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentReference {
    pub address: Address,
    /// Whether the transform is relative to the parent or absolute.
    pub relative: bool,
}

/// Stable identifier for each module kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModuleIdentifier {
    Position,
    PositionVelAccel,
    Rotation,
    RotationVelAccel,
    Scale,
    Parent,
}

impl ModuleIdentifier {
    pub const ALL: [ModuleIdentifier; 6] = [
        Self::Position,
        Self::PositionVelAccel,
        Self::Rotation,
        Self::RotationVelAccel,
        Self::Scale,
        Self::Parent,
    ];

    /// Module number within the standard module set.
    pub fn number(self) -> u16 {
        match self {
            Self::Position => 0x0001,
            Self::PositionVelAccel => 0x0002,
            Self::Rotation => 0x0003,
            Self::RotationVelAccel => 0x0004,
            Self::Scale => 0x0005,
            Self::Parent => 0x0006,
        }
    }

    /// The velocity/acceleration module that only makes sense alongside this one.
    pub fn dependent(self) -> Option<ModuleIdentifier> {
        match self {
            Self::Position => Some(Self::PositionVelAccel),
            Self::Rotation => Some(Self::RotationVelAccel),
            _ => None,
        }
    }

    /// The base module this one depends on.
    pub fn base(self) -> Option<ModuleIdentifier> {
        match self {
            Self::PositionVelAccel => Some(Self::Position),
            Self::RotationVelAccel => Some(Self::Rotation),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Position => "position",
            Self::PositionVelAccel => "position velocity/acceleration",
            Self::Rotation => "rotation",
            Self::RotationVelAccel => "rotation velocity/acceleration",
            Self::Scale => "scale",
            Self::Parent => "parent",
        };
        f.write_str(name)
    }
}

/// Typed payload attached to a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Module {
    /// Microns.
    Position(Xyz<i32>),
    /// Microns per second and microns per second squared.
    PositionVelAccel {
        velocity: Xyz<i32>,
        acceleration: Xyz<i32>,
    },
    /// Millionths of a degree, `0..ROTATION_MODULUS`.
    Rotation(Xyz<u32>),
    RotationVelAccel {
        velocity: Xyz<i32>,
        acceleration: Xyz<i32>,
    },
    /// Millionths, so 1_000_000 is unity.
    Scale(Xyz<i32>),
    Parent(ParentReference),
}

impl Module {
    pub fn identifier(&self) -> ModuleIdentifier {
        match self {
            Self::Position(_) => ModuleIdentifier::Position,
            Self::PositionVelAccel { .. } => ModuleIdentifier::PositionVelAccel,
            Self::Rotation(_) => ModuleIdentifier::Rotation,
            Self::RotationVelAccel { .. } => ModuleIdentifier::RotationVelAccel,
            Self::Scale(_) => ModuleIdentifier::Scale,
            Self::Parent(_) => ModuleIdentifier::Parent,
        }
    }

    /// A zeroed module of the requested kind, as added from the UI.
    pub fn default_for(identifier: ModuleIdentifier) -> Self {
        match identifier {
            ModuleIdentifier::Position => Self::Position(Xyz::default()),
            ModuleIdentifier::PositionVelAccel => Self::PositionVelAccel {
                velocity: Xyz::default(),
                acceleration: Xyz::default(),
            },
            ModuleIdentifier::Rotation => Self::Rotation(Xyz::default()),
            ModuleIdentifier::RotationVelAccel => Self::RotationVelAccel {
                velocity: Xyz::default(),
                acceleration: Xyz::default(),
            },
            ModuleIdentifier::Scale => Self::Scale(Xyz::splat(1_000_000)),
            ModuleIdentifier::Parent => Self::Parent(ParentReference {
                address: Address::new(1, 1, 1),
                relative: false,
            }),
        }
    }
}
