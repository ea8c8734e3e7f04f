/// Logical bone roles the engine animates.
///
/// A role is bound to at most one physical bone of the loaded rig.
/// Ordered parents before children so iteration follows the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BoneRole {
    // Root
    Hips = 0,

    // Spine chain
    Spine = 1,
    Chest = 2,
    Neck = 3,
    Head = 4,

    // Left arm chain
    ShoulderL = 5,
    UpperArmL = 6,
    ForearmL = 7,

    // Right arm chain
    ShoulderR = 8,
    UpperArmR = 9,
    ForearmR = 10,
}

impl BoneRole {
    /// Total number of roles
    pub const COUNT: usize = 11;

    /// Convert to array index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// All roles in hierarchy order
    pub const ALL: [BoneRole; Self::COUNT] = [
        BoneRole::Hips,
        BoneRole::Spine,
        BoneRole::Chest,
        BoneRole::Neck,
        BoneRole::Head,
        BoneRole::ShoulderL,
        BoneRole::UpperArmL,
        BoneRole::ForearmL,
        BoneRole::ShoulderR,
        BoneRole::UpperArmR,
        BoneRole::ForearmR,
    ];

    /// Engine-internal semantic name, as used in configuration JSON
    pub const fn name(self) -> &'static str {
        match self {
            BoneRole::Hips => "hips",
            BoneRole::Spine => "spine",
            BoneRole::Chest => "chest",
            BoneRole::Neck => "neck",
            BoneRole::Head => "head",
            BoneRole::ShoulderL => "shoulderL",
            BoneRole::UpperArmL => "upperArmL",
            BoneRole::ForearmL => "forearmL",
            BoneRole::ShoulderR => "shoulderR",
            BoneRole::UpperArmR => "upperArmR",
            BoneRole::ForearmR => "forearmR",
        }
    }

    /// Parse a semantic name back into a role
    pub fn from_name(name: &str) -> Option<BoneRole> {
        Self::ALL.into_iter().find(|role| role.name() == name)
    }
}

impl std::fmt::Display for BoneRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl serde::Serialize for BoneRole {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for BoneRole {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        BoneRole::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown bone role `{name}`")))
    }
}
