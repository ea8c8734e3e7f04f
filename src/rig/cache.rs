use super::id::BoneRole;
use super::pose::Rig;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered candidate bone names per role.
///
/// For each role the candidates are tried in order; the first bone (in rig
/// order) whose name contains the candidate wins. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoneNamePolicy {
    pub candidates: BTreeMap<BoneRole, Vec<String>>,
}

impl BoneNamePolicy {
    pub fn new(candidates: impl IntoIterator<Item = (BoneRole, Vec<String>)>) -> Self {
        Self {
            candidates: candidates.into_iter().collect(),
        }
    }

    pub fn candidates_for(&self, role: BoneRole) -> &[String] {
        self.candidates.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for BoneNamePolicy {
    /// Mixamo, VRM and Blender naming conventions
    fn default() -> Self {
        Self::new([
            (BoneRole::Hips, names(&["Hips", "hips", "Pelvis", "pelvis"])),
            (BoneRole::Spine, names(&["Spine", "spine"])),
            (
                BoneRole::Chest,
                names(&["Spine2", "UpperChest", "Chest", "chest", "Spine1"]),
            ),
            (BoneRole::Neck, names(&["Neck", "neck"])),
            (BoneRole::Head, names(&["Head", "head"])),
            (
                BoneRole::ShoulderL,
                names(&["LeftShoulder", "Shoulder_L", "shoulder.L", "L_Shoulder"]),
            ),
            (
                BoneRole::UpperArmL,
                names(&["LeftArm", "UpperArm_L", "upper_arm.L", "L_UpperArm"]),
            ),
            (
                BoneRole::ForearmL,
                names(&["LeftForeArm", "LowerArm_L", "forearm.L", "L_LowerArm"]),
            ),
            (
                BoneRole::ShoulderR,
                names(&["RightShoulder", "Shoulder_R", "shoulder.R", "R_Shoulder"]),
            ),
            (
                BoneRole::UpperArmR,
                names(&["RightArm", "UpperArm_R", "upper_arm.R", "R_UpperArm"]),
            ),
            (
                BoneRole::ForearmR,
                names(&["RightForeArm", "LowerArm_R", "forearm.R", "R_LowerArm"]),
            ),
        ])
    }
}

/// Set of resolved roles. Bit i corresponds to the role with index i.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleMask(u16);

impl RoleMask {
    /// Mask with every role set
    pub const fn all() -> Self {
        Self((1 << BoneRole::COUNT) - 1)
    }

    #[inline]
    pub fn contains(&self, role: BoneRole) -> bool {
        (self.0 & (1 << role.index())) != 0
    }

    /// Return new mask with a role added
    #[inline]
    pub fn with(self, role: BoneRole) -> Self {
        Self(self.0 | (1 << role.index()))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Roles in the mask, in hierarchy order
    pub fn roles(self) -> impl Iterator<Item = BoneRole> {
        BoneRole::ALL.into_iter().filter(move |role| self.contains(*role))
    }
}

/// Role bindings and baseline rotations, captured once after rig load.
///
/// Baselines never change after capture; every per-frame effect is written
/// as baseline plus delta.
#[derive(Debug, Clone)]
pub struct SkeletonCache {
    bones: [Option<usize>; BoneRole::COUNT],
    /// Baseline rotation of every rig bone, indexed like `Rig::bones`
    baselines: Vec<Vec3>,
    resolved: RoleMask,
}

impl SkeletonCache {
    /// Scan the rig once, resolve every role and snapshot baselines
    pub fn initialize(rig: &Rig, policy: &BoneNamePolicy) -> Self {
        let mut bones = [None; BoneRole::COUNT];
        let mut resolved = RoleMask::default();
        let mut taken = vec![false; rig.bones.len()];

        for role in BoneRole::ALL {
            let found = policy.candidates_for(role).iter().find_map(|candidate| {
                rig.bones
                    .iter()
                    .enumerate()
                    .find(|(i, bone)| !taken[*i] && bone.name.contains(candidate.as_str()))
                    .map(|(i, _)| i)
            });

            if let Some(index) = found {
                taken[index] = true;
                bones[role.index()] = Some(index);
                resolved = resolved.with(role);
                log::debug!("Bound {} -> {}", role, rig.bones[index].name);
            }
        }

        let baselines = rig.bones.iter().map(|bone| bone.rotation).collect();

        if resolved.is_empty() {
            log::warn!(
                "No bone roles resolved on a rig with {} bones; skeletal motion disabled",
                rig.bones.len()
            );
        } else {
            log::info!(
                "Resolved {}/{} bone roles",
                resolved.count(),
                BoneRole::COUNT
            );
        }

        Self {
            bones,
            baselines,
            resolved,
        }
    }

    /// Rig bone index bound to a role
    #[inline]
    pub fn get_bone(&self, role: BoneRole) -> Option<usize> {
        self.bones[role.index()]
    }

    /// Baseline rotation of the bone bound to a role
    #[inline]
    pub fn get_baseline(&self, role: BoneRole) -> Option<Vec3> {
        self.get_bone(role).map(|index| self.baselines[index])
    }

    /// Baseline rotation of any rig bone
    #[inline]
    pub fn bone_baseline(&self, bone: usize) -> Option<Vec3> {
        self.baselines.get(bone).copied()
    }

    pub fn resolved(&self) -> RoleMask {
        self.resolved
    }

    /// True when no role could be bound
    pub fn is_degenerate(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Write every captured baseline back into the rig
    pub fn reset_to_baseline(&self, rig: &mut Rig) {
        for (bone, baseline) in rig.bones.iter_mut().zip(&self.baselines) {
            bone.rotation = *baseline;
        }
    }
}
