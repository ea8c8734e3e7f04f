use super::clip::{Clip, ClipJson};
use crate::error::EngineError;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named joint of the loaded rig.
///
/// `rotation` holds XYZ Euler angles in radians and is the only value the
/// engine writes per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// Index of the parent bone in `Rig::bones` (None for roots)
    pub parent: Option<usize>,
    pub rotation: Vec3,
}

impl Bone {
    pub fn new(name: impl Into<String>, rotation: Vec3) -> Self {
        Self {
            name: name.into(),
            parent: None,
            rotation,
        }
    }

    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A mesh exposing morph targets.
///
/// The dictionary maps a target name to its slot in `influences`. Two meshes
/// may use the same name at different slots, so lookups are always per mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphMesh {
    pub name: String,
    dictionary: HashMap<String, usize>,
    target_names: Vec<String>,
    pub influences: Vec<f32>,
}

impl MorphMesh {
    /// Create a mesh with every influence at zero
    pub fn new<I, S>(name: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target_names: Vec<String> = targets.into_iter().map(Into::into).collect();
        let dictionary = target_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let influences = vec![0.0; target_names.len()];

        Self {
            name: name.into(),
            dictionary,
            target_names,
            influences,
        }
    }

    /// Set the load-time influence of a target (used by asset loaders)
    pub fn with_influence(mut self, target: &str, value: f32) -> Self {
        if let Some(index) = self.index_of(target) {
            self.influences[index] = value;
        }
        self
    }

    /// Slot of a target in this mesh's influence array
    pub fn index_of(&self, target: &str) -> Option<usize> {
        self.dictionary.get(target).copied()
    }

    /// Target names in slot order
    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    pub fn influence(&self, target: &str) -> Option<f32> {
        self.index_of(target).map(|i| self.influences[i])
    }
}

/// A loaded character rig: skeleton, morph meshes and baked clips.
///
/// Built by the asset-loading collaborator; the engine takes ownership and
/// mutates bone rotations and morph influences in place.
#[derive(Debug, Clone, Default)]
pub struct Rig {
    pub bones: Vec<Bone>,
    pub meshes: Vec<MorphMesh>,
    pub clips: Vec<Clip>,
}

impl Rig {
    pub fn new(bones: Vec<Bone>, meshes: Vec<MorphMesh>, clips: Vec<Clip>) -> Self {
        Self {
            bones,
            meshes,
            clips,
        }
    }

    /// Index of the first bone with exactly this name
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    pub fn mesh(&self, name: &str) -> Option<&MorphMesh> {
        self.meshes.iter().find(|mesh| mesh.name == name)
    }

    /// Total morph target slots across all meshes
    pub fn morph_target_count(&self) -> usize {
        self.meshes.iter().map(|mesh| mesh.influences.len()).sum()
    }

    /// Parse the asset loader's JSON description of a rig
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let rig_json: RigJson = serde_json::from_str(json).map_err(|source| {
            EngineError::Parse {
                what: "rig",
                source,
            }
        })?;

        let bones = rig_json
            .bones
            .into_iter()
            .map(|bone| Bone {
                name: bone.name,
                parent: bone.parent,
                rotation: Vec3::from_array(bone.rotation),
            })
            .collect();

        let meshes = rig_json
            .meshes
            .into_iter()
            .map(|mesh| {
                let mut built = MorphMesh::new(mesh.name, mesh.morph_targets);
                for (slot, value) in built.influences.iter_mut().zip(mesh.influences) {
                    *slot = value;
                }
                built
            })
            .collect();

        let clips = rig_json.clips.into_iter().map(Clip::from_clip_json).collect();

        Ok(Self {
            bones,
            meshes,
            clips,
        })
    }
}

/// JSON format for a bone
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoneJson {
    pub name: String,
    #[serde(default)]
    pub parent: Option<usize>,
    /// XYZ Euler radians
    #[serde(default)]
    pub rotation: [f32; 3],
}

/// JSON format for a morph mesh
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MorphMeshJson {
    pub name: String,
    #[serde(default)]
    pub morph_targets: Vec<String>,
    /// Load-time influences; missing slots default to zero
    #[serde(default)]
    pub influences: Vec<f32>,
}

/// JSON format for a rig
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RigJson {
    #[serde(default)]
    pub bones: Vec<BoneJson>,
    #[serde(default)]
    pub meshes: Vec<MorphMeshJson>,
    #[serde(default)]
    pub clips: Vec<ClipJson>,
}
