//! Morph target discovery and baselines
//!
//! Morph targets are always addressed per mesh: the same semantic name can sit
//! at different slots on different meshes.

use crate::rig::Rig;
use serde::{Deserialize, Serialize};

/// Naming patterns for morph targets driven by the autonomous controllers.
///
/// Patterns are matched case-insensitively by containment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphNamePolicy {
    /// Eyelid targets written by the blink controller
    pub blink: Vec<String>,
    /// Jaw/mouth targets written by the lip-sync controller
    pub jaw: Vec<String>,
}

impl Default for MorphNamePolicy {
    fn default() -> Self {
        Self {
            blink: ["eyeblink", "blink", "eyes_closed", "eyeclose"]
                .map(String::from)
                .to_vec(),
            jaw: ["jawopen", "mouthopen", "mouth_open", "jaw_open", "viseme_aa"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// A resolved morph target: mesh, slot and load-time influence
#[derive(Debug, Clone, PartialEq)]
pub struct MorphBinding {
    pub mesh: usize,
    pub index: usize,
    pub name: String,
    pub baseline: f32,
}

impl MorphBinding {
    /// Current value in the rig, or the baseline if the binding is stale
    #[inline]
    pub fn read(&self, rig: &Rig) -> f32 {
        rig.meshes
            .get(self.mesh)
            .and_then(|mesh| mesh.influences.get(self.index))
            .copied()
            .unwrap_or(self.baseline)
    }

    /// Write a value into the rig, ignoring stale bindings
    #[inline]
    pub fn write(&self, rig: &mut Rig, value: f32) {
        if let Some(slot) = rig
            .meshes
            .get_mut(self.mesh)
            .and_then(|mesh| mesh.influences.get_mut(self.index))
        {
            *slot = value;
        }
    }
}

/// Read-only table of every morph target and its baseline influence
#[derive(Debug, Clone, Default)]
pub struct MorphTargetMap {
    bindings: Vec<MorphBinding>,
    /// Baselines per mesh, indexed like `MorphMesh::influences`
    baselines: Vec<Vec<f32>>,
}

impl MorphTargetMap {
    /// Capture every morph target of the rig
    pub fn scan(rig: &Rig) -> Self {
        let mut bindings = Vec::new();
        for (mesh_index, mesh) in rig.meshes.iter().enumerate() {
            for (index, name) in mesh.target_names().iter().enumerate() {
                bindings.push(MorphBinding {
                    mesh: mesh_index,
                    index,
                    name: name.clone(),
                    baseline: mesh.influences.get(index).copied().unwrap_or(0.0),
                });
            }
        }

        let baselines = rig.meshes.iter().map(|m| m.influences.clone()).collect();

        if bindings.is_empty() {
            log::warn!("Rig has no morph targets; facial animation disabled");
        } else {
            log::info!(
                "Captured {} morph targets on {} meshes",
                bindings.len(),
                rig.meshes.len()
            );
        }

        Self {
            bindings,
            baselines,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Every target whose name contains one of the patterns (case-insensitive)
    pub fn find_matching(&self, patterns: &[String]) -> Vec<MorphBinding> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
        self.bindings
            .iter()
            .filter(|binding| {
                let name = binding.name.to_lowercase();
                patterns.iter().any(|pattern| name.contains(pattern.as_str()))
            })
            .cloned()
            .collect()
    }

    /// Every target with exactly this name, one per mesh that has it
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MorphBinding> + 'a {
        self.bindings.iter().filter(move |binding| binding.name == name)
    }

    /// Write every captured baseline back into the rig
    pub fn reset_to_baseline(&self, rig: &mut Rig) {
        for (mesh, baseline) in rig.meshes.iter_mut().zip(&self.baselines) {
            let n = mesh.influences.len().min(baseline.len());
            mesh.influences[..n].copy_from_slice(&baseline[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::MorphMesh;
    use wasm_bindgen_test::*;

    fn two_mesh_rig() -> Rig {
        let face = MorphMesh::new("Face", ["jawOpen", "EyeBlink_L", "mouthSmile"])
            .with_influence("EyeBlink_L", 0.25);
        let teeth = MorphMesh::new("Teeth", ["mouthSmile", "jawOpen"]);
        Rig::new(Vec::new(), vec![face, teeth], Vec::new())
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_lookups_are_mesh_scoped() {
        let map = MorphTargetMap::scan(&two_mesh_rig());
        let jaw: Vec<_> = map.named("jawOpen").map(|b| (b.mesh, b.index)).collect();
        assert_eq!(jaw, vec![(0, 0), (1, 1)]);
        assert_eq!(map.len(), 5);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_pattern_matching_is_case_insensitive() {
        let map = MorphTargetMap::scan(&two_mesh_rig());
        let blink = map.find_matching(&MorphNamePolicy::default().blink);
        assert_eq!(blink.len(), 1);
        assert_eq!(blink[0].name, "EyeBlink_L");
        assert_eq!(blink[0].baseline, 0.25);

        let jaw = map.find_matching(&MorphNamePolicy::default().jaw);
        assert_eq!(jaw.len(), 2);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_reset_restores_baselines() {
        let mut rig = two_mesh_rig();
        let map = MorphTargetMap::scan(&rig);

        for mesh in rig.meshes.iter_mut() {
            mesh.influences.iter_mut().for_each(|v| *v = 0.9);
        }
        map.reset_to_baseline(&mut rig);

        assert_eq!(rig.meshes[0].influences, vec![0.0, 0.25, 0.0]);
        assert_eq!(rig.meshes[1].influences, vec![0.0, 0.0]);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_stale_binding_write_is_ignored() {
        let mut rig = two_mesh_rig();
        let binding = MorphBinding {
            mesh: 7,
            index: 0,
            name: "ghost".to_string(),
            baseline: 0.4,
        };
        binding.write(&mut rig, 1.0);
        assert!(rig.meshes.iter().all(|m| m.influences.iter().all(|v| *v <= 0.25)));
        assert_eq!(binding.read(&rig), 0.4);
    }
}
