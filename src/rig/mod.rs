pub mod id;
pub mod cache;
pub mod pose;
pub mod clip;

pub use id::*;
pub use cache::*;
pub use pose::*;
pub use clip::*;

#[cfg(test)]
mod tests {
    use super::*;

    use glam::{Quat, Vec3};
    use wasm_bindgen_test::*;

    const EPSILON: f32 = 1e-5;

    fn mixamo_rig() -> Rig {
        let names = [
            "mixamorig:Hips",
            "mixamorig:Spine",
            "mixamorig:Spine1",
            "mixamorig:Spine2",
            "mixamorig:Neck",
            "mixamorig:Head",
            "mixamorig:HeadTop_End",
            "mixamorig:LeftShoulder",
            "mixamorig:LeftArm",
            "mixamorig:LeftForeArm",
            "mixamorig:RightShoulder",
            "mixamorig:RightArm",
            "mixamorig:RightForeArm",
        ];
        let bones = names
            .iter()
            .enumerate()
            .map(|(i, name)| Bone::new(*name, Vec3::new(i as f32 * 0.01, 0.0, 0.0)))
            .collect();
        Rig::new(bones, Vec::new(), Vec::new())
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_roles_resolve_on_mixamo_names() {
        let rig = mixamo_rig();
        let cache = SkeletonCache::initialize(&rig, &BoneNamePolicy::default());

        let name_of = |role| cache.get_bone(role).map(|i| rig.bones[i].name.as_str());
        assert_eq!(name_of(BoneRole::Hips), Some("mixamorig:Hips"));
        assert_eq!(name_of(BoneRole::Spine), Some("mixamorig:Spine"));
        assert_eq!(name_of(BoneRole::Chest), Some("mixamorig:Spine2"));
        assert_eq!(name_of(BoneRole::Head), Some("mixamorig:Head"));
        assert_eq!(name_of(BoneRole::UpperArmL), Some("mixamorig:LeftArm"));
        assert_eq!(name_of(BoneRole::ForearmR), Some("mixamorig:RightForeArm"));
        assert_eq!(cache.resolved(), RoleMask::all());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_candidate_order_beats_rig_order() {
        let rig = Rig::new(
            vec![
                Bone::new("Chest", Vec3::ZERO),
                Bone::new("UpperChest", Vec3::ZERO),
            ],
            Vec::new(),
            Vec::new(),
        );
        let cache = SkeletonCache::initialize(&rig, &BoneNamePolicy::default());

        // "UpperChest" is listed before "Chest" for the chest role
        assert_eq!(cache.get_bone(BoneRole::Chest), Some(1));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_bone_bound_to_one_role_only() {
        let policy = BoneNamePolicy::new([
            (BoneRole::Spine, vec!["Spine".to_string()]),
            (BoneRole::Chest, vec!["Spine".to_string()]),
        ]);
        let rig = Rig::new(vec![Bone::new("Spine", Vec3::ZERO)], Vec::new(), Vec::new());
        let cache = SkeletonCache::initialize(&rig, &policy);

        assert_eq!(cache.get_bone(BoneRole::Spine), Some(0));
        assert_eq!(cache.get_bone(BoneRole::Chest), None);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_partial_and_empty_rigs() {
        let rig = Rig::new(vec![Bone::new("head", Vec3::ONE)], Vec::new(), Vec::new());
        let cache = SkeletonCache::initialize(&rig, &BoneNamePolicy::default());
        assert_eq!(cache.get_baseline(BoneRole::Head), Some(Vec3::ONE));
        assert_eq!(cache.get_bone(BoneRole::Hips), None);
        assert_eq!(cache.get_baseline(BoneRole::Hips), None);
        assert!(!cache.is_degenerate());

        let empty = SkeletonCache::initialize(&Rig::default(), &BoneNamePolicy::default());
        assert!(empty.is_degenerate());
        assert_eq!(empty.resolved().count(), 0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_baselines_survive_rig_mutation() {
        let mut rig = mixamo_rig();
        let cache = SkeletonCache::initialize(&rig, &BoneNamePolicy::default());
        let head = cache.get_bone(BoneRole::Head).unwrap();
        let before = cache.get_baseline(BoneRole::Head).unwrap();

        rig.bones[head].rotation += Vec3::splat(1.0);
        assert_eq!(cache.get_baseline(BoneRole::Head), Some(before));

        cache.reset_to_baseline(&mut rig);
        assert_eq!(rig.bones[head].rotation, before);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_role_names_round_trip() {
        for role in BoneRole::ALL {
            assert_eq!(BoneRole::from_name(role.name()), Some(role));
        }
        assert_eq!(BoneRole::from_name("tail"), None);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_track_interpolation() {
        let track = BoneTrack::new(
            "Spine",
            vec![
                RotationKeyframe {
                    time: 1.0,
                    rotation: Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
                },
                RotationKeyframe {
                    time: 0.0,
                    rotation: Quat::IDENTITY,
                },
            ],
        );
        let clip = Clip::new("lerp_test", 2.0, vec![track]);

        // Keyframes were sorted on construction
        let mid = clip.sample_track(0, 0.5, false).unwrap();
        let angle = quat_to_euler(mid).x;
        assert!(
            (angle - std::f32::consts::FRAC_PI_4).abs() < 1e-3,
            "Angle should be 45 deg, got {}",
            angle.to_degrees()
        );

        // Non-looping clips hold the last key
        let held = clip.sample_track(0, 1.9, false).unwrap();
        assert!(held.angle_between(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)) < EPSILON);

        // Looping clips wrap back towards the first key
        let wrapping = clip.sample_track(0, 1.5, true).unwrap();
        let angle = quat_to_euler(wrapping).x;
        assert!((angle - std::f32::consts::FRAC_PI_4).abs() < 1e-3);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_zero_duration_clip_does_not_nan() {
        let track = BoneTrack::new(
            "Head",
            vec![RotationKeyframe {
                time: 0.0,
                rotation: Quat::from_rotation_y(0.3),
            }],
        );
        let clip = Clip::new("pose", 0.0, vec![track]);
        let sample = clip.sample_track(0, 12.0, true).unwrap();
        assert!(sample.is_finite());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_clip_parsing() {
        let json = r#"{
            "name": "Idle",
            "duration": 2.0,
            "tracks": {
                "mixamorig:Spine": [
                    { "time": 0.0, "x": 0 },
                    { "time": 1.0, "x": 10, "z": 5 }
                ]
            }
        }"#;

        let clip = Clip::from_json(json).unwrap();
        assert_eq!(clip.name, "Idle");
        assert_eq!(clip.tracks.len(), 1);
        assert_eq!(clip.tracks[0].bone, "mixamorig:Spine");
        assert_eq!(clip.tracks[0].keyframes.len(), 2);

        let euler = quat_to_euler(clip.tracks[0].keyframes[1].rotation);
        assert!((euler.x - 10f32.to_radians()).abs() < 1e-4);
        assert!((euler.z - 5f32.to_radians()).abs() < 1e-4);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_rig_parsing() {
        let json = r#"{
            "bones": [
                { "name": "Hips", "rotation": [0.1, 0.0, 0.0] },
                { "name": "Head", "parent": 0 }
            ],
            "meshes": [
                { "name": "Face", "morphTargets": ["eyeBlink", "jawOpen"], "influences": [0.2] }
            ],
            "clips": [ { "name": "Idle", "duration": 1.0 } ]
        }"#;

        let rig = Rig::from_json(json).unwrap();
        assert_eq!(rig.bones.len(), 2);
        assert_eq!(rig.bones[1].parent, Some(0));
        assert_eq!(rig.bones[0].rotation, Vec3::new(0.1, 0.0, 0.0));
        let face = rig.mesh("Face").unwrap();
        assert_eq!(face.index_of("jawOpen"), Some(1));
        assert_eq!(face.influence("eyeBlink"), Some(0.2));
        assert_eq!(face.influence("jawOpen"), Some(0.0));
        assert_eq!(rig.clips[0].name, "Idle");
        assert_eq!(rig.morph_target_count(), 2);

        assert!(Rig::from_json("{ \"bones\": 3 }").is_err());
    }
}
