use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;

// ============================================================================
// Baked clips
// ============================================================================

/// Euler angles in degrees for JSON authoring (more intuitive than quaternions)
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct EulerAngles {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl EulerAngles {
    /// Convert to quaternion (XYZ order)
    pub fn to_quat(&self) -> Quat {
        Quat::from_euler(
            EulerRot::XYZ,
            self.x.to_radians(),
            self.y.to_radians(),
            self.z.to_radians(),
        )
    }
}

/// Quaternion for an XYZ Euler rotation in radians
pub fn euler_to_quat(rotation: Vec3) -> Quat {
    Quat::from_euler(EulerRot::XYZ, rotation.x, rotation.y, rotation.z)
}

/// XYZ Euler rotation in radians for a quaternion
pub fn quat_to_euler(rotation: Quat) -> Vec3 {
    let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
    Vec3::new(x, y, z)
}

/// A keyframe of a single bone's rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationKeyframe {
    pub time: f32,
    pub rotation: Quat,
}

/// Keyframed rotation of one bone, addressed by bone name
#[derive(Debug, Clone, PartialEq)]
pub struct BoneTrack {
    pub bone: String,
    /// Sorted by time
    pub keyframes: Vec<RotationKeyframe>,
}

impl BoneTrack {
    pub fn new(bone: impl Into<String>, mut keyframes: Vec<RotationKeyframe>) -> Self {
        keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            bone: bone.into(),
            keyframes,
        }
    }

    /// Sample the track at a time already mapped into `[0, duration]`.
    ///
    /// With `wrap`, the segment after the last keyframe interpolates back
    /// to the first one so looping clips have no seam.
    pub fn sample(&self, time: f32, duration: f32, wrap: bool) -> Option<Quat> {
        let first = self.keyframes.first()?;

        let next_idx = self.keyframes.partition_point(|kf| kf.time <= time);

        if next_idx == 0 {
            // Before first keyframe
            return Some(first.rotation);
        }

        if next_idx >= self.keyframes.len() {
            let prev = &self.keyframes[self.keyframes.len() - 1];
            if !wrap {
                return Some(prev.rotation);
            }
            // After last keyframe - interpolate to first for looping
            let segment_duration = duration - prev.time + first.time;
            let t = if segment_duration > 0.0 {
                ((time - prev.time) / segment_duration).clamp(0.0, 1.0)
            } else {
                0.0
            };
            return Some(prev.rotation.slerp(first.rotation, t));
        }

        // Between two keyframes
        let prev = &self.keyframes[next_idx - 1];
        let next = &self.keyframes[next_idx];
        let segment_duration = next.time - prev.time;

        let t = if segment_duration > 0.0 {
            (time - prev.time) / segment_duration
        } else {
            0.0
        };

        Some(prev.rotation.slerp(next.rotation, t))
    }
}

/// A named, finite-duration baked motion sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<BoneTrack>,
}

impl Clip {
    pub fn new(name: impl Into<String>, duration: f32, tracks: Vec<BoneTrack>) -> Self {
        Self {
            name: name.into(),
            duration,
            tracks,
        }
    }

    /// Map a playback time into clip-local time
    pub fn local_time(&self, time: f32, looping: bool) -> f32 {
        if self.duration <= 0.0 || !time.is_finite() {
            return 0.0;
        }
        if looping {
            time.rem_euclid(self.duration)
        } else {
            time.clamp(0.0, self.duration)
        }
    }

    /// Sample one track at a playback time
    pub fn sample_track(&self, track: usize, time: f32, looping: bool) -> Option<Quat> {
        let local = self.local_time(time, looping);
        self.tracks
            .get(track)?
            .sample(local, self.duration, looping)
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let clip_json: ClipJson =
            serde_json::from_str(json).map_err(|source| EngineError::Parse {
                what: "clip",
                source,
            })?;
        Ok(Self::from_clip_json(clip_json))
    }

    pub(crate) fn from_clip_json(clip_json: ClipJson) -> Self {
        let tracks = clip_json
            .tracks
            .into_iter()
            .map(|(bone, keyframes)| {
                let keyframes = keyframes
                    .into_iter()
                    .map(|kf| RotationKeyframe {
                        time: kf.time,
                        rotation: kf.rotation.to_quat(),
                    })
                    .collect();
                BoneTrack::new(bone, keyframes)
            })
            .collect();

        Self {
            name: clip_json.name,
            duration: clip_json.duration,
            tracks,
        }
    }
}

/// JSON format for a keyframe
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyframeJson {
    pub time: f32,
    #[serde(flatten)]
    pub rotation: EulerAngles,
}

/// JSON format for a clip: bone name to keyframes, rotations in degrees
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClipJson {
    pub name: String,
    pub duration: f32,
    #[serde(default)]
    pub tracks: BTreeMap<String, Vec<KeyframeJson>>,
}
