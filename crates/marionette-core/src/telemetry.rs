//! Telemetry pose frames streamed by the robot daemon
//!
//! A frame carries the seven head joints (body yaw followed by the six
//! Stewart-platform actuators), the antenna pair, and optionally the 21
//! passive joints of the head mechanism and a redundant 4x4 head pose.
//! Decoding is all-or-nothing: a frame with any malformed vector is rejected
//! and never partially applied.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Body yaw plus six Stewart-platform actuators
pub const HEAD_JOINT_COUNT: usize = 7;
/// Passive ball joints of the head mechanism, three axes each
pub const PASSIVE_JOINT_COUNT: usize = 21;
pub const ANTENNA_COUNT: usize = 2;
pub const HEAD_POSE_LEN: usize = 16;

/// Per-element tolerance (radians) below which two frames are considered equal
pub const POSE_TOLERANCE: f32 = 0.005;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to decode frame: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Field `{field}` has {actual} elements, expected {expected}")]
    BadLength {
        field: &'static str,
        expected: &'static str,
        actual: usize,
    },
    #[error("Frame has no antenna positions")]
    MissingAntennas,
    #[error("Field `{field}` contains a non-finite value")]
    NonFinite { field: &'static str },
}

/// Wire shape of a telemetry message, validated into a [`PoseFrame`]
#[derive(Debug, Deserialize)]
struct FrameJson {
    #[serde(default)]
    head_joints: Option<Vec<f64>>,
    #[serde(default)]
    passive_joints: Option<Vec<f64>>,
    #[serde(default, alias = "antennas")]
    antennas_position: Option<Vec<f64>>,
    #[serde(default)]
    head_pose: Option<HeadPoseJson>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

/// The head pose arrives either flat or as four rows. Anything else is
/// ignored since the joints are authoritative.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HeadPoseJson {
    Flat(Vec<f64>),
    Rows(Vec<Vec<f64>>),
    Other(serde_json::Value),
}

impl HeadPoseJson {
    fn into_matrix(self) -> Option<[f32; HEAD_POSE_LEN]> {
        let values: Vec<f64> = match self {
            HeadPoseJson::Flat(v) => v,
            HeadPoseJson::Rows(rows) => rows.into_iter().flatten().collect(),
            HeadPoseJson::Other(_) => return None,
        };
        if values.len() != HEAD_POSE_LEN || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let mut out = [0.0f32; HEAD_POSE_LEN];
        for (dst, src) in out.iter_mut().zip(values) {
            *dst = src as f32;
        }
        Some(out)
    }
}

/// One accepted telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct PoseFrame {
    /// `[body_yaw, stewart_1, ..., stewart_6]`, absent when the daemon omitted them
    pub head_joints: Option<[f32; HEAD_JOINT_COUNT]>,
    pub passive_joints: Option<[f32; PASSIVE_JOINT_COUNT]>,
    /// Raw antenna channels as reported by the robot (see the kinematic model
    /// for the channel-to-joint mapping)
    pub antennas: [f32; ANTENNA_COUNT],
    /// Row-major 4x4 head pose, redundant with the joints
    pub head_pose: Option<[f32; HEAD_POSE_LEN]>,
    /// Robot-side timestamp in seconds, if provided
    pub timestamp: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl PoseFrame {
    pub fn new(
        head_joints: Option<[f32; HEAD_JOINT_COUNT]>,
        passive_joints: Option<[f32; PASSIVE_JOINT_COUNT]>,
        antennas: [f32; ANTENNA_COUNT],
    ) -> Self {
        Self {
            head_joints,
            passive_joints,
            antennas,
            head_pose: None,
            timestamp: None,
            received_at: Utc::now(),
        }
    }

    /// Decode a JSON text message
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let json: FrameJson = serde_json::from_str(text)?;
        Self::from_json(json)
    }

    /// Decode a binary message carrying UTF-8 JSON
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let json: FrameJson = serde_json::from_slice(bytes)?;
        Self::from_json(json)
    }

    fn from_json(json: FrameJson) -> Result<Self, FrameError> {
        let mut frame = Self::from_slices(
            json.head_joints.as_deref(),
            json.passive_joints.as_deref(),
            json.antennas_position.as_deref(),
        )?;
        frame.head_pose = json.head_pose.and_then(HeadPoseJson::into_matrix);
        frame.timestamp = json.timestamp.as_ref().and_then(|t| t.as_f64());
        Ok(frame)
    }

    /// Validate raw vectors into a frame.
    ///
    /// Head joints must have exactly 7 elements, passive joints at least 21
    /// (extra trailing values are dropped), antennas exactly 2.
    pub fn from_slices(
        head_joints: Option<&[f64]>,
        passive_joints: Option<&[f64]>,
        antennas: Option<&[f64]>,
    ) -> Result<Self, FrameError> {
        let head_joints = match head_joints {
            Some(values) => {
                if values.len() != HEAD_JOINT_COUNT {
                    return Err(FrameError::BadLength {
                        field: "head_joints",
                        expected: "exactly 7",
                        actual: values.len(),
                    });
                }
                Some(to_array::<HEAD_JOINT_COUNT>(values, "head_joints")?)
            }
            None => None,
        };

        let passive_joints = match passive_joints {
            Some(values) => {
                if values.len() < PASSIVE_JOINT_COUNT {
                    return Err(FrameError::BadLength {
                        field: "passive_joints",
                        expected: "at least 21",
                        actual: values.len(),
                    });
                }
                Some(to_array::<PASSIVE_JOINT_COUNT>(
                    &values[..PASSIVE_JOINT_COUNT],
                    "passive_joints",
                )?)
            }
            None => None,
        };

        let antennas = antennas.ok_or(FrameError::MissingAntennas)?;
        if antennas.len() != ANTENNA_COUNT {
            return Err(FrameError::BadLength {
                field: "antennas_position",
                expected: "exactly 2",
                actual: antennas.len(),
            });
        }
        let antennas = to_array::<ANTENNA_COUNT>(antennas, "antennas_position")?;

        Ok(Self::new(head_joints, passive_joints, antennas))
    }

    /// Body yaw, the first head joint
    pub fn body_yaw(&self) -> Option<f32> {
        self.head_joints.map(|j| j[0])
    }

    /// True when every component differs by at most `tolerance`.
    ///
    /// A vector present in one frame and absent in the other counts as a change.
    pub fn approx_eq(&self, other: &PoseFrame, tolerance: f32) -> bool {
        optional_within(self.head_joints.as_ref(), other.head_joints.as_ref(), tolerance)
            && optional_within(
                self.passive_joints.as_ref(),
                other.passive_joints.as_ref(),
                tolerance,
            )
            && within(&self.antennas, &other.antennas, tolerance)
    }
}

fn to_array<const N: usize>(values: &[f64], field: &'static str) -> Result<[f32; N], FrameError> {
    let mut out = [0.0f32; N];
    for (dst, src) in out.iter_mut().zip(values) {
        if !src.is_finite() {
            return Err(FrameError::NonFinite { field });
        }
        *dst = *src as f32;
    }
    Ok(out)
}

/// Element-wise tolerance comparison of two equally sized vectors
pub fn within(a: &[f32], b: &[f32], tolerance: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}

fn optional_within<const N: usize>(
    a: Option<&[f32; N]>,
    b: Option<&[f32; N]>,
    tolerance: f32,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => within(a, b, tolerance),
        (None, None) => true,
        _ => false,
    }
}
