use serde::{Deserialize, Serialize};

/// Dimensionality of descriptors produced by the extraction capability.
pub const DESCRIPTOR_DIM: usize = 128;

/// Distance reported for an identify attempt that found no usable face.
pub const NO_FACE_DISTANCE: f32 = 1.0;

/// Prefix of the positional, human-readable profile label.
pub const LABEL_PREFIX: &str = "Registro";

/// Face descriptor: fixed-length feature vector for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// No NaN or infinite component. JSON cannot represent those.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// An enrolled identity.
///
/// `label` is a view over the profile's position in the store and is
/// rewritten whenever the store changes size; only `id` is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub label: String,
    pub descriptor: Descriptor,
    /// RFC 3339 enrollment time; empty for profiles stored without one.
    #[serde(default)]
    pub created_at: String,
}

/// Label for the profile at 1-based `position`.
pub fn label_for(position: usize) -> String {
    format!("{LABEL_PREFIX} {position}")
}

/// Result of one identify attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub accepted: bool,
    /// Minimum distance found, or [`NO_FACE_DISTANCE`] when no face was seen.
    pub distance: f32,
    /// Present only when `accepted` is true.
    pub matched_profile: Option<Profile>,
    /// Display confidence, 0-100. See [`confidence_percent`](crate::matcher::confidence_percent).
    #[serde(default)]
    pub confidence: u8,
}

impl VerificationOutcome {
    pub fn no_face() -> Self {
        Self {
            accepted: false,
            distance: NO_FACE_DISTANCE,
            matched_profile: None,
            confidence: 0,
        }
    }
}

/// Result of one enroll attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "profile", rename_all = "snake_case")]
pub enum EnrollOutcome {
    Enrolled(Profile),
    NoFace,
}
