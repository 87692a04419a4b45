//! faceid-core — on-device face enrollment and verification engine.
//!
//! Profiles live in a [`DescriptorStore`] over a pluggable key-value
//! medium. A [`SessionController`] drives camera/model readiness, runs one
//! scan at a time through the capture pipeline, and decides identity with
//! a Euclidean nearest-neighbour [`Matcher`].

pub mod frame;
pub mod hint;
pub mod matcher;
pub mod medium;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod types;

pub use frame::Frame;
pub use hint::{render_hint, RenderHint};
pub use matcher::{
    confidence_percent, euclidean_distance, EuclideanMatcher, MatchError, MatchOutcome, Matcher, DEFAULT_THRESHOLD,
};
pub use medium::{KeyValueMedium, MediumError, MemoryMedium, SqliteMedium};
pub use pipeline::{
    CameraResource, CaptureError, CaptureHandle, CaptureOptions, CaptureResources, DetectionCapability,
};
pub use session::{SessionController, SessionError, SessionState};
pub use store::{DescriptorStore, StoreError};
pub use types::{Descriptor, EnrollOutcome, Profile, VerificationOutcome, DESCRIPTOR_DIM, NO_FACE_DISTANCE};
