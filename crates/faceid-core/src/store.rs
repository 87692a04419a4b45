//! Descriptor store: the persisted, ordered set of enrolled profiles.

use crate::medium::{KeyValueMedium, MediumError};
use crate::types::{label_for, Descriptor, Profile};
use thiserror::Error;

/// Key under which the full profile sequence is stored.
pub const STORE_KEY: &str = "face_profiles";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store: medium: {0}")]
    Medium(#[from] MediumError),
    #[error("store: serialize profiles: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Profile store over an injected key-value medium.
///
/// Every mutation is a full read-modify-write of the stored sequence.
pub struct DescriptorStore {
    medium: Box<dyn KeyValueMedium>,
}

impl DescriptorStore {
    pub fn new(medium: impl KeyValueMedium + 'static) -> Self {
        Self {
            medium: Box::new(medium),
        }
    }

    /// Read the persisted profiles. Missing, unreadable or corrupt data
    /// yields an empty set.
    pub fn load(&self) -> Vec<Profile> {
        self.read().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "profile read failed; treating store as empty");
            Vec::new()
        })
    }

    /// Like [`load`](Self::load), but a medium failure is an error. Used by
    /// the mutators so a failed read never gets written back as an empty set.
    fn read(&self) -> Result<Vec<Profile>, StoreError> {
        let Some(raw) = self.medium.get(STORE_KEY)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_slice::<Vec<Profile>>(&raw) {
            Ok(profiles) => Ok(profiles),
            Err(e) => {
                tracing::warn!(error = %e, bytes = raw.len(), "corrupt profile data; treating store as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Overwrite the persisted set.
    pub fn save(&self, profiles: &[Profile]) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(profiles)?;
        self.medium.set(STORE_KEY, &raw)?;
        Ok(())
    }

    /// Enroll a new descriptor at the end of the store. Returns the new
    /// profile and the full set as persisted.
    pub fn append(&self, descriptor: Descriptor) -> Result<(Profile, Vec<Profile>), StoreError> {
        let mut profiles = self.read()?;
        let profile = Profile {
            id: uuid::Uuid::new_v4().to_string(),
            label: label_for(profiles.len() + 1),
            descriptor,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        profiles.push(profile.clone());
        self.save(&profiles)?;

        tracing::info!(id = %profile.id, label = %profile.label, total = profiles.len(), "profile enrolled");
        Ok((profile, profiles))
    }

    /// Delete the profile with `id` and renumber the remaining labels.
    /// An unknown id leaves the store untouched.
    pub fn remove(&self, id: &str) -> Result<Vec<Profile>, StoreError> {
        let mut profiles = self.read()?;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            tracing::debug!(id, "remove: no such profile");
            return Ok(profiles);
        }

        for (i, profile) in profiles.iter_mut().enumerate() {
            profile.label = label_for(i + 1);
        }
        self.save(&profiles)?;

        tracing::info!(id, remaining = profiles.len(), "profile removed");
        Ok(profiles)
    }

    /// Remove every profile.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.medium.delete(STORE_KEY)?;
        tracing::info!("all profiles removed");
        Ok(())
    }
}
