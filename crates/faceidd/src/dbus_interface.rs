use faceid_core::{render_hint, SessionController};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.faceid.FaceId1";
pub const OBJECT_PATH: &str = "/org/faceid/FaceId1";

/// D-Bus interface for the FaceID daemon.
///
/// Results are JSON strings. Requests that are not valid for the current
/// session state answer `null` rather than failing.
pub struct FaceIdService {
    session: Arc<SessionController>,
}

impl FaceIdService {
    pub fn new(session: Arc<SessionController>) -> Self {
        Self { session }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.faceid.FaceId1")]
impl FaceIdService {
    /// Capture a frame and enroll it as a new profile.
    async fn enroll(&self) -> zbus::fdo::Result<String> {
        tracing::info!("enroll requested");
        let outcome = self.session.request_enroll().await.map_err(failed)?;
        to_json(&outcome)
    }

    /// Capture a frame and compare it against every enrolled profile.
    async fn identify(&self) -> zbus::fdo::Result<String> {
        tracing::info!("identify requested");
        let outcome = self.session.request_identify().await.map_err(failed)?;
        to_json(&outcome)
    }

    async fn list_profiles(&self) -> zbus::fdo::Result<String> {
        to_json(&self.session.list_profiles())
    }

    /// Remove one profile; returns the renumbered profile list.
    async fn delete_profile(&self, id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, "delete_profile requested");
        let remaining = self.session.delete_profile(id).map_err(failed)?;
        to_json(&remaining)
    }

    /// Remove every profile; `false` when the session ignored the request.
    async fn delete_all_profiles(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("delete_all_profiles requested");
        self.session.delete_all_profiles().map_err(failed)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.session.state();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": state,
            "hint": render_hint(state),
            "profiles": self.session.list_profiles().len(),
        })
        .to_string())
    }
}
