//! Presentation projection of the session state.
//!
//! Front-ends derive everything they display from [`render_hint`]; nothing
//! here feeds back into the controller.

use crate::session::SessionState;
use serde::Serialize;

/// What a front-end should show for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderHint {
    pub label: &'static str,
    /// Accent colour as `#rrggbb`.
    pub accent: &'static str,
    /// Whether the live camera view should be visible.
    pub show_camera: bool,
    /// A long-running operation is in progress.
    pub busy: bool,
    /// Whether enroll/identify controls should be offered.
    pub actions_enabled: bool,
}

const CYAN: &str = "#00ffff";
const GREEN: &str = "#00ff88";
const AMBER: &str = "#ffaa00";
const RED: &str = "#ff003c";

pub fn render_hint(state: SessionState) -> RenderHint {
    use SessionState::*;

    let (label, accent) = match state {
        Initializing => ("Cargando modelos de IA…", CYAN),
        CameraBlocked => ("Cámara bloqueada", RED),
        AwaitingEnrollment => ("Sin perfiles registrados", AMBER),
        Ready => ("Sistema listo", GREEN),
        Scanning => ("Analizando rostro…", CYAN),
        Success => ("Identidad verificada", GREEN),
        Failure => ("Verificación fallida", RED),
    };

    RenderHint {
        label,
        accent,
        show_camera: !matches!(state, Initializing | CameraBlocked),
        busy: matches!(state, Initializing | Scanning),
        actions_enabled: matches!(state, AwaitingEnrollment | Ready),
    }
}
