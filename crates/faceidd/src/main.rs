use anyhow::Result;
use faceid_core::{DescriptorStore, EuclideanMatcher, SessionController, SessionState, SqliteMedium};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod extractor;

use dbus_interface::{FaceIdService, BUS_NAME, OBJECT_PATH};
use extractor::DeviceResources;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        "faceidd starting"
    );

    let medium = SqliteMedium::open(&config.db_path)?;
    let session = Arc::new(SessionController::new(
        DescriptorStore::new(medium),
        EuclideanMatcher::new(config.match_threshold),
    ));

    let mut transitions = session.subscribe();
    tokio::spawn(async move {
        while let Ok(state) = transitions.recv().await {
            match state {
                SessionState::CameraBlocked => {
                    tracing::warn!("camera blocked; restart faceidd after fixing the device or models")
                }
                other => tracing::info!(state = ?other, "session state"),
            }
        }
    });

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceIdService::new(Arc::clone(&session)))?
        .build()
        .await?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus service registered");

    let resources = DeviceResources {
        camera_device: config.camera_device.clone(),
        extractor_path: config.extractor_path.clone(),
        model_dir: config.model_dir.clone(),
    };

    tokio::select! {
        _ = session.initialize(resources, config.capture_options()) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupted during initialization");
            session.shutdown();
            return Ok(());
        }
    }
    tracing::info!(state = ?session.state(), profiles = session.list_profiles().len(), "faceidd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("faceidd shutting down");
    session.shutdown();

    Ok(())
}
