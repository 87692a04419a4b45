use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::{render_hint, EnrollOutcome, Profile, SessionState, VerificationOutcome};
use faceid_hw::V4lCamera;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Parser)]
#[command(name = "faceid", about = "FaceID on-device face enrollment and verification")]
struct Cli {
    /// Minimum time a scan is shown as in progress, in milliseconds.
    #[arg(long, global = true, default_value_t = 0)]
    pace_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face in front of the camera as a new profile
    Enroll,
    /// Identify the face in front of the camera against enrolled profiles
    Identify,
    /// List enrolled profiles
    List,
    /// Remove an enrolled profile
    Remove {
        /// Profile ID to remove
        id: String,
    },
    /// Remove every enrolled profile
    Clear,
    /// Show daemon status
    Status,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device to open
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },
}

#[zbus::proxy(
    interface = "org.faceid.FaceId1",
    default_service = "org.faceid.FaceId1",
    default_path = "/org/faceid/FaceId1"
)]
trait FaceId {
    async fn enroll(&self) -> zbus::Result<String>;
    async fn identify(&self) -> zbus::Result<String>;
    async fn list_profiles(&self) -> zbus::Result<String>;
    async fn delete_profile(&self, id: &str) -> zbus::Result<String>;
    async fn delete_all_profiles(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let pace = Duration::from_millis(cli.pace_ms);

    match cli.command {
        Commands::Enroll => {
            let proxy = connect().await?;
            println!("Scanning…");
            let started = Instant::now();
            let outcome: Option<EnrollOutcome> = serde_json::from_str(&proxy.enroll().await?)?;
            if outcome.is_some() {
                tokio::time::sleep_until(started + pace).await;
            }
            match outcome {
                Some(EnrollOutcome::Enrolled(profile)) => {
                    println!("Enrolled {} ({})", profile.label, profile.id)
                }
                Some(EnrollOutcome::NoFace) => println!("No face detected; nothing enrolled"),
                None => println!("Busy or not ready; request ignored"),
            }
        }
        Commands::Identify => {
            let proxy = connect().await?;
            println!("Scanning…");
            let started = Instant::now();
            let outcome: Option<VerificationOutcome> = serde_json::from_str(&proxy.identify().await?)?;
            if outcome.is_some() {
                tokio::time::sleep_until(started + pace).await;
            }
            match outcome {
                Some(o) if o.accepted => {
                    let label = o.matched_profile.map(|p| p.label).unwrap_or_default();
                    println!(
                        "Identity verified: {label} (confidence {}%, distance {:.3})",
                        o.confidence, o.distance
                    );
                }
                Some(o) => println!(
                    "Verification failed (confidence {}%, distance {:.3})",
                    o.confidence, o.distance
                ),
                None => println!("Busy, not ready, or no profiles enrolled; request ignored"),
            }
            let profiles: Vec<Profile> = serde_json::from_str(&proxy.list_profiles().await?)?;
            println!("{} profile(s) enrolled", profiles.len());
        }
        Commands::List => {
            let proxy = connect().await?;
            let profiles: Vec<Profile> = serde_json::from_str(&proxy.list_profiles().await?)?;
            print_profiles(&profiles);
        }
        Commands::Remove { id } => {
            let proxy = connect().await?;
            let profiles: Vec<Profile> = serde_json::from_str(&proxy.delete_profile(&id).await?)?;
            print_profiles(&profiles);
        }
        Commands::Clear => {
            if connect().await?.delete_all_profiles().await? {
                println!("All profiles removed");
            } else {
                println!("Busy or not ready; profiles kept");
            }
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&connect().await?.status().await?)?;
            let state: SessionState = serde_json::from_value(status["state"].clone())?;
            println!("faceidd {}", status["version"].as_str().unwrap_or("?"));
            println!("  state:    {:?} ({})", state, render_hint(state).label);
            println!("  profiles: {}", status["profiles"]);
        }
        Commands::Test { device } => camera_test(&device)?,
    }

    Ok(())
}

async fn connect() -> Result<FaceIdProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = FaceIdProxy::new(&conn)
        .await
        .context("faceidd is not reachable")?;
    tracing::debug!("connected to faceidd");
    Ok(proxy)
}

fn print_profiles(profiles: &[Profile]) {
    if profiles.is_empty() {
        println!("No profiles enrolled");
        return;
    }
    for p in profiles {
        println!("{:<12} {}  {}", p.label, p.id, p.created_at);
    }
}

fn camera_test(device: &str) -> Result<()> {
    println!("Video capture devices:");
    for info in V4lCamera::list_devices() {
        println!("  {}  {} ({}, {})", info.path, info.name, info.driver, info.bus);
    }

    let mut camera = V4lCamera::open(device)?;
    println!(
        "Opened {} at {}x{} ({:?})",
        camera.device_path, camera.width, camera.height, camera.pixel_format
    );

    let frame = camera.capture_frame()?;
    println!(
        "Captured frame #{}: brightness {:.1}{}",
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark(0.95) { " (dark)" } else { "" }
    );
    Ok(())
}
