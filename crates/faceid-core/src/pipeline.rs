//! Capture pipeline: turns a live camera frame into at most one descriptor.
//!
//! Model loading, camera access and inference are blocking, so they run on
//! a dedicated OS thread. The async side talks to it through a
//! [`CaptureHandle`]: requests go over an mpsc queue (served in FIFO order)
//! and each reply comes back on its own oneshot channel.
//!
//! The camera lives in a guard on the pipeline thread and is released on
//! every exit path: failed startup, an abandoned initialization, or the
//! last handle being dropped.

use crate::frame::Frame;
use crate::types::{Descriptor, DESCRIPTOR_DIM};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("detection models failed to load: {0}")]
    ModelLoad(String),
    #[error("camera unavailable: {0}")]
    Camera(String),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(String),
    #[error("frame capture failed: {0}")]
    Frame(String),
    #[error("descriptor extraction failed: {0}")]
    Detection(String),
    #[error("descriptor has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("capture did not resolve within {0:?}")]
    TimedOut(Duration),
    #[error("capture thread exited")]
    ChannelClosed,
}

/// Face detection + descriptor extraction capability.
pub trait DetectionCapability {
    /// Extract the descriptor of the single face in `frame`.
    ///
    /// Returns `Ok(None)` when no usable single face is present; several
    /// faces are not disambiguated.
    fn detect_single_face_descriptor(&mut self, frame: &Frame) -> Result<Option<Descriptor>, CaptureError>;
}

/// A live camera stream.
pub trait CameraResource {
    fn grab_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the device. Must be idempotent.
    fn release(&mut self);
}

/// Factories for the resources the pipeline needs. Invoked once, on the
/// pipeline thread, in order: models first, then the camera.
pub trait CaptureResources: Send + 'static {
    type Detector: DetectionCapability;
    type Camera: CameraResource;

    fn load_detection_models(&mut self) -> Result<Self::Detector, CaptureError>;

    fn acquire_camera(&mut self) -> Result<Self::Camera, CaptureError>;
}

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Expected descriptor length; anything else is rejected.
    pub descriptor_dim: usize,
    /// Frames discarded after acquiring the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Upper bound on one capture request, `None` for no limit.
    pub capture_timeout: Option<Duration>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            descriptor_dim: DESCRIPTOR_DIM,
            warmup_frames: 0,
            capture_timeout: None,
        }
    }
}

enum CaptureRequest {
    Descriptor {
        reply: oneshot::Sender<Result<Option<Descriptor>, CaptureError>>,
    },
}

/// Clone-safe handle to the pipeline thread.
#[derive(Clone)]
pub struct CaptureHandle {
    tx: mpsc::Sender<CaptureRequest>,
    timeout: Option<Duration>,
}

impl CaptureHandle {
    /// Spawn the pipeline thread and wait until models and camera are ready.
    ///
    /// If the returned future is dropped before it resolves, the thread
    /// notices the abandoned readiness channel and releases whatever it
    /// acquired.
    pub async fn start<R: CaptureResources>(
        resources: R,
        options: CaptureOptions,
    ) -> Result<Self, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel::<CaptureRequest>(4);
        let dim = options.descriptor_dim;
        let warmup = options.warmup_frames;

        std::thread::Builder::new()
            .name("faceid-capture".into())
            .spawn(move || run_pipeline(resources, dim, warmup, rx, ready_tx))
            .map_err(|e| CaptureError::Spawn(e.to_string()))?;

        ready_rx.await.map_err(|_| CaptureError::ChannelClosed)??;

        Ok(Self {
            tx,
            timeout: options.capture_timeout,
        })
    }

    /// Grab one frame and extract its descriptor, if exactly one face is usable.
    ///
    /// The timeout covers queueing as well as the capture itself, so a
    /// pipeline stuck on an earlier request cannot block the caller.
    pub async fn capture_descriptor(&self) -> Result<Option<Descriptor>, CaptureError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.request())
                .await
                .map_err(|_| CaptureError::TimedOut(limit))?,
            None => self.request().await,
        }
    }

    async fn request(&self) -> Result<Option<Descriptor>, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CaptureRequest::Descriptor { reply: reply_tx })
            .await
            .map_err(|_| CaptureError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CaptureError::ChannelClosed)?
    }
}

/// Releases the camera when dropped.
struct CameraGuard<C: CameraResource>(C);

impl<C: CameraResource> Drop for CameraGuard<C> {
    fn drop(&mut self) {
        self.0.release();
        tracing::info!("camera released");
    }
}

fn run_pipeline<R: CaptureResources>(
    mut resources: R,
    dim: usize,
    warmup: usize,
    mut rx: mpsc::Receiver<CaptureRequest>,
    ready: oneshot::Sender<Result<(), CaptureError>>,
) {
    let mut detector = match resources.load_detection_models() {
        Ok(d) => d,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    tracing::info!("detection models loaded");

    if ready.is_closed() {
        tracing::info!("initialization abandoned before camera acquisition");
        return;
    }

    let mut camera = match resources.acquire_camera() {
        Ok(c) => CameraGuard(c),
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    tracing::info!("camera acquired");

    if warmup > 0 {
        tracing::info!(count = warmup, "discarding warmup frames");
        for _ in 0..warmup {
            if let Err(e) = camera.0.grab_frame() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }
    }

    if ready.send(Ok(())).is_err() {
        tracing::info!("initialization abandoned after camera acquisition");
        return;
    }

    tracing::info!("capture thread ready");
    while let Some(req) = rx.blocking_recv() {
        match req {
            CaptureRequest::Descriptor { reply } => {
                if reply.is_closed() {
                    tracing::debug!("capture request abandoned before it was served");
                    continue;
                }
                let result = capture_one(&mut camera.0, &mut detector, dim);
                let _ = reply.send(result);
            }
        }
    }
    tracing::info!("capture thread exiting");
}

fn capture_one<C: CameraResource, D: DetectionCapability>(
    camera: &mut C,
    detector: &mut D,
    dim: usize,
) -> Result<Option<Descriptor>, CaptureError> {
    let frame = camera.grab_frame()?;
    tracing::debug!(
        width = frame.width,
        height = frame.height,
        seq = frame.sequence,
        brightness = frame.avg_brightness(),
        "frame captured"
    );

    let Some(descriptor) = detector.detect_single_face_descriptor(&frame)? else {
        tracing::debug!(seq = frame.sequence, "no single face in frame");
        return Ok(None);
    };

    if descriptor.len() != dim {
        return Err(CaptureError::Dimension {
            expected: dim,
            actual: descriptor.len(),
        });
    }
    if !descriptor.is_finite() {
        return Err(CaptureError::Detection("descriptor contains non-finite values".into()));
    }
    Ok(Some(descriptor))
}
