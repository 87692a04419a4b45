//! Detection capability backed by an external extractor process.
//!
//! The face detection, landmark and descriptor models run outside the
//! daemon. For every frame the extractor is invoked as
//! `<extractor> --model-dir <dir>` with the frame as a grayscale PNG on
//! stdin, and answers on stdout with one JSON object:
//!
//! ```json
//! {"descriptor": [0.012, -0.094, ...]}   // exactly one face
//! {"descriptor": null}                   // zero or several faces
//! ```

use faceid_core::{CaptureError, CaptureResources, Descriptor, DetectionCapability, Frame};
use faceid_hw::V4lCamera;
use image::{GrayImage, ImageFormat};
use serde::Deserialize;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("extractor not found: {0}")]
    NotFound(String),
    #[error("model directory not found: {0}")]
    ModelDirNotFound(String),
    #[error("frame buffer does not match {width}x{height}")]
    BadFrame { width: u32, height: u32 },
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to run extractor: {0}")]
    Io(#[from] std::io::Error),
    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("malformed extractor reply: {0}")]
    Reply(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct ExtractorReply {
    descriptor: Option<Vec<f32>>,
}

/// Runs the external extractor once per frame.
pub struct CommandExtractor {
    program: PathBuf,
    model_dir: PathBuf,
}

impl CommandExtractor {
    /// Check that the extractor and its model weights are in place.
    pub fn load(program: &Path, model_dir: &Path) -> Result<Self, ExtractorError> {
        if !program.exists() {
            return Err(ExtractorError::NotFound(program.display().to_string()));
        }
        if !model_dir.is_dir() {
            return Err(ExtractorError::ModelDirNotFound(model_dir.display().to_string()));
        }
        tracing::info!(
            program = %program.display(),
            models = %model_dir.display(),
            "descriptor extractor ready"
        );
        Ok(Self {
            program: program.to_path_buf(),
            model_dir: model_dir.to_path_buf(),
        })
    }

    fn run(&self, frame: &Frame) -> Result<Option<Descriptor>, ExtractorError> {
        let png = encode_png(frame)?;

        let mut child = Command::new(&self.program)
            .arg("--model-dir")
            .arg(&self.model_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let transcript = exchange(&mut child, &png);
        if transcript.is_err() {
            let _ = child.kill();
        }
        let status = child.wait()?;
        let transcript = transcript?;

        if !status.success() {
            return Err(ExtractorError::Failed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&transcript.stderr).trim().to_string(),
            });
        }
        transcript.written?;
        parse_reply(&transcript.stdout)
    }
}

/// Everything exchanged with one extractor run.
struct Transcript {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    written: io::Result<()>,
}

/// Feed `input` to the child's stdin while draining stdout and stderr, so
/// neither side can block on a full pipe. Kills the child if stdout cannot
/// be read.
fn exchange(child: &mut Child, input: &[u8]) -> io::Result<Transcript> {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    std::thread::scope(|scope| {
        let writer = scope.spawn(move || match stdin {
            Some(mut pipe) => pipe.write_all(input),
            None => Ok(()),
        });
        let err_reader = scope.spawn(move || drain(stderr));

        let out = drain(stdout);
        if out.is_err() {
            let _ = child.kill();
        }
        let err = err_reader
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stderr reader panicked")));
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));

        Ok(Transcript {
            stdout: out?,
            stderr: err?,
            written,
        })
    })
}

fn drain<R: Read>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

impl DetectionCapability for CommandExtractor {
    fn detect_single_face_descriptor(&mut self, frame: &Frame) -> Result<Option<Descriptor>, CaptureError> {
        self.run(frame)
            .map_err(|e| CaptureError::Detection(e.to_string()))
    }
}

/// Encode a grayscale frame as PNG.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, ExtractorError> {
    let image = GrayImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
        ExtractorError::BadFrame {
            width: frame.width,
            height: frame.height,
        },
    )?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Parse the extractor's stdout.
pub fn parse_reply(stdout: &[u8]) -> Result<Option<Descriptor>, ExtractorError> {
    let reply: ExtractorReply = serde_json::from_slice(stdout)?;
    Ok(reply.descriptor.map(Descriptor::new))
}

/// Production capture resources: V4L2 camera plus the external extractor.
pub struct DeviceResources {
    pub camera_device: String,
    pub extractor_path: PathBuf,
    pub model_dir: PathBuf,
}

impl CaptureResources for DeviceResources {
    type Detector = CommandExtractor;
    type Camera = V4lCamera;

    fn load_detection_models(&mut self) -> Result<CommandExtractor, CaptureError> {
        CommandExtractor::load(&self.extractor_path, &self.model_dir)
            .map_err(|e| CaptureError::ModelLoad(e.to_string()))
    }

    fn acquire_camera(&mut self) -> Result<V4lCamera, CaptureError> {
        Ok(V4lCamera::open(&self.camera_device)?)
    }
}
