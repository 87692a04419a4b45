//! Session controller: the enrollment/verification state machine.
//!
//! Owns the profile cache and the capture pipeline, serializes scans (at
//! most one in flight), and is the only writer of the descriptor store.
//! State lives behind a `std::sync::Mutex` that is never held across an
//! await; store writes happen under that lock, so read-modify-write cycles
//! never interleave.

use crate::matcher::{MatchError, Matcher};
use crate::pipeline::{CaptureError, CaptureHandle, CaptureOptions, CaptureResources};
use crate::store::{DescriptorStore, StoreError};
use crate::types::{Descriptor, EnrollOutcome, Profile, VerificationOutcome};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Loading the detection capability and acquiring the camera.
    Initializing,
    /// Resource acquisition failed. Terminal for this session.
    CameraBlocked,
    /// Resources ready, no profiles enrolled.
    AwaitingEnrollment,
    /// Resources ready, at least one profile, no scan in flight.
    Ready,
    /// A capture is in flight.
    Scanning,
    /// Identify matched a profile.
    Success,
    /// Identify found no face or no profile under threshold.
    Failure,
}

impl SessionState {
    /// Resources are up and no scan is running.
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            Self::AwaitingEnrollment | Self::Ready | Self::Success | Self::Failure
        )
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("profile store: {0}")]
    Store(#[from] StoreError),
    #[error("match engine: {0}")]
    Match(#[from] MatchError),
    #[error("capture pipeline lost: {0}")]
    Capture(#[from] CaptureError),
}

/// How a capture resolved, from the controller's point of view.
enum Captured {
    Face(Descriptor),
    NoFace,
    Lost(CaptureError),
}

struct Inner {
    state: SessionState,
    profiles: Vec<Profile>,
    capture: Option<CaptureHandle>,
    init_started: bool,
    torn_down: bool,
}

const EVENT_CAPACITY: usize = 16;

/// Puts the session back to rest if a scan future is dropped while the
/// capture is still in flight.
struct ScanGuard<'a> {
    session: &'a SessionController,
    armed: bool,
}

impl ScanGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.session.lock();
        if inner.torn_down || inner.state != SessionState::Scanning {
            return;
        }
        tracing::debug!("scan abandoned by caller");
        let next = resting_state(&inner.profiles);
        self.session.transition(&mut inner, next);
    }
}

/// Enrollment/verification session over an injected store and matcher.
pub struct SessionController {
    store: DescriptorStore,
    matcher: Box<dyn Matcher>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionState>,
}

impl SessionController {
    /// Create a session in `Initializing`, loading the persisted profiles.
    pub fn new(store: DescriptorStore, matcher: impl Matcher + 'static) -> Self {
        let profiles = store.load();
        tracing::info!(profiles = profiles.len(), "session created");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            matcher: Box::new(matcher),
            inner: Mutex::new(Inner {
                state: SessionState::Initializing,
                profiles,
                capture: None,
                init_started: false,
                torn_down: false,
            }),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Stream of state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.events.subscribe()
    }

    pub fn list_profiles(&self) -> Vec<Profile> {
        self.lock().profiles.clone()
    }

    /// Acquire the detection capability and camera. Only the first call
    /// does anything.
    pub async fn initialize<R: CaptureResources>(&self, resources: R, options: CaptureOptions) {
        {
            let mut inner = self.lock();
            if inner.init_started || inner.torn_down {
                return;
            }
            inner.init_started = true;
        }

        let started = CaptureHandle::start(resources, options).await;

        let mut inner = self.lock();
        if inner.torn_down {
            // Dropping the handle here releases the camera.
            tracing::info!("session torn down during initialization");
            return;
        }

        match started {
            Ok(handle) => {
                inner.capture = Some(handle);
                let next = resting_state(&inner.profiles);
                self.transition(&mut inner, next);
            }
            Err(e) => {
                tracing::error!(error = %e, "resource acquisition failed");
                self.transition(&mut inner, SessionState::CameraBlocked);
            }
        }
    }

    /// Capture a frame and enroll its face as a new profile.
    ///
    /// `Ok(None)` means the request was ignored for the current state.
    pub async fn request_enroll(&self) -> Result<Option<EnrollOutcome>, SessionError> {
        let (capture, prior) = {
            let mut inner = self.lock();
            let prior = inner.state;
            if inner.torn_down
                || !matches!(prior, SessionState::Ready | SessionState::AwaitingEnrollment)
            {
                tracing::debug!(state = ?prior, "enroll ignored");
                return Ok(None);
            }
            let Some(capture) = inner.capture.clone() else {
                return Ok(None);
            };
            self.transition(&mut inner, SessionState::Scanning);
            (capture, prior)
        };

        let mut guard = ScanGuard {
            session: self,
            armed: true,
        };
        let captured = capture.capture_descriptor().await;
        guard.disarm();

        let mut inner = self.lock();
        if inner.torn_down {
            tracing::debug!("enroll resolved after teardown; discarded");
            return Ok(None);
        }

        match self.classify(&mut inner, captured) {
            Captured::Face(descriptor) => match self.store.append(descriptor) {
                Ok((profile, stored)) => {
                    inner.profiles = stored;
                    self.transition(&mut inner, SessionState::Ready);
                    Ok(Some(EnrollOutcome::Enrolled(profile)))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "enroll: profile not persisted");
                    self.transition(&mut inner, prior);
                    Err(e.into())
                }
            },
            Captured::NoFace => {
                self.transition(&mut inner, prior);
                Ok(Some(EnrollOutcome::NoFace))
            }
            Captured::Lost(e) => Err(e.into()),
        }
    }

    /// Capture a frame and compare it against every enrolled profile.
    ///
    /// `Ok(None)` means the request was ignored: not `Ready`, a scan is
    /// already in flight, or there is nothing to match against.
    pub async fn request_identify(&self) -> Result<Option<VerificationOutcome>, SessionError> {
        let (capture, snapshot) = {
            let mut inner = self.lock();
            if inner.torn_down || inner.state != SessionState::Ready {
                tracing::debug!(state = ?inner.state, "identify ignored");
                return Ok(None);
            }
            if inner.profiles.is_empty() {
                self.transition(&mut inner, SessionState::AwaitingEnrollment);
                return Ok(None);
            }
            let Some(capture) = inner.capture.clone() else {
                return Ok(None);
            };
            self.transition(&mut inner, SessionState::Scanning);
            (capture, inner.profiles.clone())
        };

        let mut guard = ScanGuard {
            session: self,
            armed: true,
        };
        let captured = capture.capture_descriptor().await;
        guard.disarm();

        let mut inner = self.lock();
        if inner.torn_down {
            tracing::debug!("identify resolved after teardown; discarded");
            return Ok(None);
        }

        let outcome = match self.classify(&mut inner, captured) {
            Captured::Face(query) => match self.matcher.compare(&query, &snapshot) {
                Ok(m) => VerificationOutcome {
                    accepted: m.accepted,
                    distance: m.min_distance,
                    matched_profile: m.matched_profile,
                    confidence: m.confidence,
                },
                Err(e) => {
                    tracing::error!(error = %e, "match engine precondition violated");
                    let next = resting_state(&inner.profiles);
                    self.transition(&mut inner, next);
                    return Err(e.into());
                }
            },
            Captured::NoFace => VerificationOutcome::no_face(),
            Captured::Lost(e) => return Err(e.into()),
        };

        tracing::info!(
            accepted = outcome.accepted,
            distance = outcome.distance,
            label = outcome.matched_profile.as_ref().map(|p| p.label.as_str()),
            "identify resolved"
        );

        let verdict = if outcome.accepted {
            SessionState::Success
        } else {
            SessionState::Failure
        };
        self.transition(&mut inner, verdict);
        let next = resting_state(&inner.profiles);
        self.transition(&mut inner, next);

        Ok(Some(outcome))
    }

    /// Remove one profile. Ignored (returns the current set) unless idle.
    pub fn delete_profile(&self, id: &str) -> Result<Vec<Profile>, SessionError> {
        let mut inner = self.lock();
        if inner.torn_down || !inner.state.is_idle() {
            tracing::debug!(state = ?inner.state, "delete ignored");
            return Ok(inner.profiles.clone());
        }

        let remaining = self.store.remove(id)?;
        inner.profiles = remaining.clone();
        let next = resting_state(&remaining);
        self.transition(&mut inner, next);
        Ok(remaining)
    }

    /// Remove every profile. Returns `false` when the request was ignored
    /// because the session is not idle.
    pub fn delete_all_profiles(&self) -> Result<bool, SessionError> {
        let mut inner = self.lock();
        if inner.torn_down || !inner.state.is_idle() {
            tracing::debug!(state = ?inner.state, "delete-all ignored");
            return Ok(false);
        }

        self.store.clear()?;
        inner.profiles.clear();
        self.transition(&mut inner, SessionState::AwaitingEnrollment);
        Ok(true)
    }

    /// Tear the session down: release the pipeline and ignore the eventual
    /// resolution of anything still in flight.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.torn_down {
            return;
        }
        inner.torn_down = true;
        inner.capture = None;
        tracing::info!(state = ?inner.state, "session torn down");
    }

    fn classify(&self, inner: &mut Inner, captured: Result<Option<Descriptor>, CaptureError>) -> Captured {
        match captured {
            Ok(Some(descriptor)) => Captured::Face(descriptor),
            Ok(None) => {
                tracing::info!("no face detected");
                Captured::NoFace
            }
            Err(CaptureError::ChannelClosed) => {
                tracing::error!("capture pipeline exited; camera considered lost");
                inner.capture = None;
                self.transition(inner, SessionState::CameraBlocked);
                Captured::Lost(CaptureError::ChannelClosed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture failed; treating as no face");
                Captured::NoFace
            }
        }
    }

    fn transition(&self, inner: &mut Inner, next: SessionState) {
        if inner.state == next {
            return;
        }
        tracing::debug!(from = ?inner.state, to = ?next, "state transition");
        inner.state = next;
        let _ = self.events.send(next);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn resting_state(profiles: &[Profile]) -> SessionState {
    if profiles.is_empty() {
        SessionState::AwaitingEnrollment
    } else {
        SessionState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EuclideanMatcher;
    use crate::medium::testing::FlakyMedium;
    use crate::medium::MemoryMedium;
    use crate::pipeline::testing::{Counters, FakeResources};
    use std::sync::Arc;
    use std::time::Duration;

    fn d2(a: f32, b: f32) -> Descriptor {
        Descriptor::new(vec![a, b])
    }

    fn opts() -> CaptureOptions {
        CaptureOptions {
            descriptor_dim: 2,
            ..CaptureOptions::default()
        }
    }

    /// Session over a medium pre-seeded with `seed` descriptors.
    fn session_with(seed: &[Descriptor]) -> (SessionController, MemoryMedium) {
        let medium = MemoryMedium::new();
        let seeding = DescriptorStore::new(medium.clone());
        for d in seed {
            seeding.append(d.clone()).unwrap();
        }
        let session = SessionController::new(DescriptorStore::new(medium.clone()), EuclideanMatcher::default());
        (session, medium)
    }

    /// Initialized session over a medium that can be made to fail.
    async fn flaky_session(seed: &[Descriptor], script: Vec<Option<Descriptor>>) -> (SessionController, FlakyMedium) {
        let medium = FlakyMedium::default();
        let seeding = DescriptorStore::new(medium.clone());
        for d in seed {
            seeding.append(d.clone()).unwrap();
        }
        let session = SessionController::new(DescriptorStore::new(medium.clone()), EuclideanMatcher::default());
        session.initialize(FakeResources::new(script), opts()).await;
        (session, medium)
    }

    fn labels(profiles: &[Profile]) -> Vec<&str> {
        profiles.iter().map(|p| p.label.as_str()).collect()
    }

    async fn ready_session(
        seed: &[Descriptor],
        script: Vec<Option<Descriptor>>,
    ) -> (SessionController, MemoryMedium, Counters) {
        let (session, medium) = session_with(seed);
        let resources = FakeResources::new(script);
        let counters = resources.counters.clone();
        session.initialize(resources, opts()).await;
        (session, medium, counters)
    }

    async fn wait_for(rx: &mut broadcast::Receiver<SessionState>, wanted: SessionState) {
        loop {
            if rx.recv().await.unwrap() == wanted {
                return;
            }
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SessionState>) -> Vec<SessionState> {
        let mut seen = Vec::new();
        while let Ok(s) = rx.try_recv() {
            seen.push(s);
        }
        seen
    }

    #[tokio::test]
    async fn test_initialize_without_profiles_awaits_enrollment() {
        let (session, _, _) = ready_session(&[], vec![]).await;
        assert_eq!(session.state(), SessionState::AwaitingEnrollment);
    }

    #[tokio::test]
    async fn test_initialize_with_profiles_is_ready() {
        let (session, _, _) = ready_session(&[d2(0.0, 0.0)], vec![]).await;
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.list_profiles().len(), 1);
    }

    #[tokio::test]
    async fn test_starts_initializing() {
        let (session, _) = session_with(&[]);
        assert_eq!(session.state(), SessionState::Initializing);
        assert_eq!(session.request_enroll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resource_failure_blocks_camera() {
        let (session, _) = session_with(&[d2(0.0, 0.0)]);
        session
            .initialize(FakeResources::new(vec![]).failing_camera(), opts())
            .await;
        assert_eq!(session.state(), SessionState::CameraBlocked);

        assert_eq!(session.request_identify().await.unwrap(), None);
        assert_eq!(session.request_enroll().await.unwrap(), None);
        assert_eq!(session.state(), SessionState::CameraBlocked);
    }

    #[tokio::test]
    async fn test_model_failure_blocks_camera() {
        let (session, _) = session_with(&[]);
        session
            .initialize(FakeResources::new(vec![]).failing_models(), opts())
            .await;
        assert_eq!(session.state(), SessionState::CameraBlocked);
    }

    #[tokio::test]
    async fn test_enroll_first_profile() {
        let (session, medium, _) = ready_session(&[], vec![Some(d2(0.1, 0.2))]).await;
        let mut rx = session.subscribe();

        let outcome = session.request_enroll().await.unwrap().unwrap();
        let EnrollOutcome::Enrolled(profile) = outcome else {
            panic!("expected enrollment");
        };
        assert_eq!(profile.label, "Registro 1");
        assert_eq!(profile.descriptor, d2(0.1, 0.2));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(drain(&mut rx), vec![SessionState::Scanning, SessionState::Ready]);

        let persisted = DescriptorStore::new(medium).load();
        assert_eq!(persisted, vec![profile]);
    }

    #[tokio::test]
    async fn test_enroll_without_face_reverts_state() {
        let (session, medium, _) = ready_session(&[], vec![None]).await;

        let outcome = session.request_enroll().await.unwrap();
        assert_eq!(outcome, Some(EnrollOutcome::NoFace));
        assert_eq!(session.state(), SessionState::AwaitingEnrollment);
        assert!(DescriptorStore::new(medium).load().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_wrong_dimension_counts_as_no_face() {
        let script = vec![Some(Descriptor::new(vec![0.0; 5]))];
        let (session, _, _) = ready_session(&[d2(0.0, 0.0)], script).await;

        assert_eq!(session.request_enroll().await.unwrap(), Some(EnrollOutcome::NoFace));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.list_profiles().len(), 1);
    }

    #[tokio::test]
    async fn test_identify_accepts_closest_profile() {
        let seed = [d2(0.3, 0.0), d2(0.0, 0.6)];
        let (session, _, _) = ready_session(&seed, vec![Some(d2(0.0, 0.0))]).await;
        let first_id = session.list_profiles()[0].id.clone();
        let mut rx = session.subscribe();

        let outcome = session.request_identify().await.unwrap().unwrap();
        assert!(outcome.accepted);
        assert!((outcome.distance - 0.3).abs() < 1e-6);
        assert_eq!(outcome.matched_profile.unwrap().id, first_id);
        assert_eq!(
            drain(&mut rx),
            vec![SessionState::Scanning, SessionState::Success, SessionState::Ready]
        );
    }

    #[tokio::test]
    async fn test_identify_rejects_distant_face() {
        let seed = [d2(0.6, 0.0), d2(0.0, 0.7)];
        let (session, _, _) = ready_session(&seed, vec![Some(d2(0.0, 0.0))]).await;
        let mut rx = session.subscribe();

        let outcome = session.request_identify().await.unwrap().unwrap();
        assert!(!outcome.accepted);
        assert!((outcome.distance - 0.6).abs() < 1e-6);
        assert!(outcome.matched_profile.is_none());
        assert_eq!(
            drain(&mut rx),
            vec![SessionState::Scanning, SessionState::Failure, SessionState::Ready]
        );
    }

    #[tokio::test]
    async fn test_identify_without_face_fails_with_sentinel() {
        let (session, _, _) = ready_session(&[d2(0.0, 0.0)], vec![None]).await;

        let outcome = session.request_identify().await.unwrap().unwrap();
        assert_eq!(outcome, VerificationOutcome::no_face());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_identify_with_empty_store_never_scans() {
        let (session, _, counters) = ready_session(&[], vec![Some(d2(0.0, 0.0))]).await;

        assert_eq!(session.request_identify().await.unwrap(), None);
        assert_eq!(session.state(), SessionState::AwaitingEnrollment);
        assert_eq!(Counters::get(&counters.detections), 0);
    }

    #[tokio::test]
    async fn test_identify_while_scanning_is_noop() {
        let (session, _) = session_with(&[d2(0.0, 0.0)]);
        let mut resources = FakeResources::new(vec![Some(d2(0.0, 0.0))]);
        let gate = resources.gate_detection();
        let counters = resources.counters.clone();
        session.initialize(resources, opts()).await;

        let session = Arc::new(session);
        let mut rx = session.subscribe();
        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.request_identify().await }
        });
        wait_for(&mut rx, SessionState::Scanning).await;

        assert_eq!(session.request_identify().await.unwrap(), None);
        assert_eq!(session.request_enroll().await.unwrap(), None);
        assert!(!session.delete_all_profiles().unwrap());
        assert_eq!(session.list_profiles().len(), 1);

        gate.send(()).unwrap();
        let outcome = first.await.unwrap().unwrap().unwrap();
        assert!(outcome.accepted);
        assert_eq!(Counters::get(&counters.detections), 1);
        assert_eq!(Counters::get(&counters.grabs), 1);
    }

    #[tokio::test]
    async fn test_delete_profile_renumbers_and_updates_state() {
        let seed = [d2(0.0, 0.0), d2(1.0, 0.0), d2(2.0, 0.0)];
        let (session, medium, _) = ready_session(&seed, vec![]).await;
        let ids: Vec<String> = session.list_profiles().into_iter().map(|p| p.id).collect();

        let remaining = session.delete_profile(&ids[0]).unwrap();
        let labels: Vec<&str> = remaining.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Registro 1", "Registro 2"]);
        assert_eq!(remaining[0].id, ids[1]);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(DescriptorStore::new(medium).load(), remaining);

        session.delete_profile(&ids[1]).unwrap();
        session.delete_profile(&ids[2]).unwrap();
        assert!(session.list_profiles().is_empty());
        assert_eq!(session.state(), SessionState::AwaitingEnrollment);
    }

    #[tokio::test]
    async fn test_delete_unknown_profile_keeps_everything() {
        let (session, _, _) = ready_session(&[d2(0.0, 0.0)], vec![]).await;
        let before = session.list_profiles();
        assert_eq!(session.delete_profile("nope").unwrap(), before);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_delete_all_profiles() {
        let (session, medium, _) = ready_session(&[d2(0.0, 0.0), d2(1.0, 1.0)], vec![]).await;

        assert!(session.delete_all_profiles().unwrap());
        assert!(session.list_profiles().is_empty());
        assert_eq!(session.state(), SessionState::AwaitingEnrollment);
        assert!(DescriptorStore::new(medium).load().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_after_delete_all_resumes() {
        let script = vec![Some(d2(0.5, 0.5)), Some(d2(0.5, 0.5))];
        let (session, _, _) = ready_session(&[d2(0.0, 0.0)], script).await;
        session.delete_all_profiles().unwrap();

        session.request_enroll().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        let outcome = session.request_identify().await.unwrap().unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.matched_profile.unwrap().label, "Registro 1");
    }

    #[tokio::test]
    async fn test_match_precondition_violation_surfaces() {
        // a stored 3-dim descriptor cannot be compared with a 2-dim query
        let (session, _, _) =
            ready_session(&[Descriptor::new(vec![0.0; 3])], vec![Some(d2(0.0, 0.0))]).await;

        let err = session.request_identify().await.unwrap_err();
        assert!(matches!(err, SessionError::Match(MatchError::DimensionMismatch { .. })));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_discards_inflight_scan_and_releases_camera() {
        let (session, medium) = session_with(&[]);
        let mut resources = FakeResources::new(vec![Some(d2(0.1, 0.1))]);
        let gate = resources.gate_detection();
        let counters = resources.counters.clone();
        session.initialize(resources, opts()).await;

        let session = Arc::new(session);
        let mut rx = session.subscribe();
        let inflight = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.request_enroll().await }
        });
        wait_for(&mut rx, SessionState::Scanning).await;

        session.shutdown();
        gate.send(()).unwrap();

        assert_eq!(inflight.await.unwrap().unwrap(), None);
        assert!(DescriptorStore::new(medium).load().is_empty());
        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(counters.wait_released().await, 1);
        assert_eq!(session.request_enroll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_during_initialization_releases_camera() {
        let (session, _) = session_with(&[]);
        let mut resources = FakeResources::new(vec![]);
        let loading = resources.gate_loading();
        let counters = resources.counters.clone();

        let session = Arc::new(session);
        let init = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.initialize(resources, opts()).await }
        });
        while !session.lock().init_started {
            tokio::task::yield_now().await;
        }

        session.shutdown();
        loading.send(()).unwrap();
        init.await.unwrap();

        assert_eq!(session.state(), SessionState::Initializing);
        assert_eq!(counters.wait_released().await, 1);
        assert_eq!(Counters::get(&counters.acquisitions), 1);
    }

    #[tokio::test]
    async fn test_stuck_detector_never_wedges_the_session() {
        let (session, _) = session_with(&[d2(0.0, 0.0)]);
        let mut resources = FakeResources::new(vec![]);
        let _gate = resources.gate_detection();
        let options = CaptureOptions {
            descriptor_dim: 2,
            warmup_frames: 0,
            capture_timeout: Some(Duration::from_millis(20)),
        };
        session.initialize(resources, options).await;

        for _ in 0..8 {
            let outcome = tokio::time::timeout(Duration::from_secs(2), session.request_identify())
                .await
                .expect("identify must resolve within the capture timeout")
                .unwrap();
            assert_eq!(outcome, Some(VerificationOutcome::no_face()));
            assert_eq!(session.state(), SessionState::Ready);
        }
    }

    #[tokio::test]
    async fn test_cancelled_scan_restores_resting_state() {
        let (session, _) = session_with(&[d2(0.0, 0.0)]);
        let mut resources = FakeResources::new(vec![Some(d2(0.9, 0.9)), Some(d2(0.0, 0.0))]);
        let gate = resources.gate_detection();
        session.initialize(resources, opts()).await;

        let session = Arc::new(session);
        let mut rx = session.subscribe();
        let scan = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.request_identify().await }
        });
        wait_for(&mut rx, SessionState::Scanning).await;

        scan.abort();
        assert!(scan.await.unwrap_err().is_cancelled());
        assert_eq!(session.state(), SessionState::Ready);

        // release the abandoned capture, then the next one
        gate.send(()).unwrap();
        gate.send(()).unwrap();
        let outcome = session.request_identify().await.unwrap().unwrap();
        assert!(outcome.accepted);
    }

    #[tokio::test]
    async fn test_enroll_read_failure_keeps_persisted_profiles() {
        let seed = [d2(0.0, 0.0), d2(1.0, 1.0)];
        let (session, medium) = flaky_session(&seed, vec![Some(d2(0.5, 0.5))]).await;

        medium.fail_reads(true);
        let err = session.request_enroll().await.unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Medium(_))));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(labels(&session.list_profiles()), vec!["Registro 1", "Registro 2"]);

        medium.fail_reads(false);
        let persisted = DescriptorStore::new(medium).load();
        assert_eq!(persisted, session.list_profiles());
    }

    #[tokio::test]
    async fn test_enroll_write_failure_surfaces_and_reverts() {
        let (session, medium) = flaky_session(&[], vec![Some(d2(0.5, 0.5))]).await;

        medium.fail_writes(true);
        let err = session.request_enroll().await.unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Medium(_))));
        assert_eq!(session.state(), SessionState::AwaitingEnrollment);
        assert!(session.list_profiles().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_cache_follows_persisted_order() {
        let (session, medium) = flaky_session(&[d2(0.0, 0.0)], vec![Some(d2(0.5, 0.5))]).await;

        let outcome = session.request_enroll().await.unwrap().unwrap();
        let EnrollOutcome::Enrolled(profile) = outcome else {
            panic!("expected enrollment");
        };
        assert_eq!(profile.label, "Registro 2");
        assert_eq!(labels(&session.list_profiles()), vec!["Registro 1", "Registro 2"]);
        assert_eq!(DescriptorStore::new(medium).load(), session.list_profiles());
    }

    #[tokio::test]
    async fn test_delete_read_failure_keeps_profiles() {
        let (session, medium) = flaky_session(&[d2(0.0, 0.0), d2(1.0, 1.0)], vec![]).await;
        let first = session.list_profiles()[0].id.clone();

        medium.fail_reads(true);
        assert!(matches!(session.delete_profile(&first), Err(SessionError::Store(_))));
        assert_eq!(session.list_profiles().len(), 2);

        medium.fail_reads(false);
        assert_eq!(DescriptorStore::new(medium).load().len(), 2);
    }

    #[tokio::test]
    async fn test_lost_pipeline_blocks_camera() {
        let (session, _) = session_with(&[d2(0.0, 0.0)]);
        let resources = FakeResources::new(vec![]).crashing_detection();
        let counters = resources.counters.clone();
        session.initialize(resources, opts()).await;

        let err = session.request_identify().await.unwrap_err();
        assert!(matches!(err, SessionError::Capture(CaptureError::ChannelClosed)));
        assert_eq!(session.state(), SessionState::CameraBlocked);
        assert_eq!(counters.wait_released().await, 1);

        assert_eq!(session.request_enroll().await.unwrap(), None);
        assert_eq!(session.request_identify().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frame_failure_counts_as_no_face() {
        let (session, medium) = session_with(&[d2(0.0, 0.0)]);
        let resources = FakeResources::new(vec![Some(d2(0.0, 0.0))]).failing_frames();
        session.initialize(resources, opts()).await;

        assert_eq!(session.request_enroll().await.unwrap(), Some(EnrollOutcome::NoFace));
        assert_eq!(session.state(), SessionState::Ready);
        let outcome = session.request_identify().await.unwrap();
        assert_eq!(outcome, Some(VerificationOutcome::no_face()));
        assert_eq!(DescriptorStore::new(medium).load().len(), 1);
    }

    #[tokio::test]
    async fn test_non_finite_descriptor_is_never_enrolled() {
        let script = vec![Some(d2(f32::INFINITY, 0.0))];
        let (session, medium, _) = ready_session(&[d2(0.1, 0.1)], script).await;

        assert_eq!(session.request_enroll().await.unwrap(), Some(EnrollOutcome::NoFace));
        let persisted = DescriptorStore::new(medium).load();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted, session.list_profiles());
    }

    #[tokio::test]
    async fn test_identify_reports_confidence() {
        let (session, _, _) = ready_session(&[d2(0.3, 0.0)], vec![Some(d2(0.0, 0.0))]).await;
        let outcome = session.request_identify().await.unwrap().unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.confidence, 45);
    }

    #[tokio::test]
    async fn test_delete_all_reports_ignored_request() {
        let (session, _) = session_with(&[]);
        assert_eq!(session.state(), SessionState::Initializing);
        assert!(!session.delete_all_profiles().unwrap());

        session.initialize(FakeResources::new(vec![]), opts()).await;
        assert!(session.delete_all_profiles().unwrap());
    }
}
