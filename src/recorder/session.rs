//! Session recorder
//!
//! Owns at most one recording session and drives it through
//! `Idle -> Preparing -> Ready -> Recording -> Finishing -> Idle`.
//! Every state change happens under one lock. Lifecycle work and buffer
//! writes run in order on the `session-pipeline` thread, so callers on
//! capture threads only pay for a state check and a channel send.

use super::delegate::{Notifier, RecorderDelegate, RecorderEvent};
use super::encoder::{AudioBuffer, EncodeSession, EncoderBackend, VideoFrame};
use super::metadata::{write_timebase, CameraParams, FrameMetadata, FrameMetadataWriter};
use super::paths::SessionPaths;
use super::state::{RecorderOptions, RecorderState, RecordingOutput, SessionConfig};
use crate::clock::{CanonicalTime, ClockConverter, ClockSnapshot};
use crate::inertial::{synchronize_imu, write_imu_rows, write_samples, InertialSampleLog, SensorSample};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

enum Command {
    Prepare {
        config: SessionConfig,
        session_id: Uuid,
    },
    Video {
        frame: VideoFrame,
        metadata: FrameMetadata,
    },
    Audio(AudioBuffer),
    Finish,
    Shutdown,
}

struct Control {
    state: RecorderState,
    /// Tracks of the prepared session
    video_track: bool,
    audio_track: bool,
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Debug, Clone, Copy)]
enum Track {
    Video,
    Audio,
    Sensor,
}

impl Track {
    fn name(self) -> &'static str {
        match self {
            Track::Video => "video frame",
            Track::Audio => "audio buffer",
            Track::Sensor => "sensor sample",
        }
    }
}

/// Why an append was turned away
#[derive(Debug, Clone, Copy)]
enum Refusal {
    State(RecorderState),
    NoTrack,
    Full,
    Stopped,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::State(state) => write!(f, "recorder is {:?}", state),
            Refusal::NoTrack => write!(f, "session has no such track"),
            Refusal::Full => write!(f, "pipeline is full"),
            Refusal::Stopped => write!(f, "pipeline stopped"),
        }
    }
}

#[derive(Default)]
struct Counters {
    video_accepted: AtomicU64,
    video_dropped: AtomicU64,
    audio_accepted: AtomicU64,
    audio_dropped: AtomicU64,
    sensor_accepted: AtomicU64,
    sensor_dropped: AtomicU64,
}

impl Counters {
    fn for_track(&self, track: Track) -> (&AtomicU64, &AtomicU64) {
        match track {
            Track::Video => (&self.video_accepted, &self.video_dropped),
            Track::Audio => (&self.audio_accepted, &self.audio_dropped),
            Track::Sensor => (&self.sensor_accepted, &self.sensor_dropped),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.video_accepted,
            &self.video_dropped,
            &self.audio_accepted,
            &self.audio_dropped,
            &self.sensor_accepted,
            &self.sensor_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Buffer counters of the current (or last) session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStats {
    pub video_accepted: u64,
    pub video_dropped: u64,
    pub audio_accepted: u64,
    pub audio_dropped: u64,
    pub sensor_accepted: u64,
    pub sensor_dropped: u64,
}

struct Shared {
    control: Mutex<Control>,
    inertial: InertialSampleLog,
    /// Media buffers sent to the pipeline and not yet written
    queued: AtomicUsize,
    counters: Counters,
    options: RecorderOptions,
}

impl Shared {
    fn set_state(&self, state: RecorderState) {
        let previous = std::mem::replace(&mut self.control.lock().state, state);
        tracing::debug!("Recorder state {:?} -> {:?}", previous, state);
    }

    /// Admission check for a media buffer; reserves a pipeline slot on success
    fn admit(&self, control: &Control, has_track: bool) -> Result<(), Refusal> {
        if control.state != RecorderState::Recording {
            return Err(Refusal::State(control.state));
        }
        if !has_track {
            return Err(Refusal::NoTrack);
        }
        if !self.reserve_slot() {
            return Err(Refusal::Full);
        }
        Ok(())
    }

    /// Count an append outcome. Called with the control lock released.
    fn settle(&self, track: Track, outcome: Result<(), Refusal>) {
        let (accepted, dropped) = self.counters.for_track(track);
        match outcome {
            Ok(()) => {
                accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(refusal) => {
                let dropped = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log_drop(track, dropped, refusal);
            }
        }
    }

    fn reserve_slot(&self) -> bool {
        let queued = self.queued.fetch_add(1, Ordering::AcqRel);
        if queued >= self.options.buffer_retention {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    fn release_slot(&self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

fn log_drop(track: Track, dropped: u64, reason: Refusal) {
    // First few drops, then every 100th
    if dropped <= 5 || dropped % 100 == 0 {
        tracing::warn!(
            "Dropped {} ({}), {} dropped so far",
            track.name(),
            reason,
            dropped
        );
    } else {
        tracing::trace!("Dropped {} ({})", track.name(), reason);
    }
}

/// Asynchronous recorder for one video track, one audio track and the
/// inertial side channel
pub struct SessionRecorder {
    shared: Arc<Shared>,
    events: broadcast::Sender<RecorderEvent>,
    pipeline: Option<JoinHandle<()>>,
    callbacks: Option<JoinHandle<()>>,
}

impl SessionRecorder {
    /// Create a recorder and start its pipeline and callback threads
    ///
    /// The delegate is held weakly; notifications stop reaching it once it is
    /// dropped.
    pub fn new(
        backend: Arc<dyn EncoderBackend>,
        clock: Arc<ClockConverter>,
        delegate: Option<Weak<dyn RecorderDelegate>>,
        options: RecorderOptions,
    ) -> RecorderResult<Self> {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(100);
        let (notifier, callbacks) = Notifier::spawn(delegate, events.clone())?;

        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                state: RecorderState::Idle,
                video_track: false,
                audio_track: false,
                commands,
            }),
            inertial: InertialSampleLog::new(),
            queued: AtomicUsize::new(0),
            counters: Counters::default(),
            options,
        });

        let pipeline = Pipeline {
            shared: shared.clone(),
            backend,
            clock,
            notifier,
            active: None,
        };
        let pipeline = std::thread::Builder::new()
            .name("session-pipeline".to_string())
            .spawn(move || pipeline.run(rx))?;

        Ok(Self {
            shared,
            events,
            pipeline: Some(pipeline),
            callbacks: Some(callbacks),
        })
    }

    /// Current state
    pub fn state(&self) -> RecorderState {
        self.shared.control.lock().state
    }

    /// Subscribe to recorder events
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> RecorderStats {
        let c = &self.shared.counters;
        RecorderStats {
            video_accepted: c.video_accepted.load(Ordering::Relaxed),
            video_dropped: c.video_dropped.load(Ordering::Relaxed),
            audio_accepted: c.audio_accepted.load(Ordering::Relaxed),
            audio_dropped: c.audio_dropped.load(Ordering::Relaxed),
            sensor_accepted: c.sensor_accepted.load(Ordering::Relaxed),
            sensor_dropped: c.sensor_dropped.load(Ordering::Relaxed),
        }
    }

    /// Begin allocating a session for `config`
    ///
    /// Returns once the work is queued; the delegate learns the outcome.
    pub fn prepare(&self, config: SessionConfig) -> RecorderResult<Uuid> {
        let session_id = Uuid::new_v4();
        let destination = config.destination.clone();
        {
            let mut control = self.shared.control.lock();
            match control.state {
                RecorderState::Idle => {}
                RecorderState::Failed => {
                    return Err(RecorderError::NotReady(
                        "recorder failed, reset() it before preparing".to_string(),
                    ))
                }
                state => return Err(RecorderError::AlreadyActive(state)),
            }

            self.shared.inertial.clear();
            self.shared.counters.reset();
            let (video_track, audio_track) = (config.video.is_some(), config.audio.is_some());
            control
                .commands
                .send(Command::Prepare { config, session_id })
                .map_err(|_| RecorderError::NotReady("session pipeline stopped".to_string()))?;
            control.state = RecorderState::Preparing;
            control.video_track = video_track;
            control.audio_track = audio_track;
        }

        tracing::info!("Preparing session {} at {:?}", session_id, destination);
        Ok(session_id)
    }

    /// Start accepting buffers
    ///
    /// `on_started` fires once the first buffer has been written.
    pub fn start_recording(&self) -> RecorderResult<()> {
        {
            let mut control = self.shared.control.lock();
            if control.state != RecorderState::Ready {
                return Err(RecorderError::NotReady(format!(
                    "cannot start recording while {:?}",
                    control.state
                )));
            }
            control.state = RecorderState::Recording;
        }
        tracing::info!("Recording requested");
        Ok(())
    }

    /// Stop accepting buffers and finalize the session in the background
    pub fn finish_recording(&self) -> RecorderResult<()> {
        {
            let mut control = self.shared.control.lock();
            if control.state != RecorderState::Recording {
                return Err(RecorderError::NotReady(format!(
                    "cannot finish recording while {:?}",
                    control.state
                )));
            }
            control
                .commands
                .send(Command::Finish)
                .map_err(|_| RecorderError::NotReady("session pipeline stopped".to_string()))?;
            control.state = RecorderState::Finishing;
        }
        tracing::info!("Finishing recording");
        Ok(())
    }

    /// Return a failed recorder to `Idle`
    pub fn reset(&self) -> RecorderResult<()> {
        let mut control = self.shared.control.lock();
        if control.state != RecorderState::Failed {
            return Err(RecorderError::NotReady(format!(
                "nothing to reset while {:?}",
                control.state
            )));
        }
        control.state = RecorderState::Idle;
        Ok(())
    }

    /// Queue a video frame. Never blocks; frames outside `Recording` or for a
    /// session without a video track are dropped.
    pub fn append_video_frame(&self, frame: VideoFrame, time: CanonicalTime, params: CameraParams) {
        let outcome = {
            let control = self.shared.control.lock();
            self.shared.admit(&control, control.video_track).and_then(|_| {
                let metadata = FrameMetadata::new(time, params);
                control
                    .commands
                    .send(Command::Video { frame, metadata })
                    .map_err(|_| {
                        self.shared.release_slot();
                        Refusal::Stopped
                    })
            })
        };
        self.shared.settle(Track::Video, outcome);
    }

    /// Queue an audio buffer. Never blocks; buffers outside `Recording` or for
    /// a session without an audio track are dropped.
    pub fn append_audio_buffer(&self, buffer: AudioBuffer) {
        let outcome = {
            let control = self.shared.control.lock();
            self.shared.admit(&control, control.audio_track).and_then(|_| {
                control.commands.send(Command::Audio(buffer)).map_err(|_| {
                    self.shared.release_slot();
                    Refusal::Stopped
                })
            })
        };
        self.shared.settle(Track::Audio, outcome);
    }

    /// Record a sensor sample for the session's inertial log
    pub fn append_sensor_sample(&self, sample: SensorSample) {
        let outcome = {
            let control = self.shared.control.lock();
            if control.state == RecorderState::Recording {
                self.shared.inertial.append(sample);
                Ok(())
            } else {
                Err(Refusal::State(control.state))
            }
        };
        self.shared.settle(Track::Sensor, outcome);
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        let _ = self.shared.control.lock().commands.send(Command::Shutdown);
        if let Some(handle) = self.pipeline.take() {
            let _ = handle.join();
        }
        // A delegate may drop the last handle from inside a callback
        if let Some(handle) = self.callbacks.take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

struct ActiveSession {
    id: Uuid,
    config: SessionConfig,
    paths: SessionPaths,
    encoder: Box<dyn EncodeSession>,
    frames: FrameMetadataWriter,
    clock_start: ClockSnapshot,
    start_time: Option<CanonicalTime>,
    end_time: Option<CanonicalTime>,
    video_frames: u64,
    audio_buffers: u64,
}

impl ActiveSession {
    /// Track the written time span; true for the first buffer
    fn mark_written(&mut self, time: CanonicalTime) -> bool {
        self.end_time = Some(self.end_time.map_or(time, |end| end.max(time)));
        if self.start_time.is_none() {
            self.start_time = Some(time);
            return true;
        }
        false
    }

    fn discard(self) {
        self.encoder.abort();
        drop(self.frames);
        remove_partials(&self.paths);
    }
}

fn remove_partials(paths: &SessionPaths) {
    for path in [&paths.media, &paths.frames, &paths.inertial, &paths.imu, &paths.timebase] {
        let partial = SessionPaths::partial(path);
        match std::fs::remove_file(&partial) {
            Ok(()) => tracing::debug!("Removed {:?}", partial),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {:?}: {}", partial, e),
        }
    }
}

/// Move finished artifacts into place; on error, undo what was moved
fn promote(files: &[&PathBuf]) -> RecorderResult<()> {
    for (index, path) in files.iter().enumerate() {
        if let Err(e) = std::fs::rename(SessionPaths::partial(path), path) {
            for done in &files[..index] {
                let _ = std::fs::remove_file(done);
            }
            return Err(e.into());
        }
    }
    Ok(())
}

/// Runs on the `session-pipeline` thread
struct Pipeline {
    shared: Arc<Shared>,
    backend: Arc<dyn EncoderBackend>,
    clock: Arc<ClockConverter>,
    notifier: Notifier,
    active: Option<ActiveSession>,
}

impl Pipeline {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::Prepare { config, session_id } => self.prepare(config, session_id),
                Command::Video { frame, metadata } => {
                    self.write_video(&frame, metadata);
                    self.shared.release_slot();
                }
                Command::Audio(buffer) => {
                    self.write_audio(&buffer);
                    self.shared.release_slot();
                }
                Command::Finish => self.finish(),
                Command::Shutdown => break,
            }
        }

        if let Some(session) = self.active.take() {
            tracing::warn!("Recorder dropped, abandoning session {}", session.id);
            session.discard();
        }
        tracing::debug!("Session pipeline stopped");
    }

    fn prepare(&mut self, config: SessionConfig, session_id: Uuid) {
        match self.open_session(config, session_id) {
            Ok(session) => {
                self.active = Some(session);
                self.shared.set_state(RecorderState::Ready);
                tracing::info!("Session {} prepared", session_id);
                self.notifier.send(RecorderEvent::Prepared { session_id });
            }
            Err(e) => self.fail(e),
        }
    }

    fn open_session(&self, config: SessionConfig, id: Uuid) -> RecorderResult<ActiveSession> {
        let paths = SessionPaths::for_destination(&config.destination);
        let clock_start = self.clock.snapshot()?;

        // Creating the first side file surfaces unwritable destinations early
        let frames = FrameMetadataWriter::create(&SessionPaths::partial(&paths.frames))?;
        let encoder = match self.backend.open(
            &SessionPaths::partial(&paths.media),
            config.video.as_ref(),
            config.audio.as_ref(),
        ) {
            Ok(encoder) => encoder,
            Err(e) => {
                drop(frames);
                remove_partials(&paths);
                return Err(e);
            }
        };

        Ok(ActiveSession {
            id,
            config,
            paths,
            encoder,
            frames,
            clock_start,
            start_time: None,
            end_time: None,
            video_frames: 0,
            audio_buffers: 0,
        })
    }

    fn write_video(&mut self, frame: &VideoFrame, metadata: FrameMetadata) {
        let Some(session) = self.active.as_mut() else {
            tracing::debug!("Video frame without a session, discarding");
            return;
        };

        let result = session
            .encoder
            .append_video(frame, metadata.time)
            .and_then(|_| session.frames.write(&metadata));
        let started = match result {
            Ok(()) => {
                session.video_frames += 1;
                session.mark_written(metadata.time)
            }
            Err(e) => return self.fail(e),
        };

        if started {
            tracing::info!("Recording started at {}", metadata.time);
            self.notifier.send(RecorderEvent::Started {
                start_time: metadata.time,
            });
        }
    }

    fn write_audio(&mut self, buffer: &AudioBuffer) {
        let Some(session) = self.active.as_mut() else {
            tracing::debug!("Audio buffer without a session, discarding");
            return;
        };

        let started = match session.encoder.append_audio(buffer) {
            Ok(()) => {
                session.audio_buffers += 1;
                session.mark_written(buffer.time)
            }
            Err(e) => return self.fail(e),
        };

        if started {
            tracing::info!("Recording started at {}", buffer.time);
            self.notifier.send(RecorderEvent::Started {
                start_time: buffer.time,
            });
        }
    }

    fn finish(&mut self) {
        let Some(session) = self.active.take() else {
            tracing::debug!("Finish without a session, ignoring");
            return;
        };

        self.notifier.send(RecorderEvent::WillStop);

        let paths = session.paths.clone();
        match self.finalize(session) {
            Ok(output) => {
                self.shared.set_state(RecorderState::Idle);
                tracing::info!(
                    "Recording finished: {} frames, {} audio buffers, {} sensor samples, {:.0}ms",
                    output.video_frames,
                    output.audio_buffers,
                    output.sensor_samples,
                    output.duration_ms()
                );
                self.notifier.send(RecorderEvent::DidStop(output));
            }
            Err(e) => {
                remove_partials(&paths);
                self.fail(e);
            }
        }
    }

    fn finalize(&self, session: ActiveSession) -> RecorderResult<RecordingOutput> {
        let ActiveSession {
            id,
            config,
            paths,
            encoder,
            frames,
            clock_start,
            start_time,
            end_time,
            video_frames,
            audio_buffers,
        } = session;

        let sensor_samples = match self.write_side_files(&config, &paths, frames, &clock_start) {
            Ok(count) => count,
            Err(e) => {
                encoder.abort();
                return Err(e);
            }
        };
        encoder.finish()?;

        let mut files = vec![&paths.frames, &paths.inertial, &paths.timebase];
        if config.synchronized_imu {
            files.push(&paths.imu);
        }
        // The container goes last so it only appears once everything else has
        files.push(&paths.media);
        promote(&files)?;

        Ok(RecordingOutput {
            session_id: id,
            media_path: paths.media.clone(),
            frame_metadata_path: paths.frames.clone(),
            inertial_path: paths.inertial.clone(),
            imu_path: config.synchronized_imu.then(|| paths.imu.clone()),
            timebase_path: paths.timebase.clone(),
            start_time,
            end_time,
            video_frames,
            audio_buffers,
            sensor_samples,
        })
    }

    fn write_side_files(
        &self,
        config: &SessionConfig,
        paths: &SessionPaths,
        frames: FrameMetadataWriter,
        clock_start: &ClockSnapshot,
    ) -> RecorderResult<usize> {
        let frame_rows = frames.rows();
        frames.finish()?;

        let samples = self.shared.inertial.drain_sorted();
        let bytes = write_samples(&samples, &SessionPaths::partial(&paths.inertial))?;
        tracing::debug!(
            "Flushed {} frame rows and {} sensor samples ({} bytes)",
            frame_rows,
            samples.len(),
            bytes
        );

        if config.synchronized_imu {
            let rows = synchronize_imu(&samples);
            write_imu_rows(&rows, &SessionPaths::partial(&paths.imu))?;
        }

        let clock_end = self.clock.snapshot()?;
        write_timebase(&SessionPaths::partial(&paths.timebase), clock_start, &clock_end)?;
        Ok(samples.len())
    }

    fn fail(&mut self, error: RecorderError) {
        if let Some(session) = self.active.take() {
            session.discard();
        }
        self.shared.inertial.clear();
        self.shared.set_state(RecorderState::Failed);
        tracing::error!("Recording failed: {}", error);
        self.notifier.send(RecorderEvent::Failed(Arc::new(error)));
    }
}
