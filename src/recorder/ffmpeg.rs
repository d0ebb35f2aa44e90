//! FFmpeg encode backend
//!
//! Raw video frames are piped to an `ffmpeg` child process. Audio is spooled
//! to a raw PCM file and muxed with the video once the session finishes.

use super::encoder::{AudioBuffer, EncodeSession, EncoderBackend, VideoFrame};
use super::state::{
    AudioCodec, AudioTrackSpec, PixelFormat, SampleFormat, VideoCodec, VideoTrackSpec,
    VideoTransform,
};
use crate::clock::CanonicalTime;
use crate::utils::error::{RecorderError, RecorderResult};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Encoder backend driving the `ffmpeg` command line tool
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    binary: PathBuf,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn check_available(&self) -> RecorderResult<()> {
        match Command::new(&self.binary).arg("-version").output() {
            Ok(output) if output.status.success() => Ok(()),
            _ => Err(RecorderError::EncoderFailure(format!(
                "FFmpeg not found at {:?}. Please install FFmpeg.",
                self.binary
            ))),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for FfmpegBackend {
    fn open(
        &self,
        output: &Path,
        video: Option<&VideoTrackSpec>,
        audio: Option<&AudioTrackSpec>,
    ) -> RecorderResult<Box<dyn EncodeSession>> {
        if video.is_none() && audio.is_none() {
            return Err(RecorderError::EncoderFailure(
                "session has neither a video nor an audio track".to_string(),
            ));
        }
        self.check_available()?;

        // With audio the video is encoded to a scratch file and muxed on finish
        let video_target = match audio {
            Some(_) => sibling(output, "video"),
            None => output.to_path_buf(),
        };

        let audio_spool = match audio {
            Some(spec) => {
                let path = sibling_with_ext(output, "audio", "pcm");
                let writer = BufWriter::new(File::create(&path)?);
                Some(AudioSpool {
                    path,
                    writer,
                    spec: spec.clone(),
                })
            }
            None => None,
        };

        let (process, stdin) = match video {
            Some(spec) => {
                let args = video_encoder_args(spec, &video_target);
                let mut process = Command::new(&self.binary)
                    .args(&args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| {
                        RecorderError::EncoderFailure(format!("Failed to start FFmpeg: {}", e))
                    })?;
                let stdin = process.stdin.take().ok_or_else(|| {
                    RecorderError::EncoderFailure("Failed to capture FFmpeg stdin".to_string())
                })?;

                tracing::info!(
                    "Started FFmpeg video encoder: {}x{} @ {}fps, {:?}, output: {:?}",
                    spec.width,
                    spec.height,
                    spec.frame_rate,
                    spec.codec,
                    video_target
                );
                (Some(process), Some(stdin))
            }
            None => (None, None),
        };

        let mut scratch = Vec::new();
        if video.is_some() && audio.is_some() {
            scratch.push(video_target.clone());
        }
        scratch.extend(audio_spool.as_ref().map(|spool| spool.path.clone()));

        Ok(Box::new(FfmpegSession {
            binary: self.binary.clone(),
            output: output.to_path_buf(),
            video_spec: video.cloned(),
            video_target,
            process,
            stdin,
            audio_spool,
            scratch,
            timing: TrackTiming::default(),
        }))
    }
}

/// Where each track starts on the canonical timebase and how far video got
#[derive(Debug, Default)]
struct TrackTiming {
    first_video: Option<CanonicalTime>,
    first_audio: Option<CanonicalTime>,
    /// Frame slots already filled in the encoded stream
    frames_written: u64,
    last_frame: Option<Bytes>,
}

impl TrackTiming {
    /// Audio start relative to video start, zero unless both tracks have data
    fn audio_offset_ns(&self) -> i64 {
        match (self.first_video, self.first_audio) {
            (Some(video), Some(audio)) => audio.nanos_since(video),
            _ => 0,
        }
    }
}

/// Index of the constant-rate frame slot `time` falls into
fn frame_slot(first: CanonicalTime, time: CanonicalTime, frame_rate: u32) -> Option<u64> {
    let elapsed = time.nanos_since(first);
    if elapsed < 0 {
        return None;
    }
    let slot = (elapsed as i128 * frame_rate as i128 + 500_000_000) / 1_000_000_000;
    u64::try_from(slot).ok()
}

struct AudioSpool {
    path: PathBuf,
    writer: BufWriter<File>,
    spec: AudioTrackSpec,
}

struct FfmpegSession {
    binary: PathBuf,
    output: PathBuf,
    video_spec: Option<VideoTrackSpec>,
    video_target: PathBuf,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    audio_spool: Option<AudioSpool>,
    /// Intermediate files removed once the session ends
    scratch: Vec<PathBuf>,
    timing: TrackTiming,
}

impl FfmpegSession {
    fn wait_for_video(&mut self) -> RecorderResult<()> {
        // Closing stdin signals EOF to ffmpeg
        drop(self.stdin.take());
        if let Some(process) = self.process.take() {
            let output = process.wait_with_output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(RecorderError::EncoderFailure(format!(
                    "FFmpeg exited with status {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }

    fn mux_audio(&mut self) -> RecorderResult<()> {
        let Some(mut spool) = self.audio_spool.take() else {
            return Ok(());
        };
        spool.writer.flush()?;
        drop(spool.writer);

        let video_input = self.video_spec.as_ref().map(|_| self.video_target.as_path());
        let offset_ns = self.timing.audio_offset_ns();
        if offset_ns != 0 {
            tracing::debug!("Audio starts {}ns after video", offset_ns);
        }
        let args = mux_args(video_input, &spool.path, &spool.spec, offset_ns, &self.output);
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| RecorderError::EncoderFailure(format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecorderError::EncoderFailure(format!(
                "FFmpeg mux exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn remove_scratch(&self) {
        for path in &self.scratch {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
            }
        }
    }
}

impl EncodeSession for FfmpegSession {
    fn append_video(&mut self, frame: &VideoFrame, time: CanonicalTime) -> RecorderResult<()> {
        let (Some(spec), Some(stdin)) = (&self.video_spec, self.stdin.as_mut()) else {
            return Err(RecorderError::EncoderFailure(
                "session has no video track".to_string(),
            ));
        };
        if frame.width != spec.width
            || frame.height != spec.height
            || frame.pixel_format != spec.pixel_format
            || !frame.is_complete()
        {
            return Err(RecorderError::EncoderFailure(format!(
                "frame {}x{} {:?} ({} bytes) does not match track {}x{} {:?}",
                frame.width,
                frame.height,
                frame.pixel_format,
                frame.data.len(),
                spec.width,
                spec.height,
                spec.pixel_format
            )));
        }

        // Constant frame rate: repeat the previous frame over gaps, skip
        // frames landing on an already filled slot
        let first = *self.timing.first_video.get_or_insert(time);
        let Some(slot) = frame_slot(first, time, spec.frame_rate) else {
            tracing::trace!("Frame at {} precedes the first frame, skipping", time);
            return Ok(());
        };
        if slot < self.timing.frames_written {
            tracing::trace!("Frame at {} shares slot {}, skipping", time, slot);
            return Ok(());
        }

        let rejected =
            |e: std::io::Error| RecorderError::EncoderFailure(format!("FFmpeg rejected frame: {}", e));
        if let Some(last) = &self.timing.last_frame {
            let gap = slot - self.timing.frames_written;
            if gap > 0 {
                tracing::debug!("Repeating previous frame {} times at {}", gap, time);
            }
            for _ in 0..gap {
                stdin.write_all(last).map_err(rejected)?;
            }
        }
        stdin.write_all(&frame.data).map_err(rejected)?;

        self.timing.frames_written = slot + 1;
        self.timing.last_frame = Some(frame.data.clone());
        Ok(())
    }

    fn append_audio(&mut self, buffer: &AudioBuffer) -> RecorderResult<()> {
        let Some(spool) = self.audio_spool.as_mut() else {
            return Err(RecorderError::EncoderFailure(
                "session has no audio track".to_string(),
            ));
        };
        spool.writer.write_all(&buffer.data)?;
        self.timing.first_audio.get_or_insert(buffer.time);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> RecorderResult<()> {
        let result = self.wait_for_video().and_then(|_| self.mux_audio());
        self.remove_scratch();
        result?;
        tracing::info!("FFmpeg finished: {:?}", self.output);
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
        drop(self.audio_spool.take());
        self.remove_scratch();
        let _ = std::fs::remove_file(&self.output);
        tracing::warn!("FFmpeg session aborted: {:?}", self.output);
    }
}

fn sibling(output: &Path, tag: &str) -> PathBuf {
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    sibling_with_ext(output, tag, &ext)
}

fn sibling_with_ext(output: &Path, tag: &str, ext: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    output.with_file_name(format!("{}.{}.{}", stem, tag, ext))
}

fn pixel_format_name(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Nv12 => "nv12",
        PixelFormat::Bgra => "bgra",
        PixelFormat::Rgba => "rgba",
        PixelFormat::Yuyv422 => "yuyv422",
    }
}

fn transform_filter(transform: VideoTransform) -> Option<&'static str> {
    match transform {
        VideoTransform::Identity => None,
        VideoTransform::Rotate90 => Some("transpose=1"),
        VideoTransform::Rotate180 => Some("hflip,vflip"),
        VideoTransform::Rotate270 => Some("transpose=2"),
        VideoTransform::MirrorHorizontal => Some("hflip"),
    }
}

/// Arguments for encoding raw frames from stdin into `output`
pub(crate) fn video_encoder_args(spec: &VideoTrackSpec, output: &Path) -> Vec<String> {
    let codec = match spec.codec {
        VideoCodec::H264 => "libx264",
        VideoCodec::Hevc => "libx265",
    };

    // stderr is only read after exit, keep it short
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pixel_format".into(),
        pixel_format_name(spec.pixel_format).into(),
        "-video_size".into(),
        format!("{}x{}", spec.width, spec.height),
        "-framerate".into(),
        spec.frame_rate.to_string(),
        "-i".into(),
        "-".into(),
    ];

    if let Some(filter) = transform_filter(spec.transform) {
        args.push("-vf".into());
        args.push(filter.into());
    }

    args.extend([
        "-c:v".into(),
        codec.into(),
        "-preset".into(),
        "veryfast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-b:v".into(),
        spec.bitrate.to_string(),
        "-g".into(),
        (spec.frame_rate * 2).to_string(),
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Arguments for muxing spooled PCM (and optionally encoded video) into `output`
///
/// `audio_offset_ns` is the audio start minus the video start; the later
/// input is delayed by it.
pub(crate) fn mux_args(
    video: Option<&Path>,
    pcm: &Path,
    spec: &AudioTrackSpec,
    audio_offset_ns: i64,
    output: &Path,
) -> Vec<String> {
    let sample_format = match spec.sample_format {
        SampleFormat::S16le => "s16le",
        SampleFormat::F32le => "f32le",
    };
    let codec = match spec.codec {
        AudioCodec::Aac => "aac",
    };

    let delay = format!("{:.6}", audio_offset_ns.unsigned_abs() as f64 / 1e9);

    let mut args: Vec<String> = vec!["-y".into()];
    if let Some(video) = video {
        if audio_offset_ns < 0 {
            args.extend(["-itsoffset".into(), delay.clone()]);
        }
        args.extend(["-i".into(), video.to_string_lossy().to_string()]);
    }
    if video.is_some() && audio_offset_ns > 0 {
        args.extend(["-itsoffset".into(), delay]);
    }
    args.extend([
        "-f".into(),
        sample_format.into(),
        "-ar".into(),
        spec.sample_rate.to_string(),
        "-ac".into(),
        spec.channels.to_string(),
        "-i".into(),
        pcm.to_string_lossy().to_string(),
    ]);
    if video.is_some() {
        args.extend(["-c:v".into(), "copy".into()]);
    }
    args.extend([
        "-c:a".into(),
        codec.into(),
        "-b:a".into(),
        spec.bitrate.to_string(),
        "-shortest".into(),
        output.to_string_lossy().to_string(),
    ]);
    args
}
