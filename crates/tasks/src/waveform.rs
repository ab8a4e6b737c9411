use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::JoinHandle;

use common::{FileFormat, Track, Waveform, WAVEFORM_WIDTH};
use crossbeam_channel::{unbounded, Sender};
use library::Library;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

pub const HEIGHT_COEFFICIENT: f32 = 4.2;

#[derive(Debug)]
pub enum TranscodeError {
    Io(std::io::Error),
    Wav(hound::Error),
    Decode(String),
    Ffmpeg(String),
}

impl std::fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeError::Io(err) => write!(f, "io error: {}", err),
            TranscodeError::Wav(err) => write!(f, "wav error: {}", err),
            TranscodeError::Decode(msg) => write!(f, "decode error: {}", msg),
            TranscodeError::Ffmpeg(msg) => write!(f, "ffmpeg error: {}", msg),
        }
    }
}

impl std::error::Error for TranscodeError {}

impl From<std::io::Error> for TranscodeError {
    fn from(err: std::io::Error) -> Self {
        TranscodeError::Io(err)
    }
}

impl From<hound::Error> for TranscodeError {
    fn from(err: hound::Error) -> Self {
        TranscodeError::Wav(err)
    }
}

impl From<SymphoniaError> for TranscodeError {
    fn from(err: SymphoniaError) -> Self {
        TranscodeError::Decode(err.to_string())
    }
}

pub trait Transcoder: Send + Sync {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(PathBuf::from("ffmpeg"))
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let result = Command::new(&self.binary)
            .arg("-y")
            .args(["-loglevel", "error", "-i"])
            .arg(input)
            .args(["-acodec", "pcm_s16le", "-ar", "44100", "-ac", "2"])
            .arg(output)
            .output()?;
        if result.status.success() {
            Ok(())
        } else {
            Err(TranscodeError::Ffmpeg(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ))
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaTranscoder;

impl Transcoder for SymphoniaTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let file = fs::File::open(input)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = input.extension().and_then(|s| s.to_str()) {
            hint.with_extension(ext);
        }
        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| TranscodeError::Decode("no default audio track".to_string()))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        let mut writer: Option<hound::WavWriter<std::io::BufWriter<fs::File>>> = None;
        let mut buffer: Option<SampleBuffer<i16>> = None;
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(_)) => break,
                Err(SymphoniaError::ResetRequired) => {
                    return Err(TranscodeError::Decode("decoder reset required".to_string()))
                }
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    debug!("Skipping undecodable packet in {:?}: {}", input, msg);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let spec = *decoded.spec();
            if writer.is_none() {
                let wav_spec = hound::WavSpec {
                    channels: spec.channels.count() as u16,
                    sample_rate: spec.rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                writer = Some(hound::WavWriter::create(output, wav_spec)?);
            }
            let samples = buffer.get_or_insert_with(|| {
                SampleBuffer::<i16>::new(decoded.capacity() as u64, spec)
            });
            if samples.capacity() < decoded.capacity() * spec.channels.count() {
                *samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            }
            samples.copy_interleaved_ref(decoded);
            if let Some(writer) = writer.as_mut() {
                for sample in samples.samples() {
                    writer.write_sample(*sample)?;
                }
            }
        }
        match writer {
            Some(writer) => {
                writer.finalize()?;
                Ok(())
            }
            None => Err(TranscodeError::Decode("no audio frames".to_string())),
        }
    }
}

pub fn read_pcm16(path: &Path) -> Result<Vec<i16>, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect(),
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => {
            let shift = 16 - spec.bits_per_sample as u32;
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| v << shift))
                .collect()
        }
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample as u32 - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect()
        }
    }
}

/// Mean absolute amplitude per bin. The tail past `WAVEFORM_WIDTH * window`
/// is dropped; fewer samples than bins gives `None`.
pub fn downsample(samples: &[i16]) -> Option<Waveform> {
    let window = samples.len() / WAVEFORM_WIDTH;
    if window == 0 {
        return None;
    }
    let waveform = samples
        .chunks_exact(window)
        .take(WAVEFORM_WIDTH)
        .map(|chunk| {
            let sum: f32 = chunk
                .iter()
                .map(|s| (*s as f32 / i16::MAX as f32).abs() * HEIGHT_COEFFICIENT)
                .sum();
            sum / window as f32
        })
        .collect();
    Some(waveform)
}

/// Computes waveforms, decoding compressed files inside a scratch directory
/// that is removed on every path out.
pub struct WaveformExtractor {
    transcoder: Box<dyn Transcoder>,
    temp_root: Option<PathBuf>,
}

impl WaveformExtractor {
    pub fn new(transcoder: Box<dyn Transcoder>, temp_root: Option<PathBuf>) -> Self {
        Self {
            transcoder,
            temp_root,
        }
    }

    pub fn extract(&self, track: &Track) -> Option<Waveform> {
        let path = track.path();
        let result = match track.file_format() {
            FileFormat::Wav => read_pcm16(&path).map_err(TranscodeError::from),
            FileFormat::Mp3 | FileFormat::M4a | FileFormat::Flac => self.decode_compressed(&path),
            FileFormat::Other => {
                warn!("No waveform for {}: unsupported format", track);
                return None;
            }
        };
        let samples = match result {
            Ok(samples) => samples,
            Err(err) => {
                warn!("Waveform extraction failed for {}: {}", track, err);
                return None;
            }
        };
        let waveform = downsample(&samples);
        if waveform.is_none() {
            warn!("Waveform extraction failed for {}: too few samples", track);
        }
        waveform
    }

    fn decode_compressed(&self, path: &Path) -> Result<Vec<i16>, TranscodeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("musicott-waveform-");
        let scratch = match &self.temp_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let source = scratch.path().join(format!("source.{}", ext));
        let decoded = scratch.path().join("decoded.wav");
        fs::copy(path, &source)?;
        self.transcoder.transcode(&source, &decoded)?;
        let samples = read_pcm16(&decoded)?;
        scratch.close()?;
        Ok(samples)
    }
}

pub struct WaveformWorker {
    sender: Option<Sender<Track>>,
    handle: Option<JoinHandle<()>>,
}

impl WaveformWorker {
    pub fn spawn(library: Library, extractor: WaveformExtractor) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Track>();
        let handle = std::thread::Builder::new()
            .name("musicott-waveform".to_string())
            .spawn(move || {
                for track in receiver {
                    if library.contains_waveform(track.id()) {
                        debug!("Waveform for {} already present", track);
                        continue;
                    }
                    let waveform = match extractor.extract(&track) {
                        Some(waveform) => waveform,
                        None => continue,
                    };
                    match library.add_waveform(track.id(), waveform) {
                        Ok(()) => info!("Waveform ready for {}", track),
                        Err(err) => warn!("Dropping waveform for {}: {}", track, err),
                    }
                }
                debug!("Waveform worker stopped");
            })?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn analyze(&self, track: Track) -> bool {
        match &self.sender {
            Some(sender) => sender.send(track).is_ok(),
            None => false,
        }
    }

    /// Drains the queue and joins the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Waveform worker panicked");
            }
        }
    }
}

impl Drop for WaveformWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
