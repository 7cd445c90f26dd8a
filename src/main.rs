use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use dvdemux::common::errors::FlowError;
use dvdemux::common::logger;
use dvdemux::common::types::AnyResult;
use dvdemux::configs::{Config, OutputConfig};
use dvdemux::demux::{
    ActiveMode, BusMessage, Caps, Downstream, DvDemux, InputChunk, OutputBuffer, StreamEvent,
    StreamKind,
};
use dvdemux::source::FileSource;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct StreamStats {
    caps: Option<Caps>,
    buffers: u64,
    bytes: u64,
    eos: bool,
}

/// Writes each demuxed stream to its own file.
struct FileSink {
    audio: Mutex<BufWriter<File>>,
    video: Mutex<BufWriter<File>>,
    stats: Mutex<HashMap<StreamKind, StreamStats>>,
    eos_tx: flume::Sender<StreamKind>,
}

fn create_output(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

impl FileSink {
    fn create(config: &OutputConfig, eos_tx: flume::Sender<StreamKind>) -> AnyResult<Self> {
        Ok(Self {
            audio: Mutex::new(create_output(&config.audio_path)?),
            video: Mutex::new(create_output(&config.video_path)?),
            stats: Mutex::new(HashMap::new()),
            eos_tx,
        })
    }

    /// Every stream that appeared has reached EOS.
    fn finished(&self) -> bool {
        let stats = self.stats.lock();
        !stats.is_empty() && stats.values().all(|s| s.eos)
    }

    fn flush(&self) -> std::io::Result<()> {
        self.audio.lock().flush()?;
        self.video.lock().flush()
    }

    fn report(&self) {
        for (kind, stats) in self.stats.lock().iter() {
            info!(
                "{}: {} buffers, {} bytes, caps {:?}",
                kind, stats.buffers, stats.bytes, stats.caps
            );
        }
    }
}

impl Downstream for FileSink {
    fn pad_added(&self, kind: StreamKind) {
        info!("new {} stream", kind);
        self.stats.lock().entry(kind).or_default();
    }

    fn caps(&self, kind: StreamKind, caps: &Caps) {
        info!("{} stream: {} {:?}", kind, caps.media_type(), caps);
        self.stats.lock().entry(kind).or_default().caps = Some(*caps);
    }

    fn buffer(&self, kind: StreamKind, buffer: OutputBuffer) -> Result<(), FlowError> {
        let writer = match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        };
        if let Err(e) = writer.lock().write_all(&buffer.data) {
            return Err(FlowError::Error(e.into()));
        }

        let mut stats = self.stats.lock();
        let entry = stats.entry(kind).or_default();
        entry.buffers += 1;
        entry.bytes += buffer.data.len() as u64;
        Ok(())
    }

    fn event(&self, kind: StreamKind, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::Eos => {
                self.stats.lock().entry(kind).or_default().eos = true;
                let _ = self.eos_tx.send(kind);
            }
            StreamEvent::Segment(segment) => debug!("{} segment {:?}", kind, segment),
            StreamEvent::Tags(tags) => debug!("{} tags {:?}", kind, tags),
            StreamEvent::FlushStart | StreamEvent::FlushStop => {}
        }
        true
    }
}

/// Feed the whole file through the element's push path.
fn feed(demux: &DvDemux, source: &FileSource, chunk_size: usize) -> AnyResult<()> {
    while let Some((data, discont)) = source.next_chunk(chunk_size)? {
        let mut chunk = InputChunk::new(data);
        chunk.discont = discont;
        match demux.chain(chunk) {
            Ok(()) => {}
            // Already reported on the bus.
            Err(FlowError::Error(_)) => return Ok(()),
            Err(e) => {
                debug!("stopping input: {}", e);
                break;
            }
        }
    }
    demux.sink_event(StreamEvent::Eos);
    Ok(())
}

/// Wait until all streams ended or the element reported an error.
fn wait(
    sink: &FileSink,
    bus: &flume::Receiver<BusMessage>,
    eos_rx: &flume::Receiver<StreamKind>,
) -> AnyResult<()> {
    loop {
        if sink.finished() {
            return Ok(());
        }

        let message = flume::Selector::new()
            .recv(bus, |msg| msg.ok())
            .recv(eos_rx, |_| None)
            .wait();

        match message {
            Some(BusMessage::Error { domain, detail }) => {
                return Err(format!("{:?} error: {}", domain, detail).into());
            }
            Some(BusMessage::Warning { domain, detail }) => {
                warn!("{:?} warning: {}", domain, detail);
            }
            Some(BusMessage::SegmentDone { .. }) => return Ok(()),
            Some(BusMessage::SegmentStart { .. }) | None => {}
        }
    }
}

fn run(config: &Config, input: &str) -> AnyResult<()> {
    let source = Arc::new(FileSource::open(input)?);
    if source.is_empty() {
        return Err(format!("{} is empty", input).into());
    }

    let (eos_tx, eos_rx) = flume::unbounded();
    let sink = Arc::new(FileSink::create(&config.output, eos_tx)?);
    let demux = DvDemux::new(sink.clone(), source.clone());
    let bus = demux.bus();

    let mode = demux.activate(config.demux.scheduling)?;
    info!("demuxing {} in {:?} mode", input, mode);
    if mode == ActiveMode::Push {
        feed(&demux, &source, config.demux.push_chunk_size)?;
    }

    let result = wait(&sink, &bus, &eos_rx);
    demux.deactivate();
    sink.flush()?;
    sink.report();
    result
}

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logger::init(&config.logging);
    info!(
        "dvdemux {} (commit {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT")
    );

    let Some(input) = std::env::args().nth(1) else {
        error!("usage: dvdemux <input.dv>");
        return ExitCode::FAILURE;
    };

    match run(&config, &input) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
