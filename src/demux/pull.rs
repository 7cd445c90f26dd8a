//! Pull scheduling: a dedicated task reads whole frames from a random-access
//! upstream.

use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::common::errors::{DemuxError, ErrorDomain, FlowError, SeekError};
use crate::demux::constants::{NTSC_FRAME_SIZE, PULL_TASK_NAME};
use crate::demux::core::{DemuxCore, normalize_seek};
use crate::demux::element::Inner;
use crate::demux::output::{BusMessage, StreamEvent};
use crate::demux::segment::SeekEvent;
use crate::demux::types::{Format, StreamKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Started,
    Paused,
    Stopped,
}

/// Run state shared between the task thread and whoever steers it.
#[derive(Debug)]
struct TaskControl {
    state: Mutex<TaskState>,
    cvar: Condvar,
}

impl TaskControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(TaskState::Paused),
            cvar: Condvar::new(),
        }
    }

    /// Move to `next` unless the task has been stopped for good.
    fn set(&self, next: TaskState) {
        let mut state = self.state.lock();
        if *state != TaskState::Stopped {
            *state = next;
        }
        self.cvar.notify_all();
    }

    fn stop(&self) {
        *self.state.lock() = TaskState::Stopped;
        self.cvar.notify_all();
    }

    /// Block while paused. Returns `false` once stopped.
    fn wait_runnable(&self) -> bool {
        let mut state = self.state.lock();
        while *state == TaskState::Paused {
            self.cvar.wait(&mut state);
        }
        *state == TaskState::Started
    }
}

/// The streaming thread of pull mode.
///
/// The thread is created paused and holds only a weak reference to the
/// element, so dropping the element is enough to wind it down.
pub(crate) struct PullTask {
    control: Arc<TaskControl>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PullTask {
    pub fn spawn(inner: Weak<Inner>) -> io::Result<Self> {
        let control = Arc::new(TaskControl::new());
        let task_control = control.clone();
        let handle = thread::Builder::new()
            .name(PULL_TASK_NAME.to_string())
            .spawn(move || task_loop(&task_control, &inner))?;

        Ok(Self {
            control,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn state(&self) -> TaskState {
        *self.control.state.lock()
    }

    pub fn start(&self) {
        self.control.set(TaskState::Started);
    }

    pub fn pause(&self) {
        self.control.set(TaskState::Paused);
    }

    /// Stop the thread and wait for it, unless called from the thread itself.
    pub fn stop(&self) {
        self.control.stop();
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("pull task panicked");
        }
    }
}

impl Drop for PullTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn task_loop(control: &TaskControl, inner: &Weak<Inner>) {
    let span = tracing::debug_span!("pull_task");
    let _enter = span.enter();
    debug!("pull task running");

    while control.wait_runnable() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let mut core = inner.core.lock();
        if let Err(flow) = pull_frame(&inner, &mut core, control) {
            pause(&mut core, control, flow);
        }
    }
    debug!("pull task exiting");
}

/// One iteration: discover the header if needed, then demux the next frame.
fn pull_frame(
    inner: &Inner,
    core: &mut DemuxCore,
    control: &TaskControl,
) -> Result<(), FlowError> {
    let first = if inner.shared.gate.is_found() {
        None
    } else {
        find_header(inner, core, control)?
    };

    let len = core.frame_len.unwrap_or(NTSC_FRAME_SIZE);
    let offset = core.byte_segment.position;
    let frame = match first {
        Some(frame) => frame,
        None => inner.upstream.pull_range(offset, len)?,
    };
    if frame.len() < len {
        return Err(FlowError::Error(DemuxError::ShortRead {
            needed: len,
            got: frame.len(),
        }));
    }

    core.demux_frame(frame)?;
    core.byte_segment.position = offset + len as u64;
    Ok(())
}

/// Parse the header at the current position and replay a parked seek.
///
/// Hands back the bytes read when they are exactly the next frame to demux.
fn find_header(
    inner: &Inner,
    core: &mut DemuxCore,
    control: &TaskControl,
) -> Result<Option<Bytes>, FlowError> {
    let offset = core.byte_segment.position;
    let probe = inner.upstream.pull_range(offset, NTSC_FRAME_SIZE)?;
    if probe.len() < NTSC_FRAME_SIZE {
        return Err(FlowError::Error(DemuxError::ShortRead {
            needed: NTSC_FRAME_SIZE,
            got: probe.len(),
        }));
    }

    let header = core.parse_header(&probe)?;
    core.need_segment = true;
    core.discover_duration(inner.upstream.size());
    // The probe only covers a whole frame for 525/60.
    let whole_frame = header.frame_size == probe.len();
    if whole_frame {
        core.prime_audio_params(&probe);
    }

    if let Some(seek) = inner.shared.gate.mark_found() {
        info!("performing seek received before the first frame");
        if let Err(e) = replay_seek(core, control, &seek) {
            warn!("initial seek failed: {}", e);
            inner.shared.post(BusMessage::Warning {
                domain: ErrorDomain::Failed,
                detail: format!("Error performing initial seek: {e}"),
            });
        }
    }

    if whole_frame && core.byte_segment.position == offset {
        Ok(Some(probe))
    } else {
        Ok(None)
    }
}

/// Execute a seek that was parked before the header was known. The caller
/// already holds the stream lock.
fn replay_seek(
    core: &mut DemuxCore,
    control: &TaskControl,
    seek: &SeekEvent,
) -> Result<(), SeekError> {
    let seek = normalize_seek(&core.params(), StreamKind::Video, seek)?;
    if seek.flags.flush {
        core.shared().outputs.push_event(StreamEvent::FlushStart);
    }
    let result = core.configure_pull_seek(&seek);
    core.running = true;
    control.set(TaskState::Started);
    result
}

fn pause(core: &mut DemuxCore, control: &TaskControl, flow: FlowError) {
    info!("pausing task, reason {}", flow);
    core.running = false;
    control.set(TaskState::Paused);

    let shared = core.shared();
    match flow {
        FlowError::Eos if core.time_segment.flags.segment => {
            let stop = core.time_segment.effective_stop();
            debug!("posting segment done at {:?}", stop);
            shared.post(BusMessage::SegmentDone {
                format: Format::Time,
                position: stop,
            });
        }
        FlowError::Eos => {
            debug!("sending EOS, at end of stream");
            shared.outputs.announce_tags(true);
            shared.outputs.push_event(StreamEvent::Eos);
        }
        FlowError::NotLinked => {
            debug!("no output is linked, sending EOS");
            shared.outputs.push_event(StreamEvent::Eos);
        }
        FlowError::Flushing => {}
        FlowError::Error(e) => {
            error!("streaming stopped: {}", e);
            shared.post_error(&e);
            shared.outputs.push_event(StreamEvent::Eos);
        }
    }
}

/// Seek handling while the element drives the data flow.
pub(crate) struct PullScheduler {
    task: PullTask,
}

impl PullScheduler {
    pub fn new(task: PullTask) -> Self {
        Self { task }
    }

    pub fn handle_seek(
        &self,
        inner: &Inner,
        kind: StreamKind,
        seek: &SeekEvent,
    ) -> Result<(), SeekError> {
        let seek = normalize_seek(&inner.shared.params(), kind, seek)?;
        debug!(
            "seek to {}..{:?} flush {}, task {:?}",
            seek.start,
            seek.stop,
            seek.flags.flush,
            self.task.state()
        );

        if seek.flags.flush {
            inner.shared.outputs.push_event(StreamEvent::FlushStart);
        } else {
            self.task.pause();
        }

        let mut core = inner.core.lock();
        let result = core.configure_pull_seek(&seek);
        core.running = true;
        self.task.start();
        result
    }

    /// Stop the task for good.
    pub fn shutdown(self) {
        self.task.stop();
    }
}
