// THEORY:
// A depth camera delivers frames on its own thread while the user presses
// buttons on another. `DepthSession` puts a single frame-processing task between
// the two. Frames and commands arrive on separate channels; before each frame
// the task drains every pending command, so a capture or mode change sent
// before a frame always takes effect for that frame. Processed output leaves on
// a third channel in frame order.
//
// Key architectural principles:
// 1.  **One owner:** only the worker task touches the `FramePipeline`. Callers
//     hold a cheap, cloneable `SessionHandle`.
// 2.  **Bounded frames:** the frame channel is bounded, so a slow consumer
//     applies backpressure to the source instead of growing a queue.
// 3.  **Orderly shutdown:** a shutdown command stops intake but finishes every
//     frame already queued.

use crate::core_modules::depth_frame::DepthFrame;
use crate::error::{PipelineError, Result};
use crate::pipeline::{FramePipeline, OutputMode, PipelineOutput};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_FRAME_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    CaptureBackground,
    SetMode(OutputMode),
    Shutdown,
}

/// One processed frame, tagged with its position in the input sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub frame_id: u64,
    pub output: PipelineOutput,
}

/// Cloneable sender side of a session.
#[derive(Clone)]
pub struct SessionHandle {
    frames: mpsc::Sender<DepthFrame>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Queues a frame, waiting while the session is at capacity.
    pub async fn submit_frame(&self, frame: DepthFrame) -> Result<()> {
        self.frames.send(frame).await.map_err(|_| PipelineError::SessionClosed)
    }

    pub fn capture_background(&self) -> Result<()> {
        self.send(SessionCommand::CaptureBackground)
    }

    pub fn set_mode(&self, mode: OutputMode) -> Result<()> {
        self.send(SessionCommand::SetMode(mode))
    }

    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| PipelineError::SessionClosed)
    }

    /// Forwards every frame of `frames` into the session. Returns the number sent.
    pub async fn feed<S>(&self, frames: S) -> Result<u64>
    where
        S: Stream<Item = DepthFrame>,
    {
        let mut frames = std::pin::pin!(frames);
        let mut sent = 0;
        while let Some(frame) = frames.next().await {
            self.submit_frame(frame).await?;
            sent += 1;
        }
        Ok(sent)
    }
}

pub struct DepthSession {
    handle: SessionHandle,
    worker: JoinHandle<u64>,
}

impl DepthSession {
    /// Spawns the worker task. Must be called inside a tokio runtime.
    pub fn spawn(pipeline: FramePipeline) -> (Self, mpsc::Receiver<FrameResult>) {
        Self::with_capacity(pipeline, DEFAULT_FRAME_CAPACITY)
    }

    pub fn with_capacity(pipeline: FramePipeline, capacity: usize) -> (Self, mpsc::Receiver<FrameResult>) {
        let capacity = capacity.max(1);
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(capacity);

        let worker = tokio::spawn(run_worker(pipeline, frame_rx, command_rx, output_tx));
        let handle = SessionHandle { frames: frame_tx, commands: command_tx };
        (Self { handle, worker }, output_rx)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stops intake, waits for queued frames to finish and returns how many
    /// frames the session processed.
    pub async fn shutdown(self) -> Result<u64> {
        // The worker may already be gone if every output receiver was dropped.
        let _ = self.handle.send(SessionCommand::Shutdown);
        drop(self.handle);
        self.worker.await.map_err(|err| {
            warn!(%err, "Session worker did not finish cleanly.");
            PipelineError::SessionClosed
        })
    }
}

async fn run_worker(
    mut pipeline: FramePipeline,
    mut frames: mpsc::Receiver<DepthFrame>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    output: mpsc::Sender<FrameResult>,
) -> u64 {
    let control = pipeline.control();
    let mut commands_open = true;
    let mut frame_id = 0u64;

    loop {
        tokio::select! {
            biased;

            command = commands.recv(), if commands_open => match command {
                Some(SessionCommand::CaptureBackground) => control.capture_background(),
                Some(SessionCommand::SetMode(mode)) => control.set_mode(mode),
                Some(SessionCommand::Shutdown) => {
                    debug!("Shutdown requested, draining queued frames.");
                    frames.close();
                }
                None => commands_open = false,
            },

            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let id = frame_id;
                frame_id += 1;
                match pipeline.process_frame(&frame) {
                    Ok(out) => {
                        if output.send(FrameResult { frame_id: id, output: out }).await.is_err() {
                            debug!("Output receiver dropped, stopping session.");
                            break;
                        }
                    }
                    Err(err) => warn!(frame_id = id, %err, "Frame skipped."),
                }
            }
        }
    }

    info!(frames = frame_id, "Depth session finished.");
    frame_id
}
