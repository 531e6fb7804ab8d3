use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use ffmpeg_proc::{CodecProcess, Finish, TemplateVars};
use tokio::{
    sync::{RwLock, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{MANIFEST_NAME, ServerConfig},
    error::{Error, Result},
    manager::StreamRegistry,
    media::{
        stream::{IntakeCmd, IntakeReceiver, IntakeSender, intake_queue},
        types::{CameraId, PipeState},
    },
};

/// One camera's byte path: intake queue, codec processes and the feeder task
/// that connects them.
pub struct CameraPipeline {
    id: CameraId,
    intake: IntakeSender,
    // shared by enqueue, exclusive in signal_end: the sentinel can never
    // overtake a chunk that already passed the state check
    gate: RwLock<()>,
    state: watch::Sender<PipeState>,
    received: AtomicU64,
}

enum FeedEnd {
    Eof,
    Shutdown,
    Broken(String),
    // codec stopped reading and the drain outlived the grace period
    Stalled,
}

impl CameraPipeline {
    /// Creates the artifact directories, launches the codec processes and
    /// spawns the feeder.
    pub(crate) async fn start(
        id: CameraId,
        config: Arc<ServerConfig>,
        registry: StreamRegistry,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let processes = launch_codecs(&id, &config).await?;
        let (intake, rx) = intake_queue(config.queue_capacity);
        let (state, _) = watch::channel(PipeState::Active);

        let pipe = Arc::new(Self {
            id,
            intake,
            gate: RwLock::new(()),
            state,
            received: AtomicU64::new(0),
        });
        log::info!(
            "Pipe {}: started with {} codec process(es)",
            pipe.id,
            processes.len()
        );

        let feeder = Arc::clone(&pipe);
        tokio::spawn(async move {
            feeder.feed(rx, processes, registry, config, cancel).await;
        });
        Ok(pipe)
    }

    pub fn id(&self) -> &CameraId {
        &self.id
    }

    pub fn state(&self) -> PipeState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PipeState::Closed
    }

    /// Appends a chunk to the intake queue. Never waits on codec I/O; with a
    /// bounded queue it may wait for queue space.
    pub async fn enqueue(&self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Err(Error::EmptyChunk);
        }
        let _gate = self.gate.read().await;
        if self.state() != PipeState::Active {
            return Err(Error::Rejected(self.id.to_string()));
        }

        let len = chunk.len() as u64;
        self.intake
            .send(IntakeCmd::Data(chunk))
            .await
            .map_err(|_| Error::Rejected(self.id.to_string()))?;
        self.received.fetch_add(len, Ordering::AcqRel);
        Ok(())
    }

    /// Moves `Active -> Closing` and queues the end sentinel behind every
    /// chunk already accepted. Returns false when the pipeline was not active.
    ///
    /// The state flips before the gate is taken, so the feeder's drain
    /// deadline starts even while producers are still parked on a full queue.
    pub async fn signal_end(&self) -> bool {
        if !self.advance(PipeState::Closing) {
            return false;
        }
        log::info!("Pipe {}: end of stream, draining", self.id);
        // wait out producers that passed the state check before the flip
        drop(self.gate.write().await);
        if self.intake.send(IntakeCmd::Eof).await.is_err() {
            log::debug!("Pipe {}: feeder already stopped", self.id);
        }
        true
    }

    /// Bytes accepted since the previous call.
    pub fn take_received(&self) -> u64 {
        self.received.swap(0, Ordering::AcqRel)
    }

    /// Resolves once the pipeline reached `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == PipeState::Closed).await;
    }

    fn advance(&self, next: PipeState) -> bool {
        self.state.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    async fn feed(
        self: Arc<Self>,
        mut rx: IntakeReceiver,
        mut processes: Vec<CodecProcess>,
        registry: StreamRegistry,
        config: Arc<ServerConfig>,
        cancel: CancellationToken,
    ) {
        let idle_poll = config.idle_poll();
        let grace = config.teardown_grace();
        let mut state = self.state.subscribe();
        let mut drain_deadline = None;
        let mut written = 0u64;

        let end = loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(IntakeCmd::Data(chunk)) => {
                        tokio::select! {
                            result = write_chunk(&mut processes, &chunk) => {
                                if let Err(e) = result {
                                    break FeedEnd::Broken(e.to_string());
                                }
                            }
                            _ = cancel.cancelled() => break FeedEnd::Shutdown,
                            _ = drain_expired(&mut state, &mut drain_deadline, grace) => {
                                break FeedEnd::Stalled;
                            }
                        }
                        written += chunk.len() as u64;
                    }
                    Some(IntakeCmd::Eof) | None => break FeedEnd::Eof,
                },
                _ = cancel.cancelled() => break FeedEnd::Shutdown,
                _ = tokio::time::sleep(idle_poll) => {
                    if let Some(i) = processes.iter_mut().position(|p| p.has_exited()) {
                        break FeedEnd::Broken(format!("{} exited", processes[i].name()));
                    }
                }
            }
        };
        rx.close();

        match &end {
            FeedEnd::Broken(reason) => {
                log::warn!(
                    "Pipe {}: codec failed after {} bytes: {}",
                    self.id,
                    written,
                    reason
                );
                self.advance(PipeState::Closed);
                finish_all(processes, grace).await;
            }
            FeedEnd::Stalled => {
                log::warn!(
                    "Pipe {}: codec stopped reading, {} bytes written, killing",
                    self.id,
                    written
                );
                finish_all(processes, Duration::ZERO).await;
                self.advance(PipeState::Closed);
            }
            FeedEnd::Eof | FeedEnd::Shutdown => {
                if matches!(end, FeedEnd::Shutdown) {
                    self.advance(PipeState::Closing);
                    log::info!("Pipe {}: service shutting down", self.id);
                }
                log::info!(
                    "Pipe {}: drained {} bytes, closing codec input",
                    self.id,
                    written
                );
                finish_all(processes, grace).await;
                self.advance(PipeState::Closed);
            }
        }

        let dir = config.live_dir(&self.id);
        let retain = config.retain_live_artifacts;
        let id = &self.id;
        registry
            .remove_then(id, &self, async {
                if retain {
                    return;
                }
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    log::warn!("Pipe {}: remove {} failed: {}", id, dir.display(), e);
                }
            })
            .await;
        log::info!("Pipe {}: closed", self.id);
    }
}

async fn launch_codecs(id: &CameraId, config: &ServerConfig) -> Result<Vec<CodecProcess>> {
    let codec = &config.codec;
    let vars = TemplateVars::new().camera_id(id.as_str()).encode(
        codec.width,
        codec.height,
        codec.framerate,
        &codec.bitrate,
    );

    let mut outputs = vec![("live", config.live_dir(id), &codec.live_args)];
    if config.record {
        outputs.push(("record", config.record_dir(id), &codec.record_args));
    }

    let mut processes = Vec::with_capacity(outputs.len());
    for (kind, dir, template) in outputs {
        tokio::fs::create_dir_all(&dir).await?;
        let args = template.render(&vars.clone().output(&dir.join(MANIFEST_NAME)));
        let name = format!("{}/{}", id, kind);
        let process = CodecProcess::spawn(&name, &codec.program, &args, true)
            .map_err(|e| Error::ProcessFailure(format!("{:#}", e)))?;
        log::debug!("{}: running as pid {:?}", name, process.pid());
        processes.push(process);
    }
    Ok(processes)
}

/// Resolves `grace` after the pipeline entered `Closing`. The deadline is
/// fixed the first time it is observed, so it bounds the whole drain rather
/// than each write.
async fn drain_expired(
    state: &mut watch::Receiver<PipeState>,
    deadline: &mut Option<Instant>,
    grace: Duration,
) {
    let at = match *deadline {
        Some(at) => at,
        None => {
            let gone = state.wait_for(|s| *s >= PipeState::Closing).await.is_err();
            if gone {
                return std::future::pending().await;
            }
            *deadline.insert(Instant::now() + grace)
        }
    };
    tokio::time::sleep_until(at).await;
}

/// Every process receives the chunk before the next one is written.
async fn write_chunk(processes: &mut [CodecProcess], chunk: &[u8]) -> std::io::Result<()> {
    futures::future::try_join_all(processes.iter_mut().map(|p| p.write(chunk))).await?;
    Ok(())
}

async fn finish_all(processes: Vec<CodecProcess>, grace: Duration) {
    let results = futures::future::join_all(processes.into_iter().map(|process| async move {
        let name = process.name().to_string();
        (name, process.finish(grace).await)
    }))
    .await;

    for (name, finish) in results {
        match finish {
            Finish::Exited(status) if !status.success() => {
                log::warn!("{}: exited with {}", name, status);
            }
            Finish::Exited(_) => {}
            Finish::Killed => log::warn!("{}: killed after {:?} grace period", name, grace),
        }
    }
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
