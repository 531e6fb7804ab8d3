use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use ffmpeg_proc::{CodecProcess, TemplateVars};
use futures::{
    StreamExt, future,
    stream::{self, BoxStream},
};
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    config::ServerConfig,
    error::{Error, Result},
    media::types::CameraId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Wire name used by the status stream. A job that never started is
    /// reported as `not_found`.
    pub fn event_name(&self) -> &'static str {
        match self {
            JobState::NotStarted => "not_found",
            JobState::InProgress => "in_progress",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

struct ConversionJob {
    state: watch::Sender<JobState>,
    source: PathBuf,
    destination: PathBuf,
}

impl ConversionJob {
    fn state(&self) -> JobState {
        *self.state.borrow()
    }
}

/// Single-flight conversion of recorded manifests into downloadable files.
#[derive(Clone)]
pub struct ConversionJobs {
    inner: Arc<JobsInner>,
}

struct JobsInner {
    jobs: Mutex<HashMap<CameraId, Arc<ConversionJob>>>,
    config: Arc<ServerConfig>,
}

impl ConversionJobs {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            inner: Arc::new(JobsInner {
                jobs: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Starts converting the recording of `id` in the background.
    ///
    /// Fails with `NotFound` when there is no recorded manifest and with
    /// `Conflict` when a job is already running or the destination exists.
    pub async fn submit(&self, id: &CameraId) -> Result<()> {
        let config = &self.inner.config;
        let source = config.recorded_manifest(id);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(Error::NotFound(format!("recording for {}", id)));
        }
        tokio::fs::create_dir_all(&config.converted_root).await?;
        let destination = config.converted_file(id);

        let job = {
            let mut jobs = self.lock();
            if jobs
                .get(id)
                .is_some_and(|job| job.state() == JobState::InProgress)
            {
                return Err(Error::Conflict(format!(
                    "conversion for {} already in progress",
                    id
                )));
            }
            if destination.exists() {
                return Err(Error::Conflict(format!(
                    "{} already exists",
                    destination.display()
                )));
            }

            let (state, _) = watch::channel(JobState::InProgress);
            let job = Arc::new(ConversionJob {
                state,
                source,
                destination,
            });
            jobs.insert(id.clone(), Arc::clone(&job));
            job
        };

        log::info!(
            "Convert {}: {} -> {}",
            id,
            job.source.display(),
            job.destination.display()
        );
        let config = Arc::clone(config);
        let id = id.clone();
        tokio::spawn(async move {
            run_job(&id, &job, &config).await;
        });
        Ok(())
    }

    pub fn status(&self, id: &CameraId) -> JobState {
        self.lock()
            .get(id)
            .map(|job| job.state())
            .unwrap_or(JobState::NotStarted)
    }

    pub fn is_in_progress(&self, id: &CameraId) -> bool {
        self.status(id) == JobState::InProgress
    }

    /// Sorted ids of running jobs.
    pub fn in_progress(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self
            .lock()
            .iter()
            .filter(|(_, job)| job.state() == JobState::InProgress)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Current state followed by every change, ending after a terminal
    /// state. Unknown ids yield a single `NotStarted`.
    pub fn status_stream(&self, id: &CameraId) -> BoxStream<'static, JobState> {
        let rx = self.lock().get(id).map(|job| job.state.subscribe());
        let Some(rx) = rx else {
            return stream::once(future::ready(JobState::NotStarted)).boxed();
        };
        // ends right after yielding a terminal state instead of waiting for
        // a further change that never comes
        stream::unfold(Some((rx, true)), |next| async move {
            let (mut rx, first) = next?;
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let state = *rx.borrow_and_update();
            let next = (!state.is_terminal()).then_some((rx, false));
            Some((state, next))
        })
        .boxed()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CameraId, Arc<ConversionJob>>> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_job(id: &CameraId, job: &ConversionJob, config: &ServerConfig) {
    let codec = &config.codec;
    let vars = TemplateVars::new()
        .camera_id(id.as_str())
        .input(&job.source)
        .output(&job.destination);
    let args = codec.convert_args.render(&vars);

    let result = match CodecProcess::spawn(&format!("{}/convert", id), &codec.program, &args, false)
    {
        Ok(process) => match process.wait().await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(format!("exited with {}", status)),
            Err(e) => Err(e.to_string()),
        },
        Err(e) => Err(format!("{:#}", e)),
    };

    match result {
        Ok(()) => {
            log::info!("Convert {}: completed", id);
            job.state.send_replace(JobState::Completed);
        }
        Err(reason) => {
            log::error!("Convert {}: {}", id, Error::ProcessFailure(reason));
            if let Err(e) = tokio::fs::remove_file(&job.destination).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        "Convert {}: remove partial {} failed: {}",
                        id,
                        job.destination.display(),
                        e
                    );
                }
            }
            job.state.send_replace(JobState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use ffmpeg_proc::ArgTemplate;

    use super::*;

    fn jobs(dir: &Path, script: &str) -> (ConversionJobs, Arc<ServerConfig>) {
        let mut config = ServerConfig::default().with_data_dir(dir);
        config.codec.program = "sh".to_string();
        config.codec.convert_args = ArgTemplate::new(["-c", script, "{input}", "{output}"]);
        let config = Arc::new(config);
        (ConversionJobs::new(Arc::clone(&config)), config)
    }

    fn record(config: &ServerConfig, id: &CameraId) {
        let manifest = config.recorded_manifest(id);
        std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        std::fs::write(manifest, b"<MPD/>").unwrap();
    }

    async fn states(jobs: &ConversionJobs, id: &CameraId) -> Vec<JobState> {
        tokio::time::timeout(Duration::from_secs(10), jobs.status_stream(id).collect())
            .await
            .expect("status stream did not finish")
    }

    #[tokio::test]
    async fn test_conversion_completes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (jobs, config) = jobs(dir.path(), "cp \"$0\" \"$1\"");
        let id = CameraId::parse("cam-1")?;
        record(&config, &id);

        jobs.submit(&id).await?;
        let seen = states(&jobs, &id).await;

        assert_eq!(seen.last(), Some(&JobState::Completed));
        assert_eq!(jobs.status(&id), JobState::Completed);
        assert_eq!(std::fs::read(config.converted_file(&id))?, b"<MPD/>");
        assert!(jobs.in_progress().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_status_stream_of_finished_job_yields_terminal_and_ends() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (jobs, config) = jobs(dir.path(), "cp \"$0\" \"$1\"");
        let id = CameraId::parse("cam-1")?;
        record(&config, &id);

        jobs.submit(&id).await?;
        states(&jobs, &id).await;

        // a late subscriber sees only the outcome, and the stream still ends
        assert_eq!(states(&jobs, &id).await, vec![JobState::Completed]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_recording_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (jobs, _) = jobs(dir.path(), "cp \"$0\" \"$1\"");
        let id = CameraId::parse("unknown-id")?;

        assert!(matches!(jobs.submit(&id).await, Err(Error::NotFound(_))));
        assert_eq!(jobs.status(&id), JobState::NotStarted);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_submit_while_running_conflicts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (jobs, config) = jobs(dir.path(), "sleep 0.5; cat \"$0\" >> \"$1\"");
        let id = CameraId::parse("cam-1")?;
        record(&config, &id);

        jobs.submit(&id).await?;
        assert!(matches!(jobs.submit(&id).await, Err(Error::Conflict(_))));
        assert_eq!(jobs.in_progress(), vec![id.clone()]);

        let seen = states(&jobs, &id).await;
        assert_eq!(seen.first(), Some(&JobState::InProgress));
        assert_eq!(seen.last(), Some(&JobState::Completed));
        // a second process would have appended a second copy
        assert_eq!(std::fs::read(config.converted_file(&id))?, b"<MPD/>");

        // the finished artifact is never overwritten
        assert!(matches!(jobs.submit(&id).await, Err(Error::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_conversion_removes_partial_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (jobs, config) = jobs(dir.path(), "echo partial > \"$1\"; exit 2");
        let id = CameraId::parse("cam-1")?;
        record(&config, &id);

        jobs.submit(&id).await?;
        let seen = states(&jobs, &id).await;

        assert_eq!(seen.last(), Some(&JobState::Failed));
        assert!(!config.converted_file(&id).exists());

        // a failed job does not block a retry
        jobs.submit(&id).await?;
        assert_eq!(states(&jobs, &id).await.last(), Some(&JobState::Failed));
        Ok(())
    }

    #[tokio::test]
    async fn test_launch_error_marks_failed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = ServerConfig::default().with_data_dir(dir.path());
        config.codec.program = "/nonexistent/codec-binary".to_string();
        let config = Arc::new(config);
        let jobs = ConversionJobs::new(Arc::clone(&config));
        let id = CameraId::parse("cam-1")?;
        record(&config, &id);

        jobs.submit(&id).await?;
        assert_eq!(states(&jobs, &id).await.last(), Some(&JobState::Failed));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_stream_for_unknown_id_is_terminal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (jobs, _) = jobs(dir.path(), "true");
        let id = CameraId::parse("nobody")?;

        assert_eq!(states(&jobs, &id).await, vec![JobState::NotStarted]);
        assert_eq!(JobState::NotStarted.event_name(), "not_found");
        Ok(())
    }
}
