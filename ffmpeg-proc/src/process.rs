use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

/// How a codec process ended after [`CodecProcess::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// Exited on its own within the grace period.
    Exited(ExitStatus),
    /// Did not exit in time (or could not be waited on) and was killed.
    Killed,
}

impl Finish {
    pub fn success(&self) -> bool {
        matches!(self, Finish::Exited(status) if status.success())
    }
}

/// A running codec process. Stdin, when requested, is the only input path;
/// stdout is discarded and stderr is forwarded to the log at debug level.
pub struct CodecProcess {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl CodecProcess {
    pub fn spawn(
        name: &str,
        program: &str,
        args: &[String],
        feed_stdin: bool,
    ) -> anyhow::Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if feed_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("{}: spawning {} {}", name, program, args.join(" "));
        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("{}: failed to spawn {:?}: {}", name, program, e))?;

        let stdin = if feed_stdin {
            Some(
                child
                    .stdin
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("{}: stdin not captured", name))?,
            )
        } else {
            None
        };

        if let Some(stderr) = child.stderr.take() {
            let name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if !line.trim().is_empty() {
                                log::debug!("{}: {}", name, line.trim());
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("{}: error reading stderr: {}", name, e);
                            break;
                        }
                    }
                }
            });
        }

        Ok(Self {
            name: name.to_string(),
            child,
            stdin,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Writes the whole buffer to stdin. Blocks while the process is not
    /// reading, which is the backpressure point of a feeder.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))?;
        stdin.write_all(data).await
    }

    /// Non-blocking check whether the process is gone.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    pub fn close_input(&mut self) {
        self.stdin.take();
    }

    /// Closes stdin and waits for the process to exit. When it is still
    /// running after `grace` it is killed.
    pub async fn finish(mut self, grace: Duration) -> Finish {
        self.close_input();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!("{}: exited with {}", self.name, status);
                Finish::Exited(status)
            }
            Ok(Err(e)) => {
                log::warn!("{}: wait failed: {}, killing", self.name, e);
                self.kill().await;
                Finish::Killed
            }
            Err(_) => {
                log::warn!("{}: no exit within {:?}, killing", self.name, grace);
                self.kill().await;
                Finish::Killed
            }
        }
    }

    /// Waits without a deadline. Used for processes that do not read stdin
    /// and run to completion.
    pub async fn wait(mut self) -> io::Result<ExitStatus> {
        self.close_input();
        self.child.wait().await
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            log::warn!("{}: kill failed: {}", self.name, e);
        }
    }
}

#[cfg(test)]
#[path = "process_test.rs"]
mod process_test;
