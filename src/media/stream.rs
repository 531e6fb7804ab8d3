use bytes::Bytes;
use tokio::sync::mpsc;

/// Items flowing through a pipeline's intake queue. `Eof` is the sentinel
/// appended by `signal_end` after every chunk already queued.
#[derive(Clone, Debug)]
pub enum IntakeCmd {
    Data(Bytes),
    Eof,
}

/// The consumer side has gone away.
#[derive(Debug)]
pub struct IntakeClosed;

/// Multi-producer side of an intake queue.
#[derive(Clone)]
pub enum IntakeSender {
    Bounded(mpsc::Sender<IntakeCmd>),
    Unbounded(mpsc::UnboundedSender<IntakeCmd>),
}

/// Single-consumer side of an intake queue, owned by the feeder.
pub enum IntakeReceiver {
    Bounded(mpsc::Receiver<IntakeCmd>),
    Unbounded(mpsc::UnboundedReceiver<IntakeCmd>),
}

/// With a capacity the queue is bounded and a full queue makes `send` wait.
pub fn intake_queue(capacity: Option<usize>) -> (IntakeSender, IntakeReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (IntakeSender::Bounded(tx), IntakeReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (IntakeSender::Unbounded(tx), IntakeReceiver::Unbounded(rx))
        }
    }
}

impl IntakeSender {
    pub async fn send(&self, cmd: IntakeCmd) -> Result<(), IntakeClosed> {
        match self {
            IntakeSender::Bounded(tx) => tx.send(cmd).await.map_err(|_| IntakeClosed),
            IntakeSender::Unbounded(tx) => tx.send(cmd).map_err(|_| IntakeClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            IntakeSender::Bounded(tx) => tx.is_closed(),
            IntakeSender::Unbounded(tx) => tx.is_closed(),
        }
    }
}

impl IntakeReceiver {
    pub async fn recv(&mut self) -> Option<IntakeCmd> {
        match self {
            IntakeReceiver::Bounded(rx) => rx.recv().await,
            IntakeReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Stops accepting new items; blocked senders are released with an error.
    pub fn close(&mut self) {
        match self {
            IntakeReceiver::Bounded(rx) => rx.close(),
            IntakeReceiver::Unbounded(rx) => rx.close(),
        }
    }
}
