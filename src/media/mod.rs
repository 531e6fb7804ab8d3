//! Per-camera pipeline: intake queue feeding external codec processes
//!
//! Data Flow:
//! ```text
//!  POST /upload ─┐
//!  POST /upload ─┼─► IntakeQueue (FIFO, many producers) ──► feeder task ──┬─► live codec   ─► live/<id>/manifest.mpd
//!  POST /upload ─┘            ▲                                         └─► record codec ─► recordings/<id>/manifest.mpd
//!                             │
//!  DELETE /upload ──► Eof sentinel (after every queued chunk)
//! ```
//!
//! The feeder is the only writer to the codec processes, so chunk order in
//! the queue is the byte order the codec sees.

pub mod pipe;
pub mod stream;
pub mod types;
