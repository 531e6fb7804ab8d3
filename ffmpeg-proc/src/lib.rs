//! Launching and driving external ffmpeg-compatible codec processes.
//!
//! The codec binary is treated as an opaque byte transformer: it is started
//! from an [`ArgTemplate`], fed through stdin and finally shut down with
//! [`CodecProcess::finish`], which escalates to a kill when the process does
//! not exit within the grace period.

pub mod process;
pub mod template;

pub use process::{CodecProcess, Finish};
pub use template::{ArgTemplate, TemplateVars};
