use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 128;

/// Producer-supplied camera identifier. Doubles as a directory name, so it
/// is restricted to a single safe path component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn parse(raw: &str) -> Result<Self> {
        if is_safe_component(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidCameraId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CameraId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejects anything that could leave the directory it is joined onto.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// Pipeline lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeState {
    Active,
    Closing,
    Closed,
}

impl Display for PipeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipeState::Active => "active",
            PipeState::Closing => "closing",
            PipeState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}
