//! Scripted codecs for pipeline tests.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;

use super::{Thumbnail, ThumbnailCodec};
use crate::{error::CodecError, media::MediaKind};

#[derive(Debug, Default, Clone, Copy)]
enum Behavior {
    #[default]
    Succeed,
    Fail,
    Panic,
}

#[derive(Debug)]
struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    started: mpsc::UnboundedSender<PathBuf>,
}

/// Counts calls per path. Optionally holds every call until
/// [`release`](Self::release) and reports each call as it starts.
#[derive(Debug, Default)]
pub(crate) struct CountingCodec {
    calls: Mutex<HashMap<PathBuf, usize>>,
    behavior: Behavior,
    gate: Option<Gate>,
}

impl CountingCodec {
    pub(crate) fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            ..Self::default()
        }
    }

    pub(crate) fn panicking() -> Self {
        Self {
            behavior: Behavior::Panic,
            ..Self::default()
        }
    }

    pub(crate) fn gated() -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (started, rx) = mpsc::unbounded_channel();
        let codec = Self {
            gate: Some(Gate {
                open: Mutex::new(false),
                opened: Condvar::new(),
                started,
            }),
            ..Self::default()
        };
        (codec, rx)
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            *gate.open.lock() = true;
            gate.opened.notify_all();
        }
    }

    pub(crate) fn calls_for(&self, path: &Path) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl ThumbnailCodec for CountingCodec {
    fn generate(
        &self,
        path: &Path,
        _kind: MediaKind,
    ) -> Result<Thumbnail, CodecError> {
        *self
            .calls
            .lock()
            .entry(path.to_path_buf())
            .or_default() += 1;

        if let Some(gate) = &self.gate {
            let _ = gate.started.send(path.to_path_buf());
            let mut open = gate.open.lock();
            while !*open {
                gate.opened.wait(&mut open);
            }
        }

        match self.behavior {
            Behavior::Succeed => {
                let tag = path.as_os_str().len() as u8;
                Ok(Thumbnail::new(vec![0xFF, 0xD8, tag], 8, 8))
            }
            Behavior::Fail => {
                Err(CodecError::Decode("scripted failure".to_string()))
            }
            Behavior::Panic => panic!("scripted codec panic"),
        }
    }
}
