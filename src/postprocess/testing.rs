//! Dispatch stubs for unit tests.

use std::sync::Mutex;

use agora_core::{RecordId, RecordKind};
use anyhow::Result;
use async_trait::async_trait;

use super::Dispatch;

/// Records every dispatched job instead of running it.
#[derive(Default)]
pub(crate) struct RecordingDispatch {
    pub calls: Mutex<Vec<(RecordKind, RecordId)>>,
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn dispatch(&self, kind: RecordKind, id: RecordId) -> Result<()> {
        self.calls.lock().unwrap().push((kind, id));
        Ok(())
    }
}

/// A queue that has already shut down.
pub(crate) struct ClosedDispatch;

#[async_trait]
impl Dispatch for ClosedDispatch {
    async fn dispatch(&self, _kind: RecordKind, _id: RecordId) -> Result<()> {
        anyhow::bail!("queue closed")
    }
}
