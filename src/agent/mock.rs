//! Test double for the remote model.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;

use super::{ChunkStream, TextGenerator};
use crate::errors::AppError;
use crate::models::{ModelInvocation, StreamChunk};

enum Script {
    Chunks(Vec<Result<StreamChunk, AppError>>),
    FailToStart,
}

/// Replays a fixed script and records every invocation it receives.
#[derive(Clone)]
pub struct RecordingGenerator {
    script: Arc<Mutex<Option<Script>>>,
    pub calls: Arc<Mutex<Vec<(String, ModelInvocation)>>>,
}

impl RecordingGenerator {
    pub fn replying(chunks: Vec<Result<StreamChunk, AppError>>) -> Self {
        Self::with_script(Script::Chunks(chunks))
    }

    pub fn failing_to_start() -> Self {
        Self::with_script(Script::FailToStart)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(Some(script))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn invocations(&self) -> Vec<ModelInvocation> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, invocation)| invocation.clone())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn stream(
        &self,
        api_key: &str,
        invocation: ModelInvocation,
    ) -> Result<ChunkStream, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((api_key.to_string(), invocation));

        match self.script.lock().unwrap().take() {
            Some(Script::Chunks(chunks)) => Ok(Box::pin(stream::iter(chunks))),
            Some(Script::FailToStart) => Err(AppError::inference("connection refused")),
            None => Ok(Box::pin(stream::empty())),
        }
    }
}
