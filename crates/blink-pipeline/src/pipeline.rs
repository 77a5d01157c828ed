//! Ordered stage chain.

use blink_proto::Address;
use bytes::Bytes;

use crate::error::PipelineError;
use crate::stage::{Direction, Stage, StageOutput};

/// Something the relay must act on after a `feed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Write `bytes` to the side `direction` points at.
    Data(Direction, Bytes),
    /// The destination is known; the upstream must be opened before any
    /// data that follows is written.
    Connect(Address),
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    failed: bool,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            failed: false,
        }
    }

    /// Run `data` through every stage in `direction` order.
    ///
    /// On the first stage failure the pipeline is marked failed and the
    /// error carries the untouched input. Once failed, every later call
    /// returns no events.
    pub fn feed(
        &mut self,
        direction: Direction,
        data: Bytes,
    ) -> Result<Vec<PipelineEvent>, PipelineError> {
        if self.failed || data.is_empty() {
            return Ok(Vec::new());
        }

        let original = data.clone();
        let mut chunks = vec![data];
        let mut connect = None;
        let n = self.stages.len();

        for step in 0..n {
            let idx = match direction {
                Direction::Upward => step,
                Direction::Downward => n - 1 - step,
            };
            let stage = &mut self.stages[idx];
            let mut out = StageOutput::default();
            for chunk in chunks.drain(..) {
                let res = match direction {
                    Direction::Upward => stage.upward(chunk, &mut out),
                    Direction::Downward => stage.downward(chunk, &mut out),
                };
                if let Err(e) = res {
                    self.failed = true;
                    return Err(PipelineError {
                        stage: stage.name(),
                        message: e.to_string(),
                        original,
                    });
                }
            }
            if let Some(target) = out.connect {
                connect = Some(target);
            }
            chunks = out.chunks;
            if chunks.is_empty() {
                break;
            }
        }

        let mut events = Vec::with_capacity(chunks.len() + 1);
        if let Some(target) = connect {
            events.push(PipelineEvent::Connect(target));
        }
        events.extend(chunks.into_iter().map(|c| PipelineEvent::Data(direction, c)));
        Ok(events)
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("failed", &self.failed)
            .finish()
    }
}
