//! State shared between the scheduler and the admin API.
//!
//! The request queue, stream toggles and level weights live behind a single
//! mutex. The scheduler takes it once per tick to read toggles and drain the
//! queue; admin handlers take it to enqueue and to adjust settings.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use loggen_payload::{LevelWeights, LevelWeightsPatch, Options, Record, Registry, registry};
use serde::Serialize;

use crate::{
    config::{Config, Message},
    queue::{Request, RequestQueue},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced by [`Control`]. All of them are caller mistakes.
pub enum Error {
    /// The request names an unknown type or format.
    #[error(transparent)]
    Registry(#[from] registry::Error),
    /// A toggle names a stream that is not configured.
    #[error("Unknown stream: {0}")]
    UnknownStream(String),
    /// A request asks for no events.
    #[error("count must be greater than zero")]
    ZeroCount,
}

/// Lifecycle of the scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Constructed, not yet ticking
    #[default]
    Idle,
    /// Ticking
    Running,
    /// Closing the writer
    Draining,
    /// Finished
    Stopped,
}

/// A continuous stream and whether it currently emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamState {
    /// Name used by toggles
    pub name: String,
    /// Event type
    #[serde(rename = "type")]
    pub kind: String,
    /// Event format
    pub format: String,
    /// Whether the stream emits on each tick
    pub enabled: bool,
}

/// Point-in-time view served by `GET /loggen`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Scheduler lifecycle
    pub state: State,
    /// Configured rate and budget
    pub message: Message,
    /// Continuous events emitted so far
    pub emitted: u64,
    /// Continuous streams
    pub streams: Vec<StreamState>,
    /// Current level weights of structured application logs
    pub golang: LevelWeights,
    /// Pending requests, front first
    pub queue: Vec<Request>,
}

/// What one tick works from, taken under the lock.
#[derive(Debug)]
pub(crate) struct TickPlan {
    /// Enabled streams, in configuration order
    pub(crate) streams: Vec<StreamState>,
    /// Options for continuous events
    pub(crate) options: Options,
    /// Records produced by one pass over the request queue
    pub(crate) requests: Vec<Record>,
}

#[derive(Debug)]
struct Shared {
    queue: RequestQueue,
    streams: Vec<StreamState>,
    levels: LevelWeights,
    state: State,
    emitted: u64,
}

/// Handle onto the shared scheduler state.
#[derive(Debug)]
pub struct Control {
    registry: Arc<Registry>,
    message: Message,
    shared: Mutex<Shared>,
}

impl Control {
    /// Create the shared state from configuration.
    #[must_use]
    pub fn new(config: &Config, registry: Arc<Registry>) -> Self {
        let streams = config
            .streams
            .iter()
            .map(|stream| StreamState {
                name: stream.name().to_string(),
                kind: stream.kind.clone(),
                format: stream.format.clone(),
                enabled: stream.enabled,
            })
            .collect();
        Self {
            registry,
            message: config.message,
            shared: Mutex::new(Shared {
                queue: RequestQueue::new(),
                streams,
                levels: config.payload.golang.weights,
                state: State::Idle,
                emitted: 0,
            }),
        }
    }

    /// The format registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and enqueue `request`, returning it.
    ///
    /// # Errors
    ///
    /// Fails for unknown types or formats and for a zero count.
    pub fn enqueue(&self, request: Request) -> Result<Request, Error> {
        if request.count == 0 {
            return Err(Error::ZeroCount);
        }
        self.registry.validate(&request.kind, &request.format)?;
        self.lock().queue.enqueue(request.clone());
        Ok(request)
    }

    /// Enable or disable streams by name. Nothing changes unless every name
    /// is known.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown stream name.
    pub fn set_streams(&self, toggles: &BTreeMap<String, bool>) -> Result<Vec<StreamState>, Error> {
        let mut shared = self.lock();
        if let Some(unknown) = toggles
            .keys()
            .find(|name| !shared.streams.iter().any(|stream| &stream.name == *name))
        {
            return Err(Error::UnknownStream(unknown.clone()));
        }
        for stream in &mut shared.streams {
            if let Some(enabled) = toggles.get(&stream.name) {
                stream.enabled = *enabled;
            }
        }
        Ok(shared.streams.clone())
    }

    /// Current level weights.
    #[must_use]
    pub fn levels(&self) -> LevelWeights {
        self.lock().levels
    }

    /// Merge `patch` into the level weights, returning the result.
    pub fn patch_levels(&self, patch: LevelWeightsPatch) -> LevelWeights {
        let mut shared = self.lock();
        shared.levels.apply(patch);
        shared.levels
    }

    /// Current state, for `GET /loggen`.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let shared = self.lock();
        Snapshot {
            state: shared.state,
            message: self.message,
            emitted: shared.emitted,
            streams: shared.streams.clone(),
            golang: shared.levels,
            queue: shared.queue.snapshot(),
        }
    }

    /// Scheduler lifecycle.
    #[must_use]
    pub fn state(&self) -> State {
        self.lock().state
    }

    pub(crate) fn set_state(&self, state: State) {
        self.lock().state = state;
    }

    /// Continuous events emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.lock().emitted
    }

    pub(crate) fn set_emitted(&self, emitted: u64) {
        self.lock().emitted = emitted;
    }

    /// Whether no requests are pending.
    #[must_use]
    pub fn queue_is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Take everything a tick needs in one critical section: the enabled
    /// streams, event options and one round of queued requests.
    pub(crate) fn plan_tick(&self) -> TickPlan {
        let mut shared = self.lock();
        let options = Options {
            randomise: self.message.randomise,
            framed: false,
            levels: shared.levels,
        };
        let streams = shared
            .streams
            .iter()
            .filter(|stream| stream.enabled)
            .cloned()
            .collect();
        let requests = shared.queue.drain_round(&self.registry, &options);
        TickPlan {
            streams,
            options,
            requests,
        }
    }
}
