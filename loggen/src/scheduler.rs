//! The event scheduler.
//!
//! A single loop drives every continuous stream and the request queue. Each
//! tick emits one event per enabled stream while the count budget allows,
//! then one event per pending request, and completes every write before the
//! next tick is considered. Once a finite budget is spent and the queue is
//! empty, or shutdown is signalled, the writer is closed and the loop
//! returns.

use std::{num::NonZeroU64, sync::Arc};

use loggen_payload::{Record, Registry};
use loggen_throttle::{Pace, Ticker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{self, Config, Message, Rate, Stream},
    control::{Control, State},
    writer::{self, Writer, network},
};

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Scheduler`].
pub enum Error {
    /// See [`crate::config::Error`]
    #[error(transparent)]
    Config(#[from] config::Error),
    /// See [`loggen_throttle::Error`]
    #[error(transparent)]
    Throttle(#[from] loggen_throttle::Error),
    /// Sample output could not be measured for bytes-per-second pacing
    #[error("Failed to measure sample output: {0}")]
    Measure(#[from] loggen_payload::Error),
    /// See [`crate::writer::Error`]
    #[error(transparent)]
    Writer(#[from] writer::Error),
}

/// Derive the tick pace from the configured rate.
///
/// A bytes-per-second rate is converted by rendering the sample event of
/// every enabled stream: one tick is expected to produce their combined
/// length. With no stream enabled the `web/nginx` sample is used.
///
/// # Errors
///
/// Fails if the rate is misconfigured or a sample cannot be rendered.
pub fn pace(message: &Message, streams: &[Stream], registry: &Registry) -> Result<Pace, Error> {
    let bytes_per_second = match message.rate()? {
        Rate::EventsPerSecond(eps) => return Ok(Pace::EventsPerSecond(eps)),
        Rate::BytesPerSecond(bps) => bps,
    };
    let mut measured: Vec<(&str, &str)> = streams
        .iter()
        .filter(|stream| stream.enabled)
        .map(|stream| (stream.kind.as_str(), stream.format.as_str()))
        .collect();
    if measured.is_empty() {
        measured.push(("web", "nginx"));
    }
    let mut bytes: u64 = 0;
    for (kind, format) in measured {
        let record = registry.create(kind, format, false)?.render()?;
        bytes = bytes.saturating_add(record.text.len() as u64);
    }
    let bytes_per_tick = NonZeroU64::new(bytes).unwrap_or(NonZeroU64::MIN);
    debug!(bytes_per_tick, "measured sample output per tick");
    Ok(Pace::BytesPerSecond {
        bytes_per_second,
        bytes_per_tick,
    })
}

/// The event scheduler.
#[derive(Debug)]
pub struct Scheduler {
    control: Arc<Control>,
    writer: Writer,
    ticker: Ticker,
    budget: Option<u64>,
    emitted: u64,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a new [`Scheduler`].
    ///
    /// # Errors
    ///
    /// Fails if no valid pace can be derived from the configuration.
    pub fn new(
        config: &Config,
        control: Arc<Control>,
        writer: Writer,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        let pace = pace(&config.message, &config.streams, control.registry())?;
        let ticker = Ticker::new(pace, config.message.jitter)?;
        info!(interval = ?ticker.interval(), budget = ?config.message.count, "scheduler configured");
        Ok(Self {
            control,
            writer,
            ticker,
            budget: config.message.count,
            emitted: 0,
            shutdown,
        })
    }

    /// Run until the budget is spent and the queue is empty, or shutdown.
    ///
    /// # Errors
    ///
    /// Fails only if the writer cannot be closed cleanly.
    pub async fn run(mut self) -> Result<(), Error> {
        self.control.set_state(State::Running);
        info!("scheduler running");
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
                () = self.ticker.tick() => {}
            }
            if let Err(err) = self.tick().await {
                info!("stopping mid tick: {err}");
                break;
            }
            if self.finished() {
                info!(emitted = self.emitted, "event budget spent and queue empty");
                break;
            }
        }

        self.control.set_state(State::Draining);
        let closed = self.writer.close().await;
        self.control.set_state(State::Stopped);
        info!(emitted = self.emitted, "scheduler stopped");
        closed.map_err(Error::from)
    }

    fn budget_left(&self) -> bool {
        self.budget.is_none_or(|budget| self.emitted < budget)
    }

    fn finished(&self) -> bool {
        !self.budget_left() && self.control.queue_is_empty()
    }

    async fn tick(&mut self) -> Result<(), network::Error> {
        let control = Arc::clone(&self.control);
        let plan = control.plan_tick();

        for stream in &plan.streams {
            if !self.budget_left() {
                break;
            }
            self.emitted += 1;
            let generated = control
                .registry()
                .create_with(&stream.kind, &stream.format, &plan.options)
                .and_then(|event| event.render());
            match generated {
                Ok(record) => self.send(&record).await?,
                Err(err) => error!(
                    kind = %stream.kind,
                    format = %stream.format,
                    "failed to generate event: {err}"
                ),
            }
        }
        control.set_emitted(self.emitted);

        for record in &plan.requests {
            self.send(record).await?;
        }
        Ok(())
    }

    /// Hand `record` to the writer. Write failures lose this record only;
    /// cancellation while reconnecting ends the tick.
    async fn send(&mut self, record: &Record) -> Result<(), network::Error> {
        match self.writer.send(record).await {
            Ok(()) => Ok(()),
            Err(writer::Error::Network(err)) => Err(err),
            Err(err) => {
                warn!(kind = %record.kind, "event dropped: {err}");
                Ok(())
            }
        }
    }
}
