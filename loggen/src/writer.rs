//! Event sinks.
//!
//! A [`Writer`] takes rendered records and puts them somewhere: standard
//! output, a network peer or a file on disk. Every record is written as its
//! payload followed by a newline. Successful sends are counted in
//! [`EmissionMetrics`], failed ones are not.

use loggen_payload::Record;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::telemetry::EmissionMetrics;

pub mod file;
pub mod network;
pub mod stdout;

pub use file::File;
pub use network::Network;
pub use stdout::Stdout;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Writer`].
pub enum Error {
    /// See [`crate::writer::file::Error`] for details.
    #[error(transparent)]
    File(#[from] file::Error),
    /// See [`crate::writer::network::Error`] for details.
    #[error(transparent)]
    Network(#[from] network::Error),
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Writer`]
pub enum Config {
    /// See [`crate::writer::stdout`] for details.
    #[default]
    Stdout,
    /// See [`crate::writer::network::Config`] for details.
    Network(network::Config),
    /// See [`crate::writer::file::Config`] for details.
    File(file::Config),
}

#[derive(Debug)]
enum Inner {
    Stdout(Stdout),
    Network(Network),
    File(File),
}

/// The event sink the scheduler hands records to.
#[derive(Debug)]
pub struct Writer {
    inner: Inner,
    metrics: EmissionMetrics,
}

impl Writer {
    /// Create a new [`Writer`] instance
    ///
    /// `shutdown` interrupts a network writer stuck reconnecting.
    ///
    /// # Errors
    ///
    /// Fails if the file sink cannot be opened as configured, for instance the
    /// file is missing and creating it is not allowed.
    pub async fn from_config(
        config: &Config,
        metrics: EmissionMetrics,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        let inner = match config {
            Config::Stdout => Inner::Stdout(Stdout::new()),
            Config::Network(conf) => Inner::Network(Network::from_config(conf, shutdown)),
            Config::File(conf) => Inner::File(File::open(conf).await?),
        };
        info!(destination = inner.name(), "writer ready");
        Ok(Self { inner, metrics })
    }

    /// Write one record, followed by a newline.
    ///
    /// # Errors
    ///
    /// A file write that failed, or a network writer cancelled while
    /// reconnecting. Standard output never fails.
    pub async fn send(&mut self, record: &Record) -> Result<(), Error> {
        let mut line = record.payload().into_owned();
        line.push('\n');
        match &mut self.inner {
            Inner::Stdout(stdout) => stdout.write(line.as_bytes()).await,
            Inner::Network(network) => network.write(line.as_bytes()).await?,
            Inner::File(file) => file.write(line.as_bytes()).await?,
        }
        self.metrics.record(record);
        Ok(())
    }

    /// Flush and release the sink. Closing twice is harmless.
    ///
    /// # Errors
    ///
    /// Fails if buffered file contents cannot be synced.
    pub async fn close(&mut self) -> Result<(), Error> {
        match &mut self.inner {
            Inner::Stdout(stdout) => stdout.close().await,
            Inner::Network(network) => network.close().await,
            Inner::File(file) => file.close().await?,
        }
        Ok(())
    }
}

impl Inner {
    fn name(&self) -> &'static str {
        match self {
            Self::Stdout(_) => "stdout",
            Self::Network(_) => "network",
            Self::File(_) => "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use loggen_payload::Record;
    use tokio_util::sync::CancellationToken;

    use super::{Config, Writer, file};
    use crate::telemetry::EmissionMetrics;

    fn record(text: &str, framed: bool) -> Record {
        Record {
            kind: "web".to_string(),
            severity: "200".to_string(),
            text: text.to_string(),
            framed,
        }
    }

    #[tokio::test]
    async fn framed_and_plain_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let config = Config::File(file::Config::new(path.clone()));
        let metrics = EmissionMetrics::new();
        let mut writer = Writer::from_config(&config, metrics.clone(), CancellationToken::new())
            .await
            .unwrap();

        writer.send(&record("hello world", true)).await.unwrap();
        writer.send(&record("plain", false)).await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "11 hello world\nplain\n");
        assert_eq!(metrics.events(), 2);
        assert_eq!(metrics.bytes(), 16);
    }

    #[tokio::test]
    async fn failed_sends_are_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let config = Config::File(file::Config::new(path));
        let metrics = EmissionMetrics::new();
        let mut writer = Writer::from_config(&config, metrics.clone(), CancellationToken::new())
            .await
            .unwrap();
        writer.close().await.unwrap();

        assert!(writer.send(&record("late", false)).await.is_err());
        assert_eq!(metrics.events(), 0);
    }
}
