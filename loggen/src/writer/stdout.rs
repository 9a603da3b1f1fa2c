//! Standard output sink. Write failures are logged and otherwise ignored.

use tokio::io::{self, AsyncWriteExt};
use tracing::warn;

/// Writes records to standard output.
#[derive(Debug)]
pub struct Stdout {
    out: io::Stdout,
}

impl Default for Stdout {
    fn default() -> Self {
        Self::new()
    }
}

impl Stdout {
    /// Create a new [`Stdout`].
    #[must_use]
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }

    pub(crate) async fn write(&mut self, buf: &[u8]) {
        if let Err(err) = self.out.write_all(buf).await {
            warn!("stdout write failed: {err}");
            return;
        }
        if let Err(err) = self.out.flush().await {
            warn!("stdout flush failed: {err}");
        }
    }

    pub(crate) async fn close(&mut self) {
        if let Err(err) = self.out.flush().await {
            warn!("stdout flush failed: {err}");
        }
    }
}
