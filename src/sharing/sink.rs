use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::types::SharedDataPoint;

/// Where shared data points go once consent allows it.
#[async_trait]
pub trait DataSink: Send + Sync {
    async fn transmit(&self, point: &SharedDataPoint) -> Result<()>;
}

/// Appends each point as one JSON line to a local file.
pub struct JsonLinesFileSink {
    path: PathBuf,
}

impl JsonLinesFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DataSink for JsonLinesFileSink {
    async fn transmit(&self, point: &SharedDataPoint) -> Result<()> {
        let mut line = serde_json::to_vec(point).context("failed to encode data point")?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
