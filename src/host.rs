//! Host process: newline-delimited JSON on stdin, replies on stdout.
//!
//! Each input line is one [`HostMessage`]. Lines are handled strictly in
//! order; replies are written as they are produced. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::{data_dir_from_env, PipelineConfig};
use crate::glue::{ExtensionGlue, GlueState, PortClient, PortName};
use crate::instrumentation::RawEvent;
use crate::sharing::JsonLinesFileSink;
use crate::store::{SqliteStorageArea, Store};

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "host";

use crate::{log_error, log_info, log_warn};

const STORAGE_FILE: &str = "storage.sqlite3";
const OUTBOUND_FILE: &str = "outbound.jsonl";

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostMessage {
    Instrumentation {
        event: RawEvent,
    },
    Port {
        port: PortName,
        #[serde(default)]
        message: Value,
        /// Echoed back so the caller can match replies.
        #[serde(default)]
        id: Option<Value>,
    },
    ActiveTab {
        #[serde(rename = "tabId")]
        tab_id: Option<i64>,
    },
    Pause,
    Resume,
    Export,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostReply {
    State {
        state: GlueState,
    },
    PortReply {
        port: PortName,
        id: Option<Value>,
        reply: Value,
    },
    Exported {
        #[serde(rename = "fileName")]
        file_name: String,
        path: PathBuf,
    },
    Error {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

/// Builds the pipeline over the data directory and serves stdin until EOF.
pub fn run() -> Result<()> {
    let config = PipelineConfig::from_env();
    let data_dir = data_dir_from_env();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(async move {
        let storage = SqliteStorageArea::new(data_dir.join(STORAGE_FILE))?;
        let store = Store::new(Arc::new(storage));
        let sink = Arc::new(JsonLinesFileSink::new(data_dir.join(OUTBOUND_FILE)));
        let glue = ExtensionGlue::new(config, store, sink);

        serve(
            glue,
            &data_dir,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await
    })
}

pub async fn serve<R, W>(glue: ExtensionGlue, data_dir: &Path, input: R, mut output: W) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let state = glue.init().await?;
    log_info!("started in state {state:?}, data in {}", data_dir.display());
    write_reply(&mut output, &HostReply::State { state }).await?;

    let cancel = CancellationToken::new();
    let (client, message_loop) = glue.spawn_message_loop(cancel.clone());

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<HostMessage>(&line) {
            Ok(message) => handle_message(&glue, &client, data_dir, message)
                .await
                .unwrap_or_else(|err| {
                    log_error!("host message failed: {err:#}");
                    Some(HostReply::Error {
                        error_message: err.to_string(),
                    })
                }),
            Err(err) => {
                log_warn!("unreadable host message: {err}");
                Some(HostReply::Error {
                    error_message: format!("unreadable host message: {err}"),
                })
            }
        };

        if let Some(reply) = reply {
            write_reply(&mut output, &reply).await?;
        }
    }

    log_info!("input closed, shutting down");
    cancel.cancel();
    if let Err(err) = message_loop.await {
        log_error!("message loop ended abnormally: {err}");
    }
    glue.cleanup().await
}

pub async fn handle_message(
    glue: &ExtensionGlue,
    client: &PortClient,
    data_dir: &Path,
    message: HostMessage,
) -> Result<Option<HostReply>> {
    match message {
        HostMessage::Instrumentation { event } => {
            glue.enqueue(event);
            Ok(None)
        }
        HostMessage::Port { port, message, id } => {
            let reply = client.post(port, message).await?;
            Ok(reply.map(|reply| HostReply::PortReply { port, id, reply }))
        }
        HostMessage::ActiveTab { tab_id } => {
            glue.set_active_tab(tab_id);
            Ok(None)
        }
        HostMessage::Pause => Ok(Some(HostReply::State {
            state: glue.pause().await,
        })),
        HostMessage::Resume => Ok(Some(HostReply::State {
            state: glue.resume().await?,
        })),
        HostMessage::Export => {
            let (file_name, export) = glue.export_shared_data().await?;
            let path = data_dir.join(&file_name);
            let document = serde_json::to_vec_pretty(&export)?;
            tokio::fs::write(&path, document)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            log_info!("exported {} data points to {}", export.shared_data.len(), path.display());
            Ok(Some(HostReply::Exported { file_name, path }))
        }
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &HostReply) -> Result<()> {
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}
