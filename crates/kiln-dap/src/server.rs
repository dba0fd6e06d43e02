use std::sync::Arc;

use kiln_config::BridgeConfig;
use kiln_remote::RemoteConnection;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::bridge::{Bridge, Flow};
use crate::command::Command;
use crate::dap::codec::{DapError, DapReader, DapWriter};
use crate::dap::messages::OutgoingMessage;
use crate::error::ServerResult;

/// Serve DAP over stdio against `remote`.
pub async fn run_stdio(
    remote: Arc<dyn RemoteConnection>,
    config: &BridgeConfig,
) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, remote, config)
        .await
        .map_err(anyhow::Error::from)
}

/// Serve one debug session over `reader`/`writer` until `disconnect` or EOF.
///
/// Responses and events are written by a dedicated task in the order the bridge
/// sequenced them.
pub async fn run<R, W>(
    reader: R,
    writer: W,
    remote: Arc<dyn RemoteConnection>,
    config: &BridgeConfig,
) -> ServerResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutgoingMessage>();
    let writer_task = tokio::spawn(async move {
        let mut writer = DapWriter::new(writer);
        while let Some(msg) = out_rx.recv().await {
            if let Err(err) = writer.write_message(&msg).await {
                tracing::warn!(target: "kiln.dap", error = %err, "failed to write DAP message");
                break;
            }
        }
    });

    let bridge = Bridge::new(remote, config, out_tx);
    let subscription = bridge.subscribe_remote_events();
    let mut tasks = JoinSet::new();
    let mut reader = DapReader::new(reader);

    let result = loop {
        let request = match reader.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                // Host went away without `disconnect`.
                bridge.end_session().await;
                break Ok(());
            }
            Err(DapError::Json(err)) => {
                tracing::warn!(target: "kiln.dap", error = %err, "skipping malformed DAP message");
                continue;
            }
            Err(err) => break Err(err.into()),
        };
        if request.type_ != "request" {
            continue;
        }

        tracing::debug!(
            target: "kiln.dap",
            seq = request.seq,
            command = %request.command,
            "request"
        );
        let command = match Command::from_request(&request) {
            Ok(command) => command,
            Err(err) => {
                bridge.reject_arguments(&request, &err);
                continue;
            }
        };

        if bridge.dispatch(request, command, &mut tasks).await == Flow::Exit {
            break Ok(());
        }
        while let Some(joined) = tasks.try_join_next() {
            log_task_failure(joined);
        }
    };

    while let Some(joined) = tasks.join_next().await {
        log_task_failure(joined);
    }
    drop(subscription);
    bridge.outbox().close();
    let _ = writer_task.await;

    result
}

fn log_task_failure(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        tracing::error!(target: "kiln.dap", error = %err, "request task failed");
    }
}
