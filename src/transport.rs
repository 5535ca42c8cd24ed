//! Newline-framed relay between a byte stream and a bridge.
//!
//! Input is read on its own task so a host that writes faster than it reads
//! can never deadlock against the bridge's bounded channels.

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeHandle, Control, Inbound, Notice, Outbound};

/// How lines on the stream map onto bridge messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One JSON value per line, both directions.
    #[default]
    Json,
    /// Every line is a command; responses are written raw.
    Text,
}

/// Relay `reader` into the bridge and the bridge's messages into `writer`
/// until the input ends and the bridge has answered everything.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    handle: BridgeHandle,
    framing: Framing,
    init: Option<Control>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (inbound, mut outbound, task) = handle.split();

    if let Some(control) = init {
        inbound
            .send(Inbound::Control(control))
            .await
            .map_err(|_| anyhow!("bridge stopped before initialize"))?;
    }

    let input = tokio::spawn(forward_input(reader, inbound, framing));

    let mut writer = BufWriter::new(writer);
    while let Some(msg) = outbound.recv().await {
        write_outbound(&mut writer, &msg, framing).await?;
        writer.flush().await.context("failed to flush output")?;
    }

    // The bridge is gone; stop reading if input is still open.
    input.abort();
    match input.await {
        Ok(Err(e)) => warn!(error = %e, "input relay failed"),
        Err(e) if !e.is_cancelled() => warn!(error = %e, "input relay panicked"),
        _ => {}
    }
    task.await.context("bridge task failed")?;
    Ok(())
}

async fn forward_input<R>(reader: R, inbound: mpsc::Sender<Inbound>, framing: Framing) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        if line.trim().is_empty() {
            continue;
        }
        let msg = match framing {
            Framing::Json => Inbound::decode(&line),
            Framing::Text => Inbound::Command(line),
        };
        if inbound.send(msg).await.is_err() {
            debug!("bridge stopped, dropping remaining input");
            break;
        }
    }
    debug!("input closed");
    Ok(())
}

async fn write_outbound<W>(writer: &mut W, msg: &Outbound, framing: Framing) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Json => {
            let frame = msg.encode().context("failed to encode message")?;
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::Text => match msg {
            Outbound::Response(text) => {
                writer.write_all(text.as_bytes()).await?;
                if !text.ends_with('\n') {
                    writer.write_all(b"\n").await?;
                }
            }
            Outbound::Notice(Notice::Error { detail, .. }) => eprintln!("error: {detail}"),
            Outbound::Notice(Notice::Ready) => info!("engine ready"),
            Outbound::Notice(Notice::Status {
                state,
                module,
                pending,
            }) => info!(?state, ?module, pending, "bridge status"),
        },
    }
    Ok(())
}
