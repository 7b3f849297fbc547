use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use murmur_core::{ConnectionId, Frame, LineCodec};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::handle::ConnectionHandle;
use crate::session::Session;
use crate::state::ChatState;

/// How long a closing connection may spend flushing queued lines.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Run one connection to completion.
///
/// Spawns a writer task that drains the outbound queue into `writer`, runs
/// the session over lines read from `reader`, and tears the session down
/// when the peer hangs up, a read fails, or `closer` is cancelled (idle
/// eviction or shutdown).
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    chat: Arc<ChatState>,
    closer: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let limits = chat.limits().clone();
    let (handle, rx) = ConnectionHandle::channel(limits.max_send_queue, closer.clone());
    let id = *handle.id();

    let sink = FramedWrite::new(writer, LineCodec::with_max_length(limits.max_line_length));
    let writer_task = tokio::spawn(write_loop(sink, rx, closer.clone(), id));

    let mut session = match Session::open(chat, handle, Instant::now()) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(conn_id = %id, error = %e, "Refusing connection: registry invariant violated");
            closer.cancel();
            let _ = writer_task.await;
            return;
        }
    };

    let mut lines = FramedRead::new(reader, LineCodec::with_max_length(limits.max_line_length));
    loop {
        tokio::select! {
            () = closer.cancelled() => break,
            frame = lines.next() => match frame {
                Some(Ok(Frame::Line(line))) => session.handle_line(&line, Instant::now()),
                Some(Ok(Frame::Overlong { limit })) => {
                    tracing::warn!(conn_id = %id, limit, "Input line too long, discarded");
                    session.note_activity(Instant::now());
                }
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %id, error = %e, kind = e.error_kind(), "Read failed");
                    break;
                }
                None => {
                    tracing::debug!(conn_id = %id, "Peer closed connection");
                    break;
                }
            },
        }
    }

    session.terminate();
    drop(lines);
    let _ = writer_task.await;
}

/// Forward queued lines to the socket until the connection is closed, then
/// flush what is still queued within [`FLUSH_GRACE`].
async fn write_loop<W>(
    mut sink: FramedWrite<W, LineCodec>,
    mut rx: mpsc::Receiver<String>,
    closer: CancellationToken,
    id: ConnectionId,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some(line) = msg else { break };
                // Send is polled first so the line lands in the codec
                // buffer even if cancellation is already pending.
                tokio::select! {
                    biased;
                    result = sink.send(line) => {
                        if let Err(e) = result {
                            tracing::debug!(conn_id = %id, error = %e, "Write failed, closing");
                            closer.cancel();
                            return;
                        }
                    }
                    () = closer.cancelled() => break,
                }
            }
            () = closer.cancelled() => break,
        }
    }

    let flushed = tokio::time::timeout(FLUSH_GRACE, async {
        while let Ok(line) = rx.try_recv() {
            sink.feed(line).await?;
        }
        sink.flush().await?;
        sink.get_mut().shutdown().await?;
        Ok::<(), murmur_core::LineError>(())
    })
    .await;
    if !matches!(flushed, Ok(Ok(()))) {
        tracing::debug!(conn_id = %id, "Connection closed without final flush");
    }
}
