//! Read and write loops for one upgraded connection.
//!
//! The read loop owns the inbound half and the session's keepalive deadline.
//! The write loop owns the outbound half, drains the session queue in
//! batches and sends keepalive pings. Whichever loop stops first closes the
//! session, which stops the other.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::histogram;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::handler::handle_message;
use crate::config::HubConfig;
use crate::errors::HubError;
use crate::metrics::WS_SESSION_DURATION_SECONDS;
use crate::session::{CloseReason, PushError, Session};

/// Timings the loops run with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionTiming {
    /// Read deadline after the last keepalive.
    pub pong_wait: Duration,
    /// Ping interval.
    pub ping_period: Duration,
    /// Deadline for one outbound flush.
    pub write_wait: Duration,
}

impl From<&HubConfig> for SessionTiming {
    fn from(config: &HubConfig) -> Self {
        Self {
            pong_wait: config.pong_wait,
            ping_period: config.ping_period,
            write_wait: config.write_wait,
        }
    }
}

/// Drive a registered session until either side stops, then unregister it.
#[instrument(skip_all, fields(session_id = %session.id(), username = %session.username()))]
pub async fn run_session(
    socket: WebSocket,
    session: Arc<Session>,
    outbound: mpsc::Receiver<Arc<str>>,
    timing: SessionTiming,
) {
    let started = std::time::Instant::now();
    let _ = session.mark_active();
    let (sink, stream) = socket.split();

    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { write_loop(sink, outbound, &session, timing).await })
    };

    let reason = read_loop(stream, &session, timing.pong_wait).await;
    if session.close(reason) {
        debug!(%reason, "read side closed session");
    }
    match session.leave().await {
        Ok(()) | Err(HubError::NotRunning) => {}
        Err(e) => warn!(error = %e, "failed to unregister session"),
    }
    if let Err(e) = writer.await {
        warn!(error = %e, "write task failed");
    }
    session.mark_closed();

    histogram!(WS_SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        reason = %session.close_reason().unwrap_or(reason),
        dropped = session.dropped_messages(),
        "session closed"
    );
}

/// Read frames until the client leaves, the deadline passes or the session
/// is closed elsewhere. Only pong frames and `ping` messages move the
/// deadline.
pub(crate) async fn read_loop<S>(mut stream: S, session: &Session, pong_wait: Duration) -> CloseReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let deadline = session.last_keepalive() + pong_wait;
        let frame = tokio::select! {
            () = session.closed() => {
                return session.close_reason().unwrap_or(CloseReason::Unregistered);
            }
            frame = tokio::time::timeout_at(deadline, stream.next()) => frame,
        };
        let message = match frame {
            Err(_) => {
                warn!("read deadline passed without keepalive");
                return CloseReason::ReadTimeout;
            }
            Ok(None) => return CloseReason::ClientClosed,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                return CloseReason::ReadError;
            }
            Ok(Some(Ok(message))) => message,
        };
        session.touch();

        let queued = match message {
            Message::Text(text) => reply(session, text.as_str()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => reply(session, text),
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                    Ok(())
                }
            },
            Message::Pong(_) => {
                session.mark_keepalive();
                Ok(())
            }
            Message::Ping(_) => Ok(()),
            Message::Close(_) => return CloseReason::ClientClosed,
        };
        match queued {
            Ok(()) => {}
            Err(PushError::Full) => {
                warn!("outbound queue full while replying");
                return CloseReason::Overflow;
            }
            Err(PushError::Closed) => return CloseReason::WriteError,
        }
    }
}

fn reply(session: &Session, text: &str) -> Result<(), PushError> {
    let result = handle_message(session, text);
    session.send(&result.reply)
}

/// Drain the outbound queue into `sink` and send keepalive pings until the
/// session closes or a write fails, then send a close frame.
pub(crate) async fn write_loop<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Arc<str>>,
    session: &Session,
    timing: SessionTiming,
) where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut ping = tokio::time::interval_at(Instant::now() + timing.ping_period, timing.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        tokio::select! {
            biased;
            next = outbound.recv() => {
                let Some(first) = next else { break None };
                if let Err(reason) = flush_batch(&mut sink, first, &mut outbound, timing.write_wait).await {
                    break Some(reason);
                }
            }
            () = session.closed() => break None,
            _ = ping.tick() => {
                let sent = tokio::time::timeout(timing.write_wait, sink.send(Message::Ping(vec![].into()))).await;
                if !matches!(sent, Ok(Ok(()))) {
                    debug!("ping failed");
                    break Some(CloseReason::WriteError);
                }
            }
        }
    };

    if let Some(reason) = failure {
        let _ = session.close(reason);
    }
    outbound.close();

    let reason = session.close_reason().unwrap_or(CloseReason::Unregistered);
    let frame = CloseFrame {
        code: close_code_for(reason),
        reason: Utf8Bytes::from_static(reason.as_str()),
    };
    let _ = tokio::time::timeout(timing.write_wait, sink.send(Message::Close(Some(frame)))).await;
}

/// Write `first` plus whatever is already queued, then flush once.
async fn flush_batch<W>(
    sink: &mut W,
    first: Arc<str>,
    outbound: &mut mpsc::Receiver<Arc<str>>,
    write_wait: Duration,
) -> Result<(), CloseReason>
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    let write = async {
        sink.feed(text_frame(&first)).await?;
        for _ in 0..outbound.len() {
            match outbound.try_recv() {
                Ok(next) => sink.feed(text_frame(&next)).await?,
                Err(_) => break,
            }
        }
        sink.flush().await
    };
    match tokio::time::timeout(write_wait, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "write failed");
            Err(CloseReason::WriteError)
        }
        Err(_) => {
            warn!("write deadline passed");
            Err(CloseReason::WriteError)
        }
    }
}

fn text_frame(text: &str) -> Message {
    Message::Text(text.to_string().into())
}

/// Close code sent to the client for `reason`.
pub fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Overflow => close_code::POLICY,
        CloseReason::Shutdown | CloseReason::Stale | CloseReason::ReadTimeout => close_code::AWAY,
        CloseReason::RegistrationFailed => close_code::AGAIN,
        CloseReason::ReadError | CloseReason::WriteError => close_code::ERROR,
        CloseReason::ClientClosed | CloseReason::Unregistered => close_code::NORMAL,
    }
}
