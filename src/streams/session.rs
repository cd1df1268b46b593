//! Relays one container stream to one WebSocket peer.

use std::{str::FromStr, sync::Arc};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::segment::{Segment, Segmenter};
use crate::error::Error;
use crate::runtime::{ByteStream, ContainerRuntime, ExecSession, LogOptions};
use crate::servers::lifecycle::resolve_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Console,
    Logs,
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(SessionKind::Console),
            "logs" => Ok(SessionKind::Logs),
            other => Err(format!("unknown session type {other:?}")),
        }
    }
}

/// Query parameters of the session endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionParams {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Upper bound on bytes per outbound frame.
    pub segment_size: usize,
    /// History lines sent before following.
    pub log_tail: usize,
    pub shell: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            segment_size: 120,
            log_tail: 200,
            shell: vec!["/bin/sh".to_string()],
        }
    }
}

pub enum Attached {
    Logs(ByteStream),
    Console(ExecSession),
}

fn close_frame(code: u16, reason: impl Into<String>) -> CloseFrame {
    CloseFrame {
        code,
        reason: reason.into().into(),
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        match segment {
            Segment::Text(text) => Message::Text(text.into()),
            Segment::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Resolves the container and opens the runtime side of the session. Failures
/// come back as the close frame to send the peer.
pub async fn attach(
    runtime: &dyn ContainerRuntime,
    params: &SessionParams,
    config: &StreamConfig,
) -> Result<Attached, CloseFrame> {
    let name = params
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| close_frame(close_code::POLICY, "name required"))?;
    let kind = params
        .kind
        .as_deref()
        .unwrap_or("console")
        .parse::<SessionKind>()
        .map_err(|reason| close_frame(close_code::POLICY, reason))?;

    let container = resolve_name(runtime, name).await.map_err(|err| match err {
        Error::NotFound(_) => close_frame(close_code::POLICY, "not found"),
        Error::InvalidInput(reason) => close_frame(close_code::POLICY, reason),
        other => close_frame(close_code::ERROR, other.to_string()),
    })?;

    let attached = match kind {
        SessionKind::Logs => runtime
            .logs(
                &container.id,
                LogOptions {
                    follow: true,
                    tail: config.log_tail,
                },
            )
            .await
            .map(Attached::Logs),
        SessionKind::Console => runtime
            .exec_attach(&container.id, config.shell.clone())
            .await
            .map(Attached::Console),
    };
    attached.map_err(|err| close_frame(close_code::ERROR, err.to_string()))
}

/// Entry point for an upgraded connection.
pub async fn run_session(
    socket: WebSocket,
    runtime: Arc<dyn ContainerRuntime>,
    params: SessionParams,
    config: StreamConfig,
) {
    let (mut tx, rx) = socket.split();
    match attach(runtime.as_ref(), &params, &config).await {
        Err(frame) => {
            info!(name = ?params.name, code = frame.code, reason = %frame.reason.as_str(), "session rejected");
            let _ = tx.send(Message::Close(Some(frame))).await;
        }
        Ok(Attached::Logs(logs)) => {
            info!(name = ?params.name, "log session opened");
            relay_logs(tx, rx, logs, config.segment_size).await;
        }
        Ok(Attached::Console(exec)) => {
            info!(name = ?params.name, "console session opened");
            relay_console(tx, rx, exec, config.segment_size).await;
        }
    }
    debug!(name = ?params.name, "session closed");
}

async fn send_segments<Tx>(tx: &mut Tx, segments: Vec<Segment>) -> bool
where
    Tx: Sink<Message> + Unpin,
{
    for segment in segments {
        if tx.send(segment.into()).await.is_err() {
            return false;
        }
    }
    true
}

/// Forwards a followed log stream until either side ends. Peer input is
/// ignored. The log stream is dropped on return, which releases the runtime
/// read.
pub async fn relay_logs<Tx, Rx, E>(mut tx: Tx, mut rx: Rx, mut logs: ByteStream, segment_size: usize)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut segmenter = Segmenter::new(segment_size);
    loop {
        tokio::select! {
            inbound = rx.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            chunk = logs.next() => match chunk {
                Some(Ok(bytes)) => {
                    if !send_segments(&mut tx, segmenter.push(&bytes)).await {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "log stream failed");
                    let _ = tx.send(Message::Close(Some(close_frame(close_code::ERROR, err.to_string())))).await;
                    break;
                }
                None => {
                    let tail = segmenter.finish().into_iter().collect();
                    if send_segments(&mut tx, tail).await {
                        let _ = tx.send(Message::Close(Some(close_frame(close_code::NORMAL, "log stream ended")))).await;
                    }
                    break;
                }
            },
        }
    }
}

/// Pipes peer input into the exec verbatim and exec output back to the peer.
/// Ending either direction shuts the other down.
pub async fn relay_console<Tx, Rx, E>(mut tx: Tx, mut rx: Rx, exec: ExecSession, segment_size: usize)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    let ExecSession {
        mut input,
        mut output,
    } = exec;
    let mut segmenter = Segmenter::new(segment_size);

    loop {
        tokio::select! {
            inbound = rx.next() => {
                let data = match inbound {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                if input.write_all(&data).await.is_err() || input.flush().await.is_err() {
                    break;
                }
            }
            chunk = output.next() => match chunk {
                Some(Ok(bytes)) => {
                    if !send_segments(&mut tx, segmenter.push(&bytes)).await {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "console stream failed");
                    let _ = tx.send(Message::Close(Some(close_frame(close_code::ERROR, err.to_string())))).await;
                    break;
                }
                None => {
                    let tail = segmenter.finish().into_iter().collect();
                    if send_segments(&mut tx, tail).await {
                        let _ = tx.send(Message::Close(Some(close_frame(close_code::NORMAL, "session ended")))).await;
                    }
                    break;
                }
            },
        }
    }

    let _ = input.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RuntimeError, fake::FakeRuntime};
    use bytes::Bytes;
    use futures::{channel::mpsc, stream};
    use pretty_assertions::assert_eq;
    use std::{convert::Infallible, sync::atomic::Ordering};
    use tokio::io::AsyncReadExt;

    fn params(name: &str, kind: &str) -> SessionParams {
        SessionParams {
            name: Some(name.to_string()),
            kind: Some(kind.to_string()),
        }
    }

    fn peer() -> (
        mpsc::UnboundedSender<Result<Message, Infallible>>,
        mpsc::UnboundedReceiver<Result<Message, Infallible>>,
    ) {
        mpsc::unbounded()
    }

    async fn rejected(runtime: &FakeRuntime, params: SessionParams) -> CloseFrame {
        match attach(runtime, &params, &StreamConfig::default()).await {
            Err(frame) => frame,
            Ok(_) => panic!("session should have been rejected"),
        }
    }

    fn payload(messages: &[Message]) -> Vec<u8> {
        messages
            .iter()
            .flat_map(|m| match m {
                Message::Text(t) => t.as_str().as_bytes().to_vec(),
                Message::Binary(b) => b.to_vec(),
                _ => vec![],
            })
            .collect()
    }

    #[tokio::test]
    async fn setup_failures_close_with_policy_or_error() {
        let runtime = FakeRuntime::new();
        runtime.add_foreign("alpha", &[]);

        let frame = rejected(&runtime, SessionParams::default()).await;
        assert_eq!(frame.code, close_code::POLICY);
        assert_eq!(frame.reason.as_str(), "name required");

        let frame = rejected(&runtime, params("alpha", "shell")).await;
        assert_eq!(frame.code, close_code::POLICY);

        let frame = rejected(&runtime, params("ghost", "logs")).await;
        assert_eq!(frame.code, close_code::POLICY);
        assert_eq!(frame.reason.as_str(), "not found");

        *runtime.fail_exec.lock().unwrap() = Some("exec refused".to_string());
        let frame = rejected(&runtime, params("alpha", "console")).await;
        assert_eq!(frame.code, close_code::ERROR);
        assert_eq!(frame.reason.as_str(), "exec refused");
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logs_arrive_in_order_within_bound() {
        let text = "line one\n".repeat(40);
        let chunks = text
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect::<Vec<_>>();
        let logs: ByteStream = stream::iter(chunks).boxed();

        let (_in_tx, in_rx) = peer();
        let (out_tx, out_rx) = mpsc::unbounded();
        relay_logs(out_tx, in_rx, logs, 16).await;

        let mut messages: Vec<Message> = out_rx.collect().await;
        let last = messages.pop();
        assert!(matches!(
            last,
            Some(Message::Close(Some(CloseFrame { code: close_code::NORMAL, .. })))
        ));
        assert!(messages.iter().all(|m| match m {
            Message::Text(t) => t.len() <= 16,
            _ => false,
        }));
        assert_eq!(payload(&messages), text.as_bytes());
    }

    #[tokio::test]
    async fn log_stream_error_closes_with_error_code() {
        let logs: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"booting\n")),
            Err(RuntimeError::Api("daemon went away".to_string())),
        ])
        .boxed();
        let (_in_tx, in_rx) = peer();
        let (out_tx, out_rx) = mpsc::unbounded();
        relay_logs(out_tx, in_rx, logs, 120).await;

        let messages: Vec<Message> = out_rx.collect().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::Text("booting\n".into()));
        match &messages[1] {
            Message::Close(Some(frame)) => assert_eq!(frame.code, close_code::ERROR),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_close_releases_followed_logs() {
        let runtime = FakeRuntime::new();
        runtime.add_foreign("alpha", &[]);
        *runtime.log_chunks.lock().unwrap() = vec![Bytes::from_static(b"hello\n")];

        let Ok(Attached::Logs(logs)) =
            attach(&runtime, &params("alpha", "logs"), &StreamConfig::default()).await
        else {
            panic!("log session should open");
        };
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 1);

        let (in_tx, in_rx) = peer();
        let (out_tx, mut out_rx) = mpsc::unbounded();
        let relay = tokio::spawn(relay_logs(out_tx, in_rx, logs, 120));

        assert_eq!(out_rx.next().await, Some(Message::Text("hello\n".into())));
        in_tx
            .unbounded_send(Ok(Message::Text("ignored".into())))
            .unwrap();
        drop(in_tx);
        relay.await.unwrap();

        assert_eq!(out_rx.next().await, None);
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn console_pipes_both_directions() {
        let runtime = FakeRuntime::new();
        runtime.add_foreign("alpha", &[]);

        let Ok(Attached::Console(exec)) =
            attach(&runtime, &params("alpha", "console"), &StreamConfig::default()).await
        else {
            panic!("console session should open");
        };
        assert!(runtime.calls().iter().any(|c| c.ends_with(" /bin/sh")));
        let mut shell = runtime.exec_shell.lock().unwrap().take().unwrap();
        let output = runtime.exec_output.lock().unwrap().take().unwrap();

        let (in_tx, in_rx) = peer();
        let (out_tx, mut out_rx) = mpsc::unbounded();
        let relay = tokio::spawn(relay_console(out_tx, in_rx, exec, 120));

        in_tx
            .unbounded_send(Ok(Message::Text("say hi\n".into())))
            .unwrap();
        let mut typed = [0u8; 7];
        shell.read_exact(&mut typed).await.unwrap();
        assert_eq!(&typed, b"say hi\n");

        output
            .unbounded_send(Ok(Bytes::from_static(b"[Server] hi\n")))
            .unwrap();
        assert_eq!(
            out_rx.next().await,
            Some(Message::Text("[Server] hi\n".into()))
        );

        // shell exits: the peer gets a normal close and stdin is shut
        drop(output);
        relay.await.unwrap();
        match out_rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::NORMAL),
            other => panic!("unexpected {other:?}"),
        }
        let mut rest = Vec::new();
        assert_eq!(shell.read_to_end(&mut rest).await.unwrap(), 0);
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn console_peer_close_shuts_exec_input() {
        let runtime = FakeRuntime::new();
        runtime.add_foreign("alpha", &[]);

        let Ok(Attached::Console(exec)) =
            attach(&runtime, &params("alpha", "console"), &StreamConfig::default()).await
        else {
            panic!("console session should open");
        };
        let mut shell = runtime.exec_shell.lock().unwrap().take().unwrap();

        let (in_tx, in_rx) = peer();
        let (out_tx, _out_rx) = mpsc::unbounded();
        let relay = tokio::spawn(relay_console(out_tx, in_rx, exec, 120));

        in_tx
            .unbounded_send(Ok(Message::Close(None)))
            .unwrap();
        relay.await.unwrap();

        let mut rest = Vec::new();
        assert_eq!(shell.read_to_end(&mut rest).await.unwrap(), 0);
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 0);
    }
}
