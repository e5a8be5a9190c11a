//! Connection sessions.
//!
//! Each admitted connection runs two long-lived tasks: a read loop
//! pulling frames off the transport into [`Hub::dispatch`], and a write
//! loop draining the session's mailbox back out. Either loop failing
//! moves the session to `Closing`; the other loop observes that and
//! terminates, the session is unregistered, and the transport is
//! released. Nothing is retried — the only recovery is the client
//! reconnecting as a brand-new session.

use crate::auth::Identity;
use crate::metrics;
use harbor_core::{mailbox, Hub, Outbox, SessionHandle, SessionId};
use harbor_protocol::codec;
use harbor_transport::{Frame, FrameReader, FrameWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session lifecycle states.
///
/// `Connecting` ends when the hub accepts registration. `Closing`
/// begins the instant either loop detects failure or an unregister is
/// issued; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Per-session tunables, derived from the server config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Mailbox capacity in messages.
    pub mailbox_capacity: usize,
    /// Inbound frame size cap in bytes.
    pub max_inbound_size: usize,
    /// Close the session after this long without inbound traffic.
    pub read_idle_timeout: Duration,
}

/// Admit a connection and run it to completion.
///
/// Registers the session with the hub, runs the write loop on its own
/// task and the read loop on the caller's task, and unregisters exactly
/// once when either loop ends. Returns once the session is fully
/// closed and the write loop has flushed.
pub async fn run_session<R, W>(
    hub: Arc<Hub>,
    identity: Identity,
    room: Option<String>,
    reader: R,
    writer: W,
    options: SessionOptions,
) where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let id = SessionId::generate();
    let (mb, outbox) = mailbox(options.mailbox_capacity);
    let (signal, _) = watch::channel(SessionState::Connecting);
    let signal = Arc::new(signal);

    let handle = SessionHandle::new(
        id.clone(),
        identity.user_id.clone(),
        identity.username.clone(),
        room,
        mb,
    );
    hub.register(handle);
    signal.send_replace(SessionState::Active);

    info!(session = %id, user = %identity.username, "Session active");

    let write_task = tokio::spawn(write_loop(
        writer,
        outbox,
        Arc::clone(&signal),
        id.clone(),
    ));

    read_loop(&hub, &id, reader, &options, signal.subscribe()).await;

    // Read side is done: close, unregister (closes the mailbox), and
    // let the write loop flush its buffered tail.
    signal.send_replace(SessionState::Closing);
    hub.unregister(&id);
    let _ = write_task.await;
    signal.send_replace(SessionState::Closed);

    info!(session = %id, "Session closed");
}

/// Pull frames off the transport and hand them to the hub.
///
/// Ends on transport error, clean close, protocol error, idle timeout,
/// or a `Closing` signal from the write side. Protocol errors are fatal
/// to the session; there is no resynchronization. Keepalive frames
/// count as inbound activity and reset the idle window.
async fn read_loop<R: FrameReader>(
    hub: &Hub,
    id: &SessionId,
    mut reader: R,
    options: &SessionOptions,
    mut state: watch::Receiver<SessionState>,
) {
    loop {
        tokio::select! {
            res = tokio::time::timeout(options.read_idle_timeout, reader.recv()) => {
                match res {
                    Ok(Ok(Some(Frame::Data(data)))) => {
                        metrics::record_message(data.len(), "inbound");
                        match codec::decode(&data, options.max_inbound_size) {
                            Ok(envelope) => {
                                hub.dispatch(id, envelope);
                                metrics::refresh_hub_gauges(&hub.stats());
                            }
                            Err(e) => {
                                warn!(session = %id, error = %e, "Protocol error, closing session");
                                metrics::record_error("protocol");
                                return;
                            }
                        }
                    }
                    // Keepalive carries nothing to dispatch, but it
                    // re-arms the idle timer on the next iteration.
                    Ok(Ok(Some(Frame::Keepalive))) => {
                        debug!(session = %id, "Keepalive received");
                    }
                    Ok(Ok(None)) => {
                        debug!(session = %id, "Peer closed the connection");
                        return;
                    }
                    Ok(Err(e)) => {
                        warn!(session = %id, error = %e, "Transport error, closing session");
                        metrics::record_error("transport");
                        return;
                    }
                    Err(_) => {
                        warn!(
                            session = %id,
                            idle = ?options.read_idle_timeout,
                            "Read-idle timeout, closing session"
                        );
                        metrics::record_error("idle_timeout");
                        return;
                    }
                }
            }
            changed = state.changed() => {
                if changed.is_err()
                    || matches!(*state.borrow(), SessionState::Closing | SessionState::Closed)
                {
                    debug!(session = %id, "Read loop observed closing state");
                    return;
                }
            }
        }
    }
}

/// Drain the mailbox out to the transport.
///
/// The per-write deadline lives inside the transport writer; a failed
/// or timed-out write is fatal. The mailbox closing (unregistration or
/// hub drain) flushes whatever is buffered and then ends the loop.
async fn write_loop<W: FrameWriter>(
    mut writer: W,
    mut outbox: Outbox,
    signal: Arc<watch::Sender<SessionState>>,
    id: SessionId,
) {
    while let Some(envelope) = outbox.recv().await {
        let data = match codec::encode(&envelope) {
            Ok(data) => data,
            Err(e) => {
                // An unserializable envelope is a bug, not a session
                // failure; skip it.
                warn!(session = %id, error = %e, "Dropped unencodable envelope");
                continue;
            }
        };

        metrics::record_message(data.len(), "outbound");
        if let Err(e) = writer.send(data).await {
            warn!(session = %id, error = %e, "Fatal write failure, closing session");
            metrics::record_error("write");
            break;
        }
    }

    signal.send_replace(SessionState::Closing);
    writer.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use harbor_protocol::{Envelope, MsgKind};
    use harbor_transport::TransportError;
    use tokio::sync::mpsc;

    struct ScriptedReader {
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    #[async_trait]
    impl FrameReader for ScriptedReader {
        async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
            Ok(self.rx.recv().await)
        }
    }

    struct CollectingWriter {
        tx: mpsc::UnboundedSender<Bytes>,
        fail_writes: bool,
    }

    #[async_trait]
    impl FrameWriter for CollectingWriter {
        async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::Timeout);
            }
            self.tx.send(data).map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) {}
    }

    fn transport_pair(
        fail_writes: bool,
    ) -> (
        ScriptedReader,
        CollectingWriter,
        mpsc::UnboundedSender<Frame>,
        mpsc::UnboundedReceiver<Bytes>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            ScriptedReader { rx: in_rx },
            CollectingWriter {
                tx: out_tx,
                fail_writes,
            },
            in_tx,
            out_rx,
        )
    }

    fn options() -> SessionOptions {
        SessionOptions {
            mailbox_capacity: 16,
            max_inbound_size: 512,
            read_idle_timeout: Duration::from_secs(5),
        }
    }

    fn frame(envelope: &Envelope) -> Frame {
        Frame::Data(codec::encode(envelope).unwrap())
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_session_registers_and_receives_welcome() {
        let hub = Arc::new(Hub::new());
        let (reader, writer, in_tx, mut out_rx) = transport_pair(false);

        let task = tokio::spawn(run_session(
            Arc::clone(&hub),
            Identity::new("u1", "alice"),
            Some("lobby".to_string()),
            reader,
            writer,
            options(),
        ));

        // First outbound frame is the private welcome.
        let data = out_rx.recv().await.unwrap();
        let welcome: Envelope = serde_json::from_slice(&data).unwrap();
        assert_eq!(welcome.kind, MsgKind::Message);
        assert!(welcome.content.unwrap().starts_with("Welcome!"));

        assert_eq!(hub.list_users(Some("lobby")), vec!["alice"]);

        drop(in_tx); // Peer goes away.
        task.await.unwrap();
        assert_eq!(hub.stats().sessions, 0);
        assert_eq!(hub.stats().rooms, 0);
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_the_hub() {
        let hub = Arc::new(Hub::new());
        let (reader, writer, in_tx, _out_rx) = transport_pair(false);

        let task = tokio::spawn(run_session(
            Arc::clone(&hub),
            Identity::new("u1", "alice"),
            None,
            reader,
            writer,
            options(),
        ));

        in_tx
            .send(frame(&Envelope::new(MsgKind::Join).with_room("lobby")))
            .unwrap();

        let hub_check = Arc::clone(&hub);
        wait_for(move || hub_check.list_users(Some("lobby")) == vec!["alice"]).await;

        drop(in_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        let hub = Arc::new(Hub::new());
        let (reader, writer, in_tx, _out_rx) = transport_pair(false);

        let task = tokio::spawn(run_session(
            Arc::clone(&hub),
            Identity::new("u1", "alice"),
            None,
            reader,
            writer,
            options(),
        ));

        let hub_check = Arc::clone(&hub);
        wait_for(move || hub_check.stats().sessions == 1).await;

        in_tx
            .send(Frame::Data(Bytes::from_static(b"not json")))
            .unwrap();

        // The session tears down without the peer closing.
        task.await.unwrap();
        assert_eq!(hub.stats().sessions, 0);
    }

    #[tokio::test]
    async fn test_write_failure_closes_the_session() {
        let hub = Arc::new(Hub::new());
        let (reader, writer, _in_tx, _out_rx) = transport_pair(true);

        // The welcome delivery fails immediately; the write loop's
        // closing signal must also stop the read loop, which is
        // otherwise blocked with the peer still connected.
        let task = tokio::spawn(run_session(
            Arc::clone(&hub),
            Identity::new("u1", "alice"),
            Some("lobby".to_string()),
            reader,
            writer,
            options(),
        ));

        task.await.unwrap();
        assert_eq!(hub.stats().sessions, 0);
    }

    #[tokio::test]
    async fn test_read_idle_timeout_closes_the_session() {
        let hub = Arc::new(Hub::new());
        let (reader, writer, _in_tx, _out_rx) = transport_pair(false);

        let mut opts = options();
        opts.read_idle_timeout = Duration::from_millis(50);

        run_session(
            Arc::clone(&hub),
            Identity::new("u1", "alice"),
            None,
            reader,
            writer,
            opts,
        )
        .await;

        assert_eq!(hub.stats().sessions, 0);
    }

    #[tokio::test]
    async fn test_keepalives_count_as_activity() {
        let hub = Arc::new(Hub::new());
        let (reader, writer, in_tx, _out_rx) = transport_pair(false);

        let mut opts = options();
        opts.read_idle_timeout = Duration::from_millis(150);

        let task = tokio::spawn(run_session(
            Arc::clone(&hub),
            Identity::new("u1", "alice"),
            None,
            reader,
            writer,
            opts,
        ));

        // Nothing but protocol keepalives for well past the idle window.
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            in_tx.send(Frame::Keepalive).unwrap();
        }
        assert_eq!(hub.stats().sessions, 1);

        drop(in_tx);
        task.await.unwrap();
        assert_eq!(hub.stats().sessions, 0);
    }

    #[test]
    fn test_room_gauge_tracks_in_session_join() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        // A current-thread runtime keeps the session tasks on this
        // thread, where the local recorder captures their samples.
        ::metrics::with_local_recorder(&recorder, || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let hub = Arc::new(Hub::new());
                let (reader, writer, in_tx, _out_rx) = transport_pair(false);

                let task = tokio::spawn(run_session(
                    Arc::clone(&hub),
                    Identity::new("u1", "alice"),
                    None,
                    reader,
                    writer,
                    options(),
                ));

                in_tx
                    .send(frame(&Envelope::new(MsgKind::Join).with_room("lobby")))
                    .unwrap();
                let hub_check = Arc::clone(&hub);
                wait_for(move || hub_check.list_users(Some("lobby")) == vec!["alice"]).await;

                drop(in_tx);
                task.await.unwrap();
            });
        });

        // The join dispatch itself refreshed the room gauge, without
        // waiting for a disconnect.
        let rooms = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == crate::metrics::names::ROOMS_ACTIVE)
            .map(|(_, _, _, value)| value)
            .expect("room gauge was never set");
        assert_eq!(rooms, DebugValue::Gauge(1.0.into()));
    }

    #[tokio::test]
    async fn test_hub_drain_ends_the_session() {
        let hub = Arc::new(Hub::new());
        let (reader, writer, _in_tx, _out_rx) = transport_pair(false);

        let task = tokio::spawn(run_session(
            Arc::clone(&hub),
            Identity::new("u1", "alice"),
            Some("lobby".to_string()),
            reader,
            writer,
            options(),
        ));

        let hub_check = Arc::clone(&hub);
        wait_for(move || hub_check.stats().sessions == 1).await;

        assert_eq!(hub.drain_all(), 1);
        task.await.unwrap();
    }
}
