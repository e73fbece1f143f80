//! Connection workers and flow control.
//!
//! A [`Connection`] owns two tasks:
//!
//! - the **Sender** drains the outbound queue, assigns sequence numbers,
//!   seals and writes frames. A message that expects an acknowledgment
//!   first takes a slot from the in-flight window and waits while the
//!   window is full.
//! - the **Receiver** reads and opens frames. Acknowledgments release a
//!   window slot and go no further; every other frame is queued for the
//!   connection's owner.
//!
//! Closing is the single cancellation signal. Either worker failing, the
//! peer closing, or the owner calling [`Connection::close`] stops both.

use crate::config::ConnectionConfig;
use crate::crypto::{FrameCipher, Role, SessionKey};
use crate::error::{CloudError, CloudResult};
use crate::framing::{read_frame, write_frame};
use cloudsync_protocol::{Frame, Message};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Work items for the Sender.
enum Outbound {
    Message(Message),
    Rekey(SessionKey),
}

/// Sliding window over sent-but-unacknowledged messages.
///
/// `queued` counts messages that expect an ack but have not taken a slot
/// yet, so draining also waits for messages still in the outbound queue.
#[derive(Debug)]
pub(crate) struct FlowControl {
    window: Semaphore,
    cap: usize,
    queued: AtomicUsize,
    drained: Notify,
}

impl FlowControl {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            window: Semaphore::new(cap),
            cap,
            queued: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    fn enqueue(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    fn dequeue(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Takes one slot, waiting while the window is full.
    async fn acquire(&self) {
        if let Ok(permit) = self.window.acquire().await {
            permit.forget();
        }
        self.dequeue();
    }

    /// Returns one slot. Acks beyond the number of outstanding messages
    /// are ignored.
    fn release(&self) {
        if self.in_flight() > 0 {
            self.window.add_permits(1);
        }
        if self.in_flight() == 0 {
            self.drained.notify_waiters();
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.cap.saturating_sub(self.window.available_permits())
    }

    fn is_drained(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0 && self.in_flight() == 0
    }
}

type FailureSlot = Arc<Mutex<Option<CloudError>>>;

fn record_failure(slot: &FailureSlot, err: CloudError) {
    let mut failure = slot.lock();
    if failure.is_none() {
        *failure = Some(err);
    }
}

async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// An encrypted, flow-controlled message channel to one peer.
pub struct Connection {
    peer: String,
    config: ConnectionConfig,
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<Frame>,
    inbound_cipher: Arc<Mutex<FrameCipher>>,
    flow: Arc<FlowControl>,
    shutdown: Arc<watch::Sender<bool>>,
    failure: FailureSlot,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Starts the workers on an established stream.
    ///
    /// Both directions begin on the bootstrap key.
    ///
    /// # Errors
    ///
    /// Returns an error if the ciphers cannot be initialised.
    pub fn start<S>(
        stream: S,
        role: Role,
        peer: impl Into<String>,
        config: ConnectionConfig,
    ) -> CloudResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        let (reader, writer) = tokio::io::split(stream);

        let outbound_cipher = FrameCipher::bootstrap(role.outbound())?;
        let inbound_cipher = Arc::new(Mutex::new(FrameCipher::bootstrap(role.inbound())?));
        let flow = Arc::new(FlowControl::new(config.max_in_flight));
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let failure: FailureSlot = Arc::new(Mutex::new(None));

        let (out_tx, out_rx) = mpsc::channel(config.queue_capacity);
        let (in_tx, in_rx) = mpsc::channel(config.queue_capacity);

        let sender = tokio::spawn(run_sender(
            writer,
            out_rx,
            outbound_cipher,
            Arc::clone(&flow),
            Arc::clone(&shutdown),
            Arc::clone(&failure),
            peer.clone(),
        ));
        let receiver = tokio::spawn(run_receiver(
            reader,
            in_tx,
            Arc::clone(&inbound_cipher),
            Arc::clone(&flow),
            Arc::clone(&shutdown),
            Arc::clone(&failure),
            config.max_frame_size,
            peer.clone(),
        ));

        debug!(peer = %peer, ?role, "connection started");

        Ok(Self {
            peer,
            config,
            outbound: out_tx,
            inbound: in_rx,
            inbound_cipher,
            flow,
            shutdown,
            failure,
            workers: Mutex::new(vec![sender, receiver]),
        })
    }

    /// Dials `host` and starts a client connection.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Timeout`] if the connect timeout elapses and
    /// [`CloudError::Transport`] if the peer cannot be reached.
    pub async fn connect(host: &str, config: ConnectionConfig) -> CloudResult<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| CloudError::timeout(format!("connect to {host}"), config.connect_timeout))??;
        stream.set_nodelay(true)?;
        Self::start(stream, Role::Client, host, config)
    }

    /// Address or label of the peer.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Settings of this connection.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns true once the connection has been closed from either side.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Returns the failure that ended the connection, if any.
    pub fn failure(&self) -> Option<CloudError> {
        self.failure.lock().clone()
    }

    fn closed_error(&self) -> CloudError {
        self.failure().unwrap_or(CloudError::ConnectionClosed)
    }

    /// Queues a message for sending.
    ///
    /// Returns once the Sender has accepted the message; the in-flight
    /// window is applied when it is written.
    ///
    /// # Errors
    ///
    /// Returns the connection's failure, or [`CloudError::ConnectionClosed`].
    pub async fn send(&self, message: Message) -> CloudResult<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let counted = message.expects_ack();
        if counted {
            self.flow.enqueue();
        }
        let sent = self.outbound.send(Outbound::Message(message)).await;
        if sent.is_err() {
            if counted {
                self.flow.dequeue();
            }
            return Err(self.closed_error());
        }
        Ok(())
    }

    /// Receives the next non-acknowledgment frame.
    ///
    /// Returns `Ok(None)` once the peer has closed cleanly.
    ///
    /// # Errors
    ///
    /// Returns the failure that stopped the Receiver.
    pub async fn recv(&mut self) -> CloudResult<Option<Frame>> {
        match self.inbound.recv().await {
            Some(frame) => Ok(Some(frame)),
            None => match self.failure() {
                Some(err) => Err(err),
                None => Ok(None),
            },
        }
    }

    /// Receives the next frame, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Timeout`] if nothing arrives in time and the
    /// closing error if the connection ends first.
    pub async fn wait_for_message(
        &mut self,
        operation: &str,
        timeout: Duration,
    ) -> CloudResult<Frame> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => Err(self.closed_error()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CloudError::timeout(operation, timeout)),
        }
    }

    /// Switches inbound frames to `key` from the next frame on.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unusable.
    pub fn rekey_inbound(&self, key: &SessionKey) -> CloudResult<()> {
        self.inbound_cipher.lock().rekey(key)
    }

    /// Switches outbound frames to `key` after every message queued so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub async fn rekey_outbound(&self, key: SessionKey) -> CloudResult<()> {
        self.outbound
            .send(Outbound::Rekey(key))
            .await
            .map_err(|_| self.closed_error())
    }

    /// Number of messages sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.flow.in_flight()
    }

    /// Waits until every sent message has been acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Timeout`] if acknowledgments are still
    /// outstanding after `timeout`, or the closing error if the
    /// connection ends first.
    pub async fn drain(&self, timeout: Duration) -> CloudResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let wait = async {
            loop {
                let drained = self.flow.drained.notified();
                if self.flow.is_drained() {
                    return Ok(());
                }
                if *shutdown.borrow_and_update() {
                    return Err(self.closed_error());
                }
                tokio::select! {
                    _ = drained => {}
                    _ = shutdown.changed() => {}
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CloudError::timeout("acknowledgments", timeout))?
    }

    /// Waits until the peer closes or the connection otherwise ends.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_for_close(&self, timeout: Duration) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        tokio::time::timeout(timeout, closed(&mut shutdown))
            .await
            .is_ok()
    }

    /// Closes the connection. Idempotent.
    ///
    /// The Sender still writes what was already queued before shutting
    /// down its half of the stream.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            debug!(peer = %self.peer, "connection closed");
        }
    }

    /// Closes the connection and waits for both workers to finish.
    pub async fn shutdown(&self) {
        self.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_sender<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<Outbound>,
    mut cipher: FrameCipher,
    flow: Arc<FlowControl>,
    shutdown: Arc<watch::Sender<bool>>,
    failure: FailureSlot,
    peer: String,
) where
    W: AsyncWrite + Unpin,
{
    let mut closing = shutdown.subscribe();
    let mut sequence = 0u64;

    let result: CloudResult<()> = async {
        loop {
            let item = tokio::select! {
                biased;
                _ = closed(&mut closing) => break,
                item = queue.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            match item {
                Outbound::Rekey(key) => {
                    cipher.rekey(&key)?;
                    debug!(peer = %peer, epoch = cipher.epoch(), "outbound rekeyed");
                }
                Outbound::Message(message) => {
                    if message.expects_ack() {
                        tokio::select! {
                            _ = flow.acquire() => {}
                            _ = closed(&mut closing) => {
                                flow.dequeue();
                                sequence += 1;
                                write_frame(&mut writer, &Frame::new(sequence, message), &mut cipher).await?;
                                break;
                            }
                        }
                    }
                    sequence += 1;
                    trace!(peer = %peer, sequence, tag = ?message.tag(), "writing frame");
                    write_frame(&mut writer, &Frame::new(sequence, message), &mut cipher).await?;
                }
            }
        }

        // Best effort: flush what was queued before the close.
        while let Ok(item) = queue.try_recv() {
            match item {
                Outbound::Rekey(key) => cipher.rekey(&key)?,
                Outbound::Message(message) => {
                    if message.expects_ack() {
                        flow.dequeue();
                    }
                    sequence += 1;
                    write_frame(&mut writer, &Frame::new(sequence, message), &mut cipher).await?;
                }
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        warn!(peer = %peer, error = %err, "sender stopped");
        record_failure(&failure, err);
    }
    let _ = writer.shutdown().await;
    shutdown.send_replace(true);
    debug!(peer = %peer, frames = sequence, "sender finished");
}

#[allow(clippy::too_many_arguments)]
async fn run_receiver<R>(
    mut reader: R,
    queue: mpsc::Sender<Frame>,
    cipher: Arc<Mutex<FrameCipher>>,
    flow: Arc<FlowControl>,
    shutdown: Arc<watch::Sender<bool>>,
    failure: FailureSlot,
    max_frame_size: usize,
    peer: String,
) where
    R: AsyncRead + Unpin,
{
    let mut closing = shutdown.subscribe();

    loop {
        let next = tokio::select! {
            _ = closed(&mut closing) => break,
            next = read_frame(&mut reader, &cipher, max_frame_size) => next,
        };
        match next {
            Ok(Some(frame)) => {
                trace!(peer = %peer, sequence = frame.sequence, tag = ?frame.message.tag(), "read frame");
                if let Message::Ack(_) = frame.message {
                    flow.release();
                    continue;
                }
                let delivered = tokio::select! {
                    _ = closed(&mut closing) => false,
                    sent = queue.send(frame) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            Ok(None) => {
                debug!(peer = %peer, "peer closed the stream");
                break;
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "receiver stopped");
                record_failure(&failure, err);
                break;
            }
        }
    }

    shutdown.send_replace(true);
}
