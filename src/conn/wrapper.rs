//! The fault-injecting connection wrapper.
//!
//! A [`FaultConn`] sits between application code and a real TCP stream.
//! Between them are two bounded packet queues and three workers:
//!
//! - the **reader** pulls bytes off the real socket into pooled packets,
//!   stamping each with its receive time;
//! - the **writer** takes queued packets and holds each one until the
//!   verdict latency has elapsed since its stamp, then writes it out — or
//!   raises a fault if the verdict says the network is down;
//! - the **updater** long-polls the control service for the connection's
//!   verdict and publishes changes, which immediately re-arms any delay
//!   loop in flight.
//!
//! Close is the universal cancel: flipping the close signal unwinds all
//! three workers, and the socket halves close as their workers drop. A
//! worker failure is sticky — it surfaces on the next read or write and the
//! connection stays failed.

use super::error::{ConnError, ConnResult};
use super::packet::{Packet, PacketPool, NUM_PACKETS, PACKET_SIZE};
use crate::control::ControlClient;
use crate::topology::ConnState;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// A failure raised by one of the connection workers, surfaced on the next
/// user-level read or write.
#[derive(Debug, Clone)]
pub(crate) enum ConnFault {
    /// The verdict said the network is down when a packet came due.
    Injected,
    /// The real socket failed during a write.
    Write(String),
    /// The updater lost the control plane.
    Control(String),
}

impl From<ConnFault> for ConnError {
    fn from(fault: ConnFault) -> Self {
        match fault {
            ConnFault::Injected => ConnError::Fault,
            ConnFault::Write(msg) => {
                ConnError::Io(io::Error::new(io::ErrorKind::BrokenPipe, msg))
            }
            ConnFault::Control(msg) => ConnError::Control(msg),
        }
    }
}

struct Overflow {
    data: Vec<u8>,
    err: Option<io::Error>,
}

#[derive(Clone, Copy, Default)]
struct Deadlines {
    read: Option<tokio::time::Instant>,
    write: Option<tokio::time::Instant>,
}

/// A latency/failure-injecting wrapper over a real TCP stream.
pub struct FaultConn {
    client_port: u16,
    server_port: u16,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    state_tx: Arc<watch::Sender<ConnState>>,
    failure_tx: Arc<watch::Sender<Option<ConnFault>>>,
    close_tx: watch::Sender<bool>,
    closed: AtomicBool,
    read_rx: tokio::sync::Mutex<mpsc::Receiver<Packet>>,
    write_tx: mpsc::Sender<Packet>,
    overflow: Mutex<Overflow>,
    deadlines: Mutex<Deadlines>,
    pool: Arc<PacketPool>,
}

impl FaultConn {
    /// Wrap an established stream, fetching the first verdict for
    /// `(client_port, server_port)` and starting the workers.
    pub(crate) async fn new(
        stream: TcpStream,
        client_port: u16,
        server_port: u16,
        control: ControlClient,
    ) -> ConnResult<FaultConn> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let initial = control
            .conn_state(client_port, server_port, None)
            .await
            .map_err(|e| ConnError::Control(e.to_string()))?;

        let state_tx = Arc::new(watch::channel(initial).0);
        let failure_tx = Arc::new(watch::channel(None).0);
        let (close_tx, _) = watch::channel(false);
        let (read_queue_tx, read_queue_rx) = mpsc::channel(NUM_PACKETS);
        let (write_queue_tx, write_queue_rx) = mpsc::channel(NUM_PACKETS);
        let pool = Arc::new(PacketPool::new());

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(reader_task(
            read_half,
            read_queue_tx,
            pool.clone(),
            close_tx.subscribe(),
        ));
        tokio::spawn(writer_task(
            write_half,
            write_queue_rx,
            pool.clone(),
            state_tx.subscribe(),
            close_tx.subscribe(),
            failure_tx.clone(),
        ));
        tokio::spawn(updater_task(
            control,
            client_port,
            server_port,
            state_tx.clone(),
            close_tx.subscribe(),
            failure_tx.clone(),
        ));

        debug!(client_port, server_port, "connection wrapped");
        Ok(FaultConn {
            client_port,
            server_port,
            local_addr,
            remote_addr,
            state_tx,
            failure_tx,
            close_tx,
            closed: AtomicBool::new(false),
            read_rx: tokio::sync::Mutex::new(read_queue_rx),
            write_tx: write_queue_tx,
            overflow: Mutex::new(Overflow {
                data: Vec::new(),
                err: None,
            }),
            deadlines: Mutex::new(Deadlines::default()),
            pool,
        })
    }

    /// Read into `buf`, delayed by the current verdict latency.
    ///
    /// Returns `Ok(0)` at end of stream. Bytes left over from a packet
    /// longer than `buf` are drained by subsequent reads before any new
    /// packet is taken.
    pub async fn read(&self, buf: &mut [u8]) -> ConnResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        {
            let mut overflow = self.overflow.lock().unwrap();
            if !overflow.data.is_empty() {
                let n = buf.len().min(overflow.data.len());
                buf[..n].copy_from_slice(&overflow.data[..n]);
                overflow.data.drain(..n);
                return Ok(n);
            }
            if let Some(err) = overflow.err.take() {
                return Err(ConnError::Io(err));
            }
        }

        let mut close_rx = self.close_tx.subscribe();
        if *close_rx.borrow() {
            return Err(ConnError::Closed);
        }
        let mut failure_rx = self.failure_tx.subscribe();
        if let Some(fault) = failure_rx.borrow().clone() {
            return Err(fault.into());
        }
        let deadline = self.deadlines.lock().unwrap().read;

        let packet = {
            let mut queue = self.read_rx.lock().await;
            tokio::select! {
                p = queue.recv() => p,
                _ = failure_rx.changed() => {
                    let fault = failure_rx.borrow().clone();
                    return Err(fault.map(ConnError::from).unwrap_or(ConnError::Closed));
                }
                _ = close_rx.changed() => return Err(ConnError::Closed),
                _ = sleep_until_opt(deadline) => return Err(ConnError::ReadTimeout),
            }
        };
        // The reader exiting with the queue drained is end of stream.
        let Some(mut packet) = packet else {
            return Ok(0);
        };

        self.delay(&packet, &mut close_rx).await?;

        let n = buf.len().min(packet.len);
        buf[..n].copy_from_slice(&packet.data[..n]);
        let err = packet.err.take();
        if n < packet.len {
            let mut overflow = self.overflow.lock().unwrap();
            overflow.data.extend_from_slice(&packet.data[n..packet.len]);
            overflow.err = err;
            self.pool.put(packet);
            return Ok(n);
        }
        self.pool.put(packet);
        match err {
            Some(e) if n == 0 => Err(ConnError::Io(e)),
            Some(e) => {
                // Bytes first; the error surfaces on the next read.
                self.overflow.lock().unwrap().err = Some(e);
                Ok(n)
            }
            None => Ok(n),
        }
    }

    /// Hold until `packet.stamp + latency`, re-evaluating whenever the
    /// verdict changes mid-wait.
    async fn delay(&self, packet: &Packet, close_rx: &mut watch::Receiver<bool>) -> ConnResult<()> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            let latency = state_rx.borrow().latency;
            let remaining = latency.saturating_sub(packet.stamp.elapsed());
            if remaining.is_zero() {
                return Ok(());
            }
            tokio::select! {
                _ = close_rx.changed() => return Err(ConnError::Closed),
                _ = state_rx.changed() => {}
                _ = tokio::time::sleep(remaining) => return Ok(()),
            }
        }
    }

    /// Write `buf`, sliced into packet-sized pieces; each piece is delayed
    /// by the writer before reaching the real socket.
    ///
    /// Returns the bytes handed off. A failure short-circuits the
    /// remaining pieces; pieces already queued may still be delivered.
    pub async fn write(&self, buf: &[u8]) -> ConnResult<usize> {
        let mut close_rx = self.close_tx.subscribe();
        if *close_rx.borrow() {
            return Err(ConnError::Closed);
        }
        let mut failure_rx = self.failure_tx.subscribe();
        if let Some(fault) = failure_rx.borrow().clone() {
            return Err(fault.into());
        }
        let deadline = self.deadlines.lock().unwrap().write;

        let mut written = 0;
        while written < buf.len() {
            let mut packet = self.pool.get();
            let n = (buf.len() - written).min(PACKET_SIZE);
            packet.data[..n].copy_from_slice(&buf[written..written + n]);
            packet.len = n;
            packet.stamp = Instant::now();

            tokio::select! {
                permit = self.write_tx.reserve() => match permit {
                    Ok(permit) => {
                        permit.send(packet);
                        written += n;
                    }
                    Err(_) => {
                        // The writer is gone; surface its failure if it
                        // left one behind.
                        let fault = failure_rx.borrow().clone();
                        return Err(fault.map(ConnError::from).unwrap_or(ConnError::Closed));
                    }
                },
                _ = failure_rx.changed() => {
                    let fault = failure_rx.borrow().clone();
                    return Err(fault.map(ConnError::from).unwrap_or(ConnError::Closed));
                }
                _ = close_rx.changed() => return Err(ConnError::Closed),
                _ = sleep_until_opt(deadline) => return Err(ConnError::WriteTimeout),
            }
        }
        Ok(written)
    }

    /// Close the wrapper. Idempotent. Unblocks all workers; the real
    /// socket closes as its halves drop with them.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(
            client_port = self.client_port,
            server_port = self.server_port,
            "connection closed"
        );
        self.close_tx.send_replace(true);
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote address of the underlying socket.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The client port this connection is registered under.
    pub fn client_port(&self) -> u16 {
        self.client_port
    }

    /// The server port this connection targets.
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Set the read deadline; `None` clears it.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.lock().unwrap().read = deadline.map(tokio::time::Instant::from_std);
    }

    /// Set the write deadline; `None` clears it.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.lock().unwrap().write = deadline.map(tokio::time::Instant::from_std);
    }

    /// Set both deadlines; `None` clears them.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        let converted = deadline.map(tokio::time::Instant::from_std);
        let mut deadlines = self.deadlines.lock().unwrap();
        deadlines.read = converted;
        deadlines.write = converted;
    }
}

impl Drop for FaultConn {
    fn drop(&mut self) {
        self.close();
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(t) => tokio::time::sleep_until(t).await,
        None => std::future::pending().await,
    }
}

async fn reader_task(
    mut half: OwnedReadHalf,
    queue: mpsc::Sender<Packet>,
    pool: Arc<PacketPool>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        let mut packet = pool.get();
        let result = tokio::select! {
            r = half.read(&mut packet.data[..]) => r,
            _ = close_rx.changed() => return,
        };
        packet.stamp = Instant::now();
        let last = match result {
            Ok(n) => {
                packet.len = n;
                n == 0
            }
            Err(e) => {
                packet.len = 0;
                packet.err = Some(e);
                true
            }
        };
        tokio::select! {
            sent = queue.send(packet) => {
                if sent.is_err() {
                    return;
                }
            }
            _ = close_rx.changed() => return,
        }
        if last {
            return;
        }
    }
}

async fn writer_task(
    mut half: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Packet>,
    pool: Arc<PacketPool>,
    mut state_rx: watch::Receiver<ConnState>,
    mut close_rx: watch::Receiver<bool>,
    failure_tx: Arc<watch::Sender<Option<ConnFault>>>,
) {
    loop {
        let packet = tokio::select! {
            p = queue.recv() => match p {
                Some(p) => p,
                None => return,
            },
            _ = close_rx.changed() => return,
        };

        // Hold the packet until its stamp plus the current latency; a
        // verdict change mid-wait re-evaluates the remaining time.
        loop {
            let latency = state_rx.borrow().latency;
            let remaining = latency.saturating_sub(packet.stamp.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = close_rx.changed() => return,
                _ = state_rx.changed() => {}
                _ = tokio::time::sleep(remaining) => break,
            }
        }

        let result = if state_rx.borrow().ok {
            half.write_all(packet.bytes())
                .await
                .map_err(|e| ConnFault::Write(e.to_string()))
        } else {
            Err(ConnFault::Injected)
        };
        pool.put(packet);
        if let Err(fault) = result {
            warn!("write worker failed: {:?}", fault);
            failure_tx.send_replace(Some(fault));
            return;
        }
    }
}

async fn updater_task(
    control: ControlClient,
    client_port: u16,
    server_port: u16,
    state_tx: Arc<watch::Sender<ConnState>>,
    mut close_rx: watch::Receiver<bool>,
    failure_tx: Arc<watch::Sender<Option<ConnFault>>>,
) {
    loop {
        let old = *state_tx.borrow();
        let result = tokio::select! {
            r = control.conn_state(client_port, server_port, Some(&old)) => r,
            _ = close_rx.changed() => return,
        };
        match result {
            Ok(new) => {
                if new != old {
                    debug!(client_port, server_port, ?new, "verdict changed");
                    state_tx.send_replace(new);
                }
            }
            Err(e) => {
                warn!(client_port, server_port, "verdict poll failed: {e}");
                failure_tx.send_replace(Some(ConnFault::Control(e.to_string())));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_conversion() {
        assert!(matches!(
            ConnError::from(ConnFault::Injected),
            ConnError::Fault
        ));
        assert!(matches!(
            ConnError::from(ConnFault::Control("gone".into())),
            ConnError::Control(_)
        ));
        match ConnError::from(ConnFault::Write("broken".into())) {
            ConnError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
