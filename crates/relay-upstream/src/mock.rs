//! Scripted sockets for exercising the upstream without a network.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    connection::CLIENT_INTRODUCTION_ACK,
    socket::{Dialer, Socket},
};

struct SocketState {
    dialed_with: (String, String),
    written: Mutex<Vec<Vec<u8>>>,
    inbound_tx: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<io::Result<Vec<u8>>>>,
    failing_writes: AtomicUsize,
    broken_writes: AtomicBool,
    reads: AtomicUsize,
    closed: AtomicBool,
}

/// In-memory socket whose inbound frames are pushed by the test.
#[derive(Clone)]
pub struct MockSocket {
    state: Arc<SocketState>,
}

impl MockSocket {
    fn new(url: &str, origin: &str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(SocketState {
                dialed_with: (url.to_string(), origin.to_string()),
                written: Mutex::new(Vec::new()),
                inbound_tx,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                failing_writes: AtomicUsize::new(0),
                broken_writes: AtomicBool::new(false),
                reads: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Socket whose first inbound frame is `ack`.
    pub fn with_ack(ack: &[u8]) -> Self {
        let socket = Self::new("", "");
        socket.push(ack);
        socket
    }

    /// Queue an inbound frame.
    pub fn push(&self, frame: &[u8]) {
        let _ = self.state.inbound_tx.send(Ok(frame.to_vec()));
    }

    /// Queue an inbound read failure.
    pub fn push_error(&self) {
        let _ = self
            .state
            .inbound_tx
            .send(Err(io::ErrorKind::ConnectionReset.into()));
    }

    /// Fail the next `n` writes.
    pub fn fail_next_writes(&self, n: usize) {
        self.state.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail every write from now on.
    pub fn break_writes(&self) {
        self.state.broken_writes.store(true, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn dialed_with(&self) -> (String, String) {
        self.state.dialed_with.clone()
    }
}

#[async_trait]
impl Socket for MockSocket {
    async fn write(&self, frame: &[u8]) -> io::Result<usize> {
        if self.is_closed() || self.state.broken_writes.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let failed = self
            .state
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.state.written.lock().unwrap().push(frame.to_vec());
        Ok(frame.len())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.state.inbound_rx.lock().await;
        match rx.recv().await {
            Some(Ok(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        // Wake a pending reader the way a close frame would.
        let _ = self
            .state
            .inbound_tx
            .send(Err(io::ErrorKind::ConnectionAborted.into()));
        Ok(())
    }
}

enum Plan {
    Ack(Vec<u8>),
    BrokenRead,
    Refuse,
}

/// Dialer handing out [`MockSocket`]s, acknowledging by default.
#[derive(Default)]
pub struct MockDialer {
    plans: Mutex<VecDeque<Plan>>,
    sockets: Mutex<Vec<MockSocket>>,
    dials: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_with_ack(&self, ack: &[u8]) {
        self.plans.lock().unwrap().push_back(Plan::Ack(ack.to_vec()));
    }

    pub fn accept_with_broken_read(&self) {
        self.plans.lock().unwrap().push_back(Plan::BrokenRead);
    }

    pub fn refuse_next(&self) {
        self.plans.lock().unwrap().push_back(Plan::Refuse);
    }

    /// Socket of the `idx`-th successful dial.
    pub fn socket(&self, idx: usize) -> MockSocket {
        self.sockets.lock().unwrap()[idx].clone()
    }

    pub async fn wait_for_socket(&self, idx: usize) -> MockSocket {
        for _ in 0..1000 {
            if let Some(socket) = self.sockets.lock().unwrap().get(idx) {
                return socket.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("socket {idx} was never dialed");
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    /// Dial attempts, including refused ones.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Highest number of dials observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, url: &str, origin: &str) -> io::Result<Box<dyn Socket>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Plan::Ack(CLIENT_INTRODUCTION_ACK.to_vec()));

        let socket = MockSocket::new(url, origin);
        match plan {
            Plan::Refuse => return Err(io::ErrorKind::ConnectionRefused.into()),
            Plan::Ack(ack) => socket.push(&ack),
            Plan::BrokenRead => socket.push_error(),
        }
        self.sockets.lock().unwrap().push(socket.clone());
        Ok(Box::new(socket))
    }
}
