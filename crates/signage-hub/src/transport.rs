use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type ConnId = u64;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    Closed,
    Backpressure,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Closed => f.write_str("closed"),
            DeliveryError::Backpressure => f.write_str("backpressure"),
        }
    }
}

/// Handle to one display connection. Cloning shares the same writer queue,
/// identity is the connection id.
#[derive(Clone)]
pub struct Transport {
    conn_id: ConnId,
    sender: mpsc::Sender<Outbound>,
}

impl Transport {
    pub fn new(conn_id: ConnId, sender: mpsc::Sender<Outbound>) -> Self {
        Self { conn_id, sender }
    }

    pub fn channel(conn_id: ConnId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(conn_id, tx), rx)
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Never waits: a stalled display must not hold up anyone else.
    pub fn deliver(&self, text: Arc<str>) -> Result<(), DeliveryError> {
        self.push(Outbound::Text(text))
    }

    pub fn ping(&self) -> Result<(), DeliveryError> {
        self.push(Outbound::Ping)
    }

    fn push(&self, frame: Outbound) -> Result<(), DeliveryError> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::Backpressure),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("conn_id", &self.conn_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl PartialEq for Transport {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for Transport {}
