use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::service::ServiceDescriptor;

/// Largest chunk returned for a single read request.
pub const MAX_READ_CHUNK: usize = 512;

/// Error raised by the transport when a session cannot be established.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("service registration rejected: {0}")]
    RegistrationRejected(String),
}

/// Event reported by the transport's radio side.
#[derive(Debug)]
pub enum TransportEvent {
    Subscribed {
        characteristic: Uuid,
    },
    Unsubscribed {
        characteristic: Uuid,
    },
    ReadRequested {
        characteristic: Uuid,
        offset: usize,
        reply: oneshot::Sender<ReadResponse>,
    },
    WriteRequested {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Engine's answer to a read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResponse {
    Value(Vec<u8>),
    InvalidOffset,
    NotFound,
}

pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Boundary to the radio/advertising stack.
///
/// The engine hands encoded payloads to `notify` and reacts to the
/// adapter's event stream; everything over-the-air lives behind this
/// trait.
#[async_trait]
pub trait TransportAdapter: Send + 'static {
    /// Registers the service and starts advertising it. Failure aborts
    /// session start and leaves the engine idle.
    async fn register_service(&mut self, service: &ServiceDescriptor)
        -> Result<(), TransportError>;

    /// Pushes a payload to the subscribers of a characteristic. Returns
    /// false on a transient failure such as a full send queue.
    async fn notify(&mut self, characteristic: Uuid, payload: &[u8]) -> bool;

    async fn stop_advertising(&mut self);

    /// Radio-side events. Called once per session.
    fn events(&mut self) -> EventStream;
}

/// Creates a connected in-memory transport: the adapter side goes to the
/// simulator, the central side acts as a remote test client.
pub fn loopback() -> (LoopbackAdapter, LoopbackCentral) {
    let (event_sender, event_receiver) = mpsc::unbounded_channel();
    let (notification_sender, notification_receiver) = mpsc::unbounded_channel();

    let shared = Arc::new(LoopbackShared {
        notify_ok: AtomicBool::new(true),
        advertising_stopped: AtomicBool::new(false),
        registration_error: Mutex::new(None),
        registered: Mutex::new(None),
    });

    let adapter = LoopbackAdapter {
        events: Some(event_receiver),
        notifications: notification_sender,
        shared: shared.clone(),
    };

    let central = LoopbackCentral {
        events: event_sender,
        notifications: notification_receiver,
        shared,
    };

    (adapter, central)
}

struct LoopbackShared {
    notify_ok: AtomicBool,
    advertising_stopped: AtomicBool,
    registration_error: Mutex<Option<String>>,
    registered: Mutex<Option<ServiceDescriptor>>,
}

/// In-memory transport adapter used by the demos and integration tests.
pub struct LoopbackAdapter {
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    notifications: mpsc::UnboundedSender<(Uuid, Vec<u8>)>,
    shared: Arc<LoopbackShared>,
}

#[async_trait]
impl TransportAdapter for LoopbackAdapter {
    async fn register_service(
        &mut self,
        service: &ServiceDescriptor,
    ) -> Result<(), TransportError> {
        if let Some(reason) = self.shared.registration_error.lock().unwrap().clone() {
            return Err(TransportError::RegistrationRejected(reason));
        }

        *self.shared.registered.lock().unwrap() = Some(service.clone());
        self.shared
            .advertising_stopped
            .store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn notify(&mut self, characteristic: Uuid, payload: &[u8]) -> bool {
        if !self.shared.notify_ok.load(Ordering::SeqCst) {
            return false;
        }

        self.notifications
            .send((characteristic, payload.to_vec()))
            .is_ok()
    }

    async fn stop_advertising(&mut self) {
        self.shared
            .advertising_stopped
            .store(true, Ordering::SeqCst);
    }

    fn events(&mut self) -> EventStream {
        let receiver = self.events.take().expect("events stream already taken");
        Box::pin(UnboundedReceiverStream::new(receiver))
    }
}

/// Test-side handle of the loopback transport, playing the remote central.
pub struct LoopbackCentral {
    events: mpsc::UnboundedSender<TransportEvent>,
    notifications: mpsc::UnboundedReceiver<(Uuid, Vec<u8>)>,
    shared: Arc<LoopbackShared>,
}

impl LoopbackCentral {
    pub fn subscribe(&self, characteristic: Uuid) {
        self.events
            .send(TransportEvent::Subscribed { characteristic })
            .ok();
    }

    pub fn unsubscribe(&self, characteristic: Uuid) {
        self.events
            .send(TransportEvent::Unsubscribed { characteristic })
            .ok();
    }

    pub fn write(&self, characteristic: Uuid, value: Vec<u8>) {
        self.events
            .send(TransportEvent::WriteRequested {
                characteristic,
                value,
            })
            .ok();
    }

    /// Issues a read request and waits for the engine's answer.
    pub async fn read(&self, characteristic: Uuid, offset: usize) -> ReadResponse {
        let (reply, response) = oneshot::channel();

        if self
            .events
            .send(TransportEvent::ReadRequested {
                characteristic,
                offset,
                reply,
            })
            .is_err()
        {
            return ReadResponse::NotFound;
        }

        response.await.unwrap_or(ReadResponse::NotFound)
    }

    /// Next payload pushed by the engine, or None once the session ended.
    pub async fn next_notification(&mut self) -> Option<(Uuid, Vec<u8>)> {
        self.notifications.recv().await
    }

    /// Makes subsequent notify calls report a full send queue.
    pub fn set_notify_success(&self, success: bool) {
        self.shared.notify_ok.store(success, Ordering::SeqCst);
    }

    /// Makes the next registration fail with the given reason.
    pub fn reject_registration(&self, reason: &str) {
        *self.shared.registration_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn registered_service(&self) -> Option<ServiceDescriptor> {
        self.shared.registered.lock().unwrap().clone()
    }

    pub fn advertising_stopped(&self) -> bool {
        self.shared.advertising_stopped.load(Ordering::SeqCst)
    }
}
