use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use stream_cancel::{Trigger, Valved};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::Sender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::config::{ConfigError, DeviceConfiguration};
use crate::encoder::{BATTERY_REFRESH_INTERVAL, DEVICE_INFO_KEY, Encoding};
use crate::randomize::randomize;
use crate::resolver;
use crate::service::{self, ServiceDescriptor};
use crate::session::SessionState;
use crate::transport::{
    EventStream, MAX_READ_CHUNK, ReadResponse, TransportAdapter, TransportError, TransportEvent,
};

/// Error returned when a session cannot be started.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Structured event published by the running engine.
///
/// Replaces a free-floating log callback: any number of observers can
/// subscribe without coupling the engine to a particular UI.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started {
        advertised_name: String,
    },
    Stopped,
    Notified {
        data_key: String,
        bytes: usize,
    },
    DispatchFailed {
        data_key: String,
    },
    EncodeFailed {
        data_key: String,
        reason: String,
    },
    Subscribed {
        characteristic: Uuid,
        subscribers: usize,
    },
    Unsubscribed {
        characteristic: Uuid,
        subscribers: usize,
    },
    WriteAccepted {
        characteristic: Uuid,
        bytes: usize,
    },
}

/// Simulated BLE peripheral.
///
/// Owns at most one advertising session at a time. All per-session state
/// lives inside a spawned task that ticks and transport events feed into,
/// so they can never race each other.
pub struct Simulator {
    session: Option<SessionHandle>,
    event_sender: Sender<EngineEvent>,
}

struct SessionHandle {
    /// Dropping this cancels the session task's event stream.
    stopper: Trigger,
    task: JoinHandle<()>,
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(64);

        Self {
            session: None,
            event_sender,
        }
    }

    /// Start advertising the configured device.
    ///
    /// If a session is already running it is stopped first and its
    /// completion acknowledged before the new service is registered, so a
    /// configuration change never races the previous session.
    pub async fn start<T: TransportAdapter>(
        &mut self,
        config: DeviceConfiguration,
        mut adapter: T,
    ) -> Result<(), Error> {
        if self.session.is_some() {
            log::info!("Simulator is already started, restarting");
            self.stop().await;
        }

        config.validate()?;
        let service = ServiceDescriptor::from_config(&config)?;

        adapter.register_service(&service).await?;

        let mut state = SessionState::new();
        for characteristic in &service.characteristics {
            if characteristic.data_key == DEVICE_INFO_KEY {
                state.store_payload(characteristic.uuid, service::device_info_payload(&config));
                log::debug!("Preloaded device info for '{}'", characteristic.name);
            }
        }

        let interval = Duration::from_secs_f64(config.data_config.update_interval_seconds);
        let (stopper, events) = Valved::new(adapter.events());

        log::info!(
            "Started advertising '{}' ({}s update interval)",
            service.advertised_name,
            config.data_config.update_interval_seconds
        );
        self.event_sender
            .send(EngineEvent::Started {
                advertised_name: service.advertised_name.clone(),
            })
            .ok();

        let ctx = SessionContext {
            adapter,
            config,
            service,
            state,
            interval,
            rng: StdRng::from_entropy(),
            event_sender: self.event_sender.clone(),
        };

        let task = tokio::spawn(async move {
            ctx.run(events).await;
        });

        self.session = Some(SessionHandle { stopper, task });

        Ok(())
    }

    /// Stop advertising.
    ///
    /// Returns only once any in-flight tick has finished, the timer is
    /// guaranteed not to fire again and the transport has been told to
    /// stop advertising. Calling this on an idle simulator is a no-op.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.session.take() {
            drop(handle.stopper);
            handle.task.await.ok();
        } else {
            log::info!("Simulator is already stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Create a new stream that receives engine events.
    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = EngineEvent> + Send>> {
        let receiver = self.event_sender.subscribe();

        Box::pin(BroadcastStream::new(receiver).filter_map(|event| async move { event.ok() }))
    }
}

/// Per-session state and collaborators, owned by the session task.
struct SessionContext<T: TransportAdapter> {
    adapter: T,
    config: DeviceConfiguration,
    service: ServiceDescriptor,
    state: SessionState,
    interval: Duration,
    rng: StdRng,
    event_sender: Sender<EngineEvent>,
}

impl<T: TransportAdapter> SessionContext<T> {
    async fn run(mut self, mut events: Valved<EventStream>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        // A tick still executing when the next is due defers it instead
        // of running two ticks back to back.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_tick().await,
                event = events.next() => match event {
                    Some(event) => self.handle_event(event),
                    // Stop trigger dropped, or the transport went away.
                    None => break,
                },
            }
        }

        self.adapter.stop_advertising().await;

        log::info!("Stopped advertising and data updates");
        self.event_sender.send(EngineEvent::Stopped).ok();
    }

    /// One update pass across all configured characteristics.
    async fn run_tick(&mut self) {
        let Self {
            adapter,
            config,
            service,
            state,
            rng,
            event_sender,
            ..
        } = self;

        for characteristic in &service.characteristics {
            let data_key = characteristic.data_key.as_str();

            // A data key without a configured stream is a silent skip.
            let Some(stream) = config.data_streams.get(data_key) else {
                continue;
            };

            // Gate rate-limited streams before resolution so a deferred
            // dispatch does not advance the cursor.
            if characteristic.encoding == Encoding::RateLimited
                && !state.dispatch_due(data_key, BATTERY_REFRESH_INTERVAL)
            {
                continue;
            }

            let cursor = state.cursor(data_key);
            let (mut record, next_cursor) =
                resolver::resolve(&stream.data, cursor, config.data_config.auto_cycle);
            state.set_cursor(data_key, next_cursor);

            if config.data_config.randomize_values {
                randomize(&mut record, config.data_config.randomize_range, rng);
            }

            let payload = match characteristic.encoding.encode(&record) {
                Ok(payload) => payload,
                Err(err) => {
                    log::warn!("Failed to encode {} update: {}", data_key, err);
                    event_sender
                        .send(EngineEvent::EncodeFailed {
                            data_key: data_key.to_string(),
                            reason: err.to_string(),
                        })
                        .ok();
                    continue;
                }
            };

            state.store_payload(characteristic.uuid, payload.clone());

            if characteristic.encoding == Encoding::RateLimited {
                state.mark_dispatched(data_key);
            }

            if adapter.notify(characteristic.uuid, &payload).await {
                log::debug!("Sent {} update ({} bytes)", data_key, payload.len());
                event_sender
                    .send(EngineEvent::Notified {
                        data_key: data_key.to_string(),
                        bytes: payload.len(),
                    })
                    .ok();
            } else {
                log::warn!("Failed to send {} update, send queue may be full", data_key);
                event_sender
                    .send(EngineEvent::DispatchFailed {
                        data_key: data_key.to_string(),
                    })
                    .ok();
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Subscribed { characteristic } => {
                let subscribers = self.state.subscriber_added();
                log::info!(
                    "Central subscribed to '{}' ({} subscribers)",
                    self.characteristic_name(characteristic),
                    subscribers
                );
                self.event_sender
                    .send(EngineEvent::Subscribed {
                        characteristic,
                        subscribers,
                    })
                    .ok();
            }
            TransportEvent::Unsubscribed { characteristic } => {
                let subscribers = self.state.subscriber_removed();
                log::info!(
                    "Central unsubscribed from '{}' ({} subscribers)",
                    self.characteristic_name(characteristic),
                    subscribers
                );
                self.event_sender
                    .send(EngineEvent::Unsubscribed {
                        characteristic,
                        subscribers,
                    })
                    .ok();
            }
            TransportEvent::ReadRequested {
                characteristic,
                offset,
                reply,
            } => {
                log::debug!(
                    "Received read request for '{}' at offset {}",
                    self.characteristic_name(characteristic),
                    offset
                );
                reply.send(self.answer_read(characteristic, offset)).ok();
            }
            TransportEvent::WriteRequested {
                characteristic,
                value,
            } => {
                log::info!(
                    "Received write request for '{}' with {} bytes",
                    self.characteristic_name(characteristic),
                    value.len()
                );
                self.event_sender
                    .send(EngineEvent::WriteAccepted {
                        characteristic,
                        bytes: value.len(),
                    })
                    .ok();
            }
        }
    }

    /// Answers a read request from the last stored payload, sliced at the
    /// requested offset and capped at the maximum chunk size.
    fn answer_read(&self, characteristic: Uuid, offset: usize) -> ReadResponse {
        if self.service.characteristic_by_uuid(characteristic).is_none() {
            return ReadResponse::NotFound;
        }

        match self.state.payload(characteristic) {
            Some(payload) => {
                if offset > payload.len() {
                    ReadResponse::InvalidOffset
                } else {
                    let end = payload.len().min(offset + MAX_READ_CHUNK);
                    ReadResponse::Value(payload[offset..end].to_vec())
                }
            }
            None => ReadResponse::NotFound,
        }
    }

    fn characteristic_name(&self, characteristic: Uuid) -> &str {
        self.service
            .characteristic_by_uuid(characteristic)
            .map(|descriptor| descriptor.name.as_str())
            .unwrap_or("Unknown")
    }
}
