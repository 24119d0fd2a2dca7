//! Session state machine for one micro:bit connection.
//!
//! A single tokio task owns the transport handles and every state
//! transition. [`SessionHandle`] is the cheap, cloneable front end: each
//! command is queued to the task, which accepts or rejects it and then
//! carries it out, publishing progress through [`ObservableState`].
//!
//! Long operations (the connect pipeline, a period write and read-back) are
//! polled inside the task while it keeps draining the command queue, so a
//! `cancel` interrupts them at the next await instead of waiting behind them.

use futures::stream::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{
    CharacteristicHandle, ConnectionHandle, DeviceId, NotificationEvent, NotificationStream,
    ServiceHandle, Transport,
};
use crate::ble::uuids::{
    TEMPERATURE_CHARACTERISTIC_UUID, TEMPERATURE_PERIOD_CHARACTERISTIC_UUID,
    TEMPERATURE_SERVICE_UUID,
};
use crate::callback::CallbackHandle;
use crate::config::SessionConfig;
use crate::data::{decode_period, decode_temperature, encode_period, PeriodSetting};
use crate::error::{Error, Result};
use crate::state::{ObservableState, SessionState, StatePublisher, TemperatureUpdate};
use crate::utils::is_microbit_name;

/// Commands accepted by the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    Cancel,
    WritePeriod(u32),
    RefreshPeriod,
    Shutdown,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Cancel => "cancel",
            Self::WritePeriod(_) => "write the temperature period",
            Self::RefreshPeriod => "refresh the temperature period",
            Self::Shutdown => "shut down",
        }
    }
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<()>>,
}

impl Request {
    fn accept(self) -> Command {
        let _ = self.reply.send(Ok(()));
        self.command
    }

    fn reject(self, state: SessionState) {
        debug!("Rejecting {:?} while {}", self.command, state);
        let _ = self.reply.send(Err(Error::InvalidState {
            operation: self.command.name(),
            state: state.to_string(),
        }));
    }
}

/// Everything the session owns while a micro:bit is ready.
struct Link {
    name: String,
    connection: ConnectionHandle,
    temperature: CharacteristicHandle,
    period: CharacteristicHandle,
    notifications: NotificationStream,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("device", &self.connection.device)
            .finish()
    }
}

/// Front end of a running session.
///
/// Clones share the same session. The session task stops after
/// [`shutdown`](Self::shutdown) or once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Request>,
    publisher: Arc<StatePublisher>,
    callback_counter: Arc<AtomicU64>,
}

impl SessionHandle {
    /// Start a session task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `config` does not validate.
    pub fn spawn(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let (commands, requests) = mpsc::channel(config.command_buffer);
        let publisher = Arc::new(StatePublisher::new(config.notification_buffer));

        let actor = SessionActor {
            transport,
            config,
            publisher: publisher.clone(),
            requests,
            deferred: VecDeque::new(),
            link: None,
            closed: false,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands,
            publisher,
            callback_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start a session on the platform Bluetooth stack.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] if there is no adapter.
    pub async fn with_btleplug(config: SessionConfig) -> Result<Self> {
        let transport = crate::ble::BtleplugTransport::new().await?;
        Self::spawn(Arc::new(transport), config)
    }

    /// Watch the observable state.
    pub fn state(&self) -> watch::Receiver<ObservableState> {
        self.publisher.subscribe()
    }

    /// Get a copy of the current observable state.
    pub fn snapshot(&self) -> ObservableState {
        self.publisher.snapshot()
    }

    /// Subscribe to every temperature reading, in arrival order.
    pub fn subscribe_temperatures(&self) -> broadcast::Receiver<TemperatureUpdate> {
        self.publisher.subscribe_temperatures()
    }

    /// Register a callback for temperature readings.
    pub fn on_temperature_updated<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&TemperatureUpdate) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.publisher.subscribe_temperatures();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => callback(&update),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Temperature callback lagged, skipped {} readings", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for observable state changes.
    pub fn on_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&ObservableState) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.publisher.subscribe();

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                callback(&state);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Scan for a micro:bit and connect to the first one found.
    ///
    /// Returns once the command is accepted; progress and the final outcome
    /// are published in the observable state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is idle.
    pub async fn connect(&self) -> Result<()> {
        self.request(Command::Connect).await
    }

    /// Disconnect from the ready micro:bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is ready.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// Abandon whatever the session is doing and return to idle.
    ///
    /// Safe to call in any state; calling it while idle does nothing.
    pub async fn cancel(&self) -> Result<()> {
        self.request(Command::Cancel).await
    }

    /// Write a new notification period, then read it back.
    ///
    /// Only the low 16 bits of `period_ms` are sent. Failures are reported
    /// through `last_error` and leave the session ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is ready.
    pub async fn write_temperature_period(&self, period_ms: u32) -> Result<()> {
        self.request(Command::WritePeriod(period_ms)).await
    }

    /// Re-read the notification period from the micro:bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is ready.
    pub async fn refresh_period(&self) -> Result<()> {
        self.request(Command::RefreshPeriod).await
    }

    /// Cancel everything and stop the session task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    async fn request(&self, command: Command) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.publisher.session())
            .finish()
    }
}

/// What woke the idle/ready loop.
enum Step {
    Request(Request),
    Notification(Option<NotificationEvent>),
    Closed,
}

struct SessionActor {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    publisher: Arc<StatePublisher>,
    requests: mpsc::Receiver<Request>,
    /// Requests that arrived during an operation and run after it.
    deferred: VecDeque<Request>,
    link: Option<Link>,
    closed: bool,
}

impl SessionActor {
    async fn run(mut self) {
        debug!("Session task started");

        while !self.closed {
            let step = match self.deferred.pop_front() {
                Some(request) => Step::Request(request),
                None => tokio::select! {
                    request = self.requests.recv() => match request {
                        Some(request) => Step::Request(request),
                        None => Step::Closed,
                    },
                    notification = next_notification(&mut self.link) => Step::Notification(notification),
                },
            };

            match step {
                Step::Request(request) => self.dispatch(request).await,
                Step::Notification(Some(event)) => self.handle_notification(event),
                Step::Notification(None) => self.handle_link_lost().await,
                Step::Closed => {
                    debug!("All session handles dropped");
                    self.closed = true;
                }
            }
        }

        self.cancel_session().await;
        debug!("Session task stopped");
    }

    async fn dispatch(&mut self, request: Request) {
        let state = self.publisher.session();

        match request.command {
            Command::Connect if !state.is_idle() => request.reject(state),
            Command::Connect => {
                request.accept();
                self.run_connect().await;
            }
            Command::Disconnect if !state.is_ready() => request.reject(state),
            Command::Disconnect => {
                request.accept();
                self.disconnect_link().await;
            }
            Command::Cancel => {
                request.accept();
                self.cancel_session().await;
            }
            Command::WritePeriod(_) | Command::RefreshPeriod if !state.is_ready() => {
                request.reject(state)
            }
            Command::WritePeriod(value) => {
                request.accept();
                self.period_round_trip(Some(value)).await;
            }
            Command::RefreshPeriod => {
                request.accept();
                self.period_round_trip(None).await;
            }
            Command::Shutdown => {
                request.accept();
                info!("Shutting down session");
                self.closed = true;
            }
        }
    }

    /// Drive `operation` to completion while still receiving commands.
    ///
    /// Commands that tear the session down cancel `token`; anything that is
    /// still meaningful afterwards is queued to run once `operation` ends.
    async fn supervise<T>(
        &mut self,
        token: &CancellationToken,
        operation: impl Future<Output = T>,
    ) -> T {
        tokio::pin!(operation);

        loop {
            tokio::select! {
                output = &mut operation => return output,
                request = self.requests.recv(), if !self.closed => match request {
                    Some(request) => self.intercept(request, token),
                    None => {
                        debug!("All session handles dropped, cancelling operation");
                        self.closed = true;
                        token.cancel();
                    }
                },
            }
        }
    }

    fn intercept(&mut self, request: Request, token: &CancellationToken) {
        let state = self.publisher.session();

        match request.command {
            Command::Cancel | Command::Shutdown => {
                debug!("{:?} interrupts the operation in progress", request.command);
                token.cancel();
                self.deferred.push_back(request);
            }
            Command::Disconnect if state.is_ready() => {
                token.cancel();
                self.deferred.push_back(request);
            }
            Command::WritePeriod(_) | Command::RefreshPeriod if state.is_ready() => {
                self.deferred.push_back(request);
            }
            _ => request.reject(state),
        }
    }

    async fn run_connect(&mut self) {
        info!("Scanning for micro:bit");
        self.publisher.begin_scan();

        let token = CancellationToken::new();
        let establish = establish(
            self.transport.clone(),
            self.publisher.clone(),
            self.config.clone(),
            token.clone(),
        );

        match self.supervise(&token, establish).await {
            Ok(link) => {
                info!("Ready: {} ({})", link.name, link.connection.device);
                self.publisher.ready(link.name.clone());
                self.link = Some(link);
            }
            Err(e) if e.is_cancellation() => {
                debug!("Connect cancelled");
                self.publisher.clear();
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.publisher.fail(e.to_string());
            }
        }
    }

    /// Optionally write the period, then read it back and publish it.
    async fn period_round_trip(&mut self, value: Option<u32>) {
        let (connection, characteristic) = match self.link.as_ref() {
            Some(link) => (link.connection.clone(), link.period.clone()),
            None => return,
        };

        let token = CancellationToken::new();
        let transport = self.transport.clone();
        let limit = self.config.operation_timeout;
        let op_token = token.clone();

        let operation = async move {
            if let Some(value) = value {
                let bytes = encode_period(value);
                debug!("Writing temperature period {:02X?}", bytes);
                guarded(
                    &op_token,
                    limit,
                    "period write",
                    transport.write(&connection, &characteristic, &bytes),
                )
                .await?;
            }
            let data = guarded(
                &op_token,
                limit,
                "period read",
                transport.read(&connection, &characteristic),
            )
            .await?;
            decode_period(&data)
        };

        match self.supervise(&token, operation).await {
            Ok(period) => {
                info!("micro:bit temperature period: {}", period);
                self.publisher.set_period(period);
            }
            Err(e) if e.is_cancellation() => debug!("Period update cancelled"),
            Err(e) => {
                warn!("Period update failed: {}", e);
                self.publisher.set_error(e.to_string());
            }
        }
    }

    fn handle_notification(&mut self, event: NotificationEvent) {
        trace!("Notification: {:02X?}", event.data);

        if event.characteristic_uuid != TEMPERATURE_CHARACTERISTIC_UUID {
            trace!(
                "Ignoring notification from {}: {:02X?}",
                event.characteristic_uuid,
                event.data
            );
            return;
        }

        match decode_temperature(&event.data) {
            Ok(temperature) => {
                debug!("micro:bit temperature: {}", temperature);
                self.publisher.record_temperature(temperature);
            }
            Err(e) => warn!("Dropping temperature notification: {}", e),
        }
    }

    async fn handle_link_lost(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        warn!("Connection to {} lost", link.name);
        self.publisher.fail(Error::ConnectionLost.to_string());
        release(self.transport.as_ref(), link, self.config.operation_timeout).await;
    }

    async fn disconnect_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        info!("Disconnecting from {}", link.name);
        self.publisher.begin_disconnect();
        release(self.transport.as_ref(), link, self.config.operation_timeout).await;
        self.publisher.clear();
        info!("Disconnected");
    }

    async fn cancel_session(&mut self) {
        let link = self.link.take();
        let was_scanning = self.publisher.snapshot().is_scanning;
        self.publisher.clear();

        if let Some(link) = link {
            info!("Cancelling session with {}", link.name);
            release(self.transport.as_ref(), link, self.config.operation_timeout).await;
        }

        if was_scanning {
            stop_scan(self.transport.as_ref(), self.config.operation_timeout).await;
        }
    }
}

/// Best-effort teardown of a link. Failures are logged, never surfaced.
///
/// Callers clear the published state first, so observers never wait on this.
async fn release(transport: &dyn Transport, link: Link, limit: Duration) {
    let Link {
        connection,
        temperature,
        notifications,
        ..
    } = link;
    drop(notifications);

    match tokio::time::timeout(limit, transport.unsubscribe(&connection, &temperature)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Unsubscribe failed: {}", e),
        Err(_) => debug!("Unsubscribe timed out"),
    }

    cancel_connection(transport, &connection.device, limit).await;
}

/// Wait for the next notification of the current link, or forever without one.
async fn next_notification(link: &mut Option<Link>) -> Option<NotificationEvent> {
    match link {
        Some(link) => link.notifications.next().await,
        None => futures::future::pending().await,
    }
}

/// Await a transport call, bounded by `limit` and aborted by `token`.
async fn guarded<T>(
    token: &CancellationToken,
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::OperationCancelled),
        result = tokio::time::timeout(limit, call) => match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout { operation }),
        },
    }
}

async fn stop_scan(transport: &dyn Transport, limit: Duration) {
    match tokio::time::timeout(limit, transport.stop_scan()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to stop scan: {}", e),
        Err(_) => warn!("Stopping the scan timed out"),
    }
}

async fn cancel_connection(transport: &dyn Transport, device: &DeviceId, limit: Duration) {
    match tokio::time::timeout(limit, transport.cancel_connection(device)).await {
        Ok(Ok(())) => debug!("Cancelled connection to {}", device),
        Ok(Err(e)) => warn!("Failed to cancel connection to {}: {}", device, e),
        Err(_) => warn!("Cancelling connection to {} timed out", device),
    }
}

/// Scan, pick the first micro:bit that completes setup, and hand back its link.
async fn establish(
    transport: Arc<dyn Transport>,
    publisher: Arc<StatePublisher>,
    config: SessionConfig,
    token: CancellationToken,
) -> Result<Link> {
    let result = scan_for_link(transport.as_ref(), &publisher, &config, &token).await;

    if result.is_err() && publisher.snapshot().is_scanning {
        stop_scan(transport.as_ref(), config.operation_timeout).await;
    }

    result
}

async fn scan_for_link(
    transport: &dyn Transport,
    publisher: &StatePublisher,
    config: &SessionConfig,
    token: &CancellationToken,
) -> Result<Link> {
    let ready = guarded(
        token,
        config.ready_timeout,
        "adapter",
        transport.wait_until_ready(),
    )
    .await;
    if let Err(e) = ready {
        // No scan was started, so there is nothing to stop.
        publisher.set_scanning(false);
        return Err(match e {
            Error::Timeout { .. } => Error::TransportUnavailable,
            other => other,
        });
    }

    let mut last_error = None;

    loop {
        publisher.transition(SessionState::Scanning);
        publisher.set_scanning(true);

        let mut advertisements =
            guarded(token, config.operation_timeout, "scan", transport.scan()).await?;

        let (device, name) = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::OperationCancelled),
                next = advertisements.next() => next,
            };

            let Some(advertisement) = next else {
                debug!("Scan stream ended");
                return Err(last_error.unwrap_or(Error::ScanEnded));
            };

            match advertisement.name {
                Some(name) if is_microbit_name(&name) => break (advertisement.id, name),
                name => trace!("Ignoring {} ({:?})", advertisement.id, name),
            }
        };

        info!("Found {} ({})", name, device);
        drop(advertisements);
        stop_scan(transport, config.operation_timeout).await;
        publisher.set_scanning(false);

        match attempt(transport, publisher, config, token, &device).await {
            Ok((connection, temperature, period, notifications)) => {
                return Ok(Link {
                    name,
                    connection,
                    temperature,
                    period,
                    notifications,
                });
            }
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!("{} ({}) failed: {}; resuming scan", name, device, e);
                publisher.update(|state| {
                    state.period = None;
                    state.temperature = None;
                });
                last_error = Some(e);
            }
        }
    }
}

type LinkParts = (
    ConnectionHandle,
    CharacteristicHandle,
    CharacteristicHandle,
    NotificationStream,
);

/// Try one candidate, cancelling its connection on any failure.
async fn attempt(
    transport: &dyn Transport,
    publisher: &StatePublisher,
    config: &SessionConfig,
    token: &CancellationToken,
    device: &DeviceId,
) -> Result<LinkParts> {
    publisher.transition(SessionState::Connecting);

    let result = open_link(transport, publisher, config, token, device).await;

    if result.is_err() {
        debug!("Cancelling connection attempt to {}", device);
        cancel_connection(transport, device, config.operation_timeout).await;
    }

    result
}

async fn open_link(
    transport: &dyn Transport,
    publisher: &StatePublisher,
    config: &SessionConfig,
    token: &CancellationToken,
    device: &DeviceId,
) -> Result<LinkParts> {
    let limit = config.operation_timeout;

    let connection = guarded(
        token,
        config.connect_timeout,
        "connect",
        transport.connect(device),
    )
    .await?;
    info!("Connected to {}", device);

    publisher.transition(SessionState::DiscoveringServices);
    let service = guarded(
        token,
        limit,
        "service discovery",
        transport.discover_services(&connection, &[TEMPERATURE_SERVICE_UUID]),
    )
    .await?
    .into_iter()
    .find(|service| service.uuid == TEMPERATURE_SERVICE_UUID)
    .ok_or_else(|| Error::ServiceNotFound {
        uuid: TEMPERATURE_SERVICE_UUID.to_string(),
    })?;
    debug!("Discovered service {}", service.uuid);

    publisher.transition(SessionState::DiscoveringCharacteristics);
    let temperature = find_characteristic(
        transport,
        token,
        limit,
        &connection,
        &service,
        TEMPERATURE_CHARACTERISTIC_UUID,
    )
    .await?;
    let period = find_characteristic(
        transport,
        token,
        limit,
        &connection,
        &service,
        TEMPERATURE_PERIOD_CHARACTERISTIC_UUID,
    )
    .await?;
    debug!("Discovered temperature and period characteristics");

    let data = guarded(
        token,
        limit,
        "period read",
        transport.read(&connection, &period),
    )
    .await?;
    let value: PeriodSetting = decode_period(&data)?;
    info!("micro:bit temperature period: {}", value);
    publisher.set_period(value);

    publisher.transition(SessionState::SubscribingNotifications);
    let notifications = guarded(
        token,
        limit,
        "subscribe",
        transport.subscribe(&connection, &temperature),
    )
    .await?;
    debug!("Subscribed to temperature notifications");

    if config.read_initial_temperature {
        let data = guarded(
            token,
            limit,
            "temperature read",
            transport.read(&connection, &temperature),
        )
        .await?;
        match decode_temperature(&data) {
            Ok(reading) => publisher.record_temperature(reading),
            Err(e) => warn!("Ignoring initial temperature: {}", e),
        }
    }

    Ok((connection, temperature, period, notifications))
}

async fn find_characteristic(
    transport: &dyn Transport,
    token: &CancellationToken,
    limit: Duration,
    connection: &ConnectionHandle,
    service: &ServiceHandle,
    uuid: Uuid,
) -> Result<CharacteristicHandle> {
    guarded(
        token,
        limit,
        "characteristic discovery",
        transport.discover_characteristics(connection, service, &[uuid]),
    )
    .await?
    .into_iter()
    .find(|characteristic| characteristic.uuid == uuid)
    .ok_or_else(|| Error::CharacteristicNotFound {
        uuid: uuid.to_string(),
    })
}
