// ── Engine ──
//
// The event loop owning the StateStore and WriteCoordinator. Backend calls
// run one at a time on a worker task; their results come back to the loop
// before touching the store. Consumers talk to the loop through `Command`s
// and observe it through the store handle.

use std::collections::{BTreeMap, HashSet};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use ddcsync_api::{BackendEvent, Reading};

use crate::command::{Command, CommandEnvelope, CommandResult, Responder};
use crate::config::EngineConfig;
use crate::connector::{BackendKind, ServiceConnector, ServiceInfo};
use crate::error::CoreError;
use crate::model::{Edid, FeatureDefinition, MonitorDescriptor, MonitorState};
use crate::store::{
    DetectionOutcome, RefreshKind, StateStore, StoreEvent, StoreHandle, fetch_detection,
    fetch_values,
};
use crate::stream::{MonitorSnapshot, MonitorStream};
use crate::writer::{
    WriteCoordinator, accept_value, needs_write, reset_target, validate_request,
};

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── Engine ───────────────────────────────────────────────────────────

/// Handle to a running engine. Cheaply cloneable.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    connector: Arc<ServiceConnector>,
    store: StoreHandle,
    command_tx: mpsc::Sender<CommandEnvelope>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Bind a backend, start the loop and wait for the first detection.
    pub async fn start(config: EngineConfig) -> Result<Self, CoreError> {
        let cancel = CancellationToken::new();
        let connector = ServiceConnector::connect(&config, &cancel).await?;
        let (tx, rx) = oneshot::channel();
        let engine = Self::launch(connector, config, cancel, Some(tx));

        match rx.await {
            Ok(Ok(_)) => Ok(engine),
            Ok(Err(e)) => {
                engine.shutdown().await;
                Err(e)
            }
            Err(_) => Err(CoreError::EngineStopped),
        }
    }

    /// Start the loop on an already bound connector. The first detection
    /// runs in the background. Must be called inside a tokio runtime.
    pub fn spawn(connector: ServiceConnector, config: EngineConfig) -> Self {
        Self::launch(connector, config, CancellationToken::new(), None)
    }

    fn launch(
        connector: ServiceConnector,
        config: EngineConfig,
        cancel: CancellationToken,
        initial: Option<Responder>,
    ) -> Self {
        let connector = Arc::new(connector);
        let store = StateStore::new();
        let handle = store.handle();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let backend_events = connector.subscribe();

        let mut event_loop = EngineLoop::new(store, Arc::clone(&connector), &config, job_tx);
        event_loop.request_full_refresh(initial);

        let worker = tokio::spawn(worker_task(
            Arc::clone(&connector),
            job_rx,
            done_tx,
            cancel.clone(),
        ));
        let main = tokio::spawn(event_loop.run(
            command_rx,
            backend_events,
            done_rx,
            refresh_interval(config.refresh_interval_secs),
            cancel.clone(),
        ));

        Self {
            inner: Arc::new(EngineInner {
                config,
                connector,
                store: handle,
                command_tx,
                cancel,
                task_handles: Mutex::new(vec![main, worker]),
            }),
        }
    }

    /// Stop every task and the backend signal listener.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.connector.shutdown();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("engine stopped");
    }

    /// Start, run `f`, shut down. For one-shot callers; no periodic refresh.
    pub async fn oneshot<F, Fut, T>(config: EngineConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Engine) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.refresh_interval_secs = 0;

        let engine = Engine::start(cfg).await?;
        let result = f(engine.clone()).await;
        engine.shutdown().await;
        result
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn execute(&self, command: Command) -> Result<CommandResult, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::EngineStopped);
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::EngineStopped)?;
        rx.await.map_err(|_| CoreError::EngineStopped)?
    }

    /// Debounced write (slider drags).
    pub async fn request_value(&self, edid: &Edid, code: u8, value: u16) -> Result<(), CoreError> {
        self.execute(Command::RequestValue {
            edid: edid.clone(),
            code,
            value,
        })
        .await
        .map(|_| ())
    }

    /// Immediate write; resolves once the backend acknowledged it.
    pub async fn write_value(&self, edid: &Edid, code: u8, value: u16) -> Result<(), CoreError> {
        self.execute(Command::WriteValue {
            edid: edid.clone(),
            code,
            value,
        })
        .await
        .map(|_| ())
    }

    /// Reset to default. Returns the value written.
    pub async fn reset_feature(&self, edid: &Edid, code: u8) -> Result<u16, CoreError> {
        let result = self
            .execute(Command::ResetFeature {
                edid: edid.clone(),
                code,
            })
            .await?;
        result
            .value()
            .ok_or_else(|| CoreError::Internal("reset returned no value".into()))
    }

    pub async fn rescan(&self) -> Result<(), CoreError> {
        self.execute(Command::Rescan).await.map(|_| ())
    }

    pub async fn light_refresh(&self) -> Result<(), CoreError> {
        self.execute(Command::LightRefresh).await.map(|_| ())
    }

    pub async fn refresh_values(&self, edid: &Edid) -> Result<(), CoreError> {
        self.execute(Command::RefreshValues { edid: edid.clone() })
            .await
            .map(|_| ())
    }

    /// The monitor's unparsed MCCS capabilities string.
    pub async fn capabilities_string(&self, edid: &Edid) -> Result<String, CoreError> {
        match self
            .execute(Command::CapabilitiesString { edid: edid.clone() })
            .await?
        {
            CommandResult::Text(text) => Ok(text),
            other => Err(unexpected(&other)),
        }
    }

    /// What the backend reports about one code, layered over the catalog.
    pub async fn feature_metadata(
        &self,
        edid: &Edid,
        code: u8,
    ) -> Result<FeatureDefinition, CoreError> {
        match self
            .execute(Command::FeatureMetadata {
                edid: edid.clone(),
                code,
            })
            .await?
        {
            CommandResult::Definition(def) => Ok(*def),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn sleep_multiplier(&self, edid: &Edid) -> Result<f64, CoreError> {
        match self
            .execute(Command::SleepMultiplier { edid: edid.clone() })
            .await?
        {
            CommandResult::Multiplier(m) => Ok(m),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn set_sleep_multiplier(&self, edid: &Edid, multiplier: f64) -> Result<(), CoreError> {
        self.execute(Command::SetSleepMultiplier {
            edid: edid.clone(),
            multiplier,
        })
        .await
        .map(|_| ())
    }

    pub async fn restart_service(&self, options: &str, syslog_level: u32) -> Result<(), CoreError> {
        self.execute(Command::RestartService {
            options: options.to_owned(),
            syslog_level,
        })
        .await
        .map(|_| ())
    }

    pub async fn service_info(&self) -> Result<ServiceInfo, CoreError> {
        match self.execute(Command::ServiceInfo).await? {
            CommandResult::Service(info) => Ok(*info),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn set_options(&self, raw_values: bool, skip_verify: bool) -> Result<(), CoreError> {
        self.execute(Command::SetOptions {
            raw_values,
            skip_verify,
        })
        .await
        .map(|_| ())
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.connector.kind()
    }

    pub fn connector(&self) -> &Arc<ServiceConnector> {
        &self.inner.connector
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.inner.store.snapshot()
    }

    pub fn monitor(&self, edid: &str) -> Option<Arc<MonitorState>> {
        self.inner.store.monitor(edid)
    }

    pub fn monitors(&self) -> MonitorStream {
        self.inner.store.subscribe_monitors()
    }

    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.store.subscribe_events()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connector", &self.inner.connector)
            .field("store", &self.inner.store)
            .field("stopped", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

fn unexpected(result: &CommandResult) -> CoreError {
    CoreError::Internal(format!("unexpected command result {result:?}"))
}

fn refresh_interval(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

// ── Worker ───────────────────────────────────────────────────────────

/// Backend work, executed strictly in submission order.
enum Job {
    Detect {
        settled: HashSet<Edid>,
    },
    List {
        responder: Option<Responder>,
    },
    ReadValues {
        descriptor: Arc<MonitorDescriptor>,
        codes: Vec<u8>,
        responder: Option<Responder>,
    },
    Write {
        descriptor: Arc<MonitorDescriptor>,
        code: u8,
        value: u16,
        context: String,
        responder: Option<Responder>,
        reply_value: bool,
    },
    Query {
        query: Query,
        responder: Responder,
    },
}

/// Backend calls that answer a caller without touching the store.
#[derive(Debug)]
enum Query {
    CapabilitiesString(Arc<MonitorDescriptor>),
    FeatureMetadata(Arc<MonitorDescriptor>, u8),
    SleepMultiplier(Arc<MonitorDescriptor>),
    SetSleepMultiplier(Arc<MonitorDescriptor>, f64),
    Restart { options: String, syslog_level: u32 },
    ServiceInfo,
}

impl Query {
    async fn run(self, connector: &ServiceConnector) -> Result<CommandResult, CoreError> {
        match self {
            Self::CapabilitiesString(descriptor) => connector
                .capabilities_string(&descriptor)
                .await
                .map(CommandResult::Text),
            Self::FeatureMetadata(descriptor, code) => connector
                .feature_metadata(&descriptor, code)
                .await
                .map(|def| CommandResult::Definition(Box::new(def))),
            Self::SleepMultiplier(descriptor) => connector
                .sleep_multiplier(&descriptor)
                .await
                .map(CommandResult::Multiplier),
            Self::SetSleepMultiplier(descriptor, multiplier) => connector
                .set_sleep_multiplier(&descriptor, multiplier)
                .await
                .map(|()| CommandResult::Ok),
            Self::Restart {
                options,
                syslog_level,
            } => connector
                .restart(&options, syslog_level)
                .await
                .map(|()| CommandResult::Ok),
            Self::ServiceInfo => connector
                .service_info()
                .await
                .map(|info| CommandResult::Service(Box::new(info))),
        }
    }
}

enum Completion {
    Detected(Result<DetectionOutcome, CoreError>),
    Listed {
        result: Result<Vec<MonitorDescriptor>, CoreError>,
        responder: Option<Responder>,
    },
    Values {
        edid: Edid,
        result: Result<BTreeMap<u8, Reading>, CoreError>,
        responder: Option<Responder>,
    },
    Written {
        edid: Edid,
        code: u8,
        value: u16,
        result: Result<(), CoreError>,
        responder: Option<Responder>,
        reply_value: bool,
    },
    Answered {
        result: Result<CommandResult, CoreError>,
        responder: Responder,
    },
}

async fn worker_task(
    connector: Arc<ServiceConnector>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    done: mpsc::UnboundedSender<Completion>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = jobs.recv() => {
                let Some(job) = job else { break };
                let completion = run_job(&connector, job).await;
                if done.send(completion).is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_job(connector: &ServiceConnector, job: Job) -> Completion {
    match job {
        Job::Detect { settled } => Completion::Detected(fetch_detection(connector, &settled).await),
        Job::List { responder } => Completion::Listed {
            result: connector.list_detected().await,
            responder,
        },
        Job::ReadValues {
            descriptor,
            codes,
            responder,
        } => Completion::Values {
            edid: descriptor.edid.clone(),
            result: fetch_values(connector, &descriptor, &codes).await,
            responder,
        },
        Job::Write {
            descriptor,
            code,
            value,
            context,
            responder,
            reply_value,
        } => Completion::Written {
            edid: descriptor.edid.clone(),
            code,
            value,
            result: connector.set_value(&descriptor, code, value, &context).await,
            responder,
            reply_value,
        },
        Job::Query { query, responder } => Completion::Answered {
            result: query.run(connector).await,
            responder,
        },
    }
}

// ── Event loop ───────────────────────────────────────────────────────

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    /// A follow-up run was requested while one was in flight.
    queued: bool,
    waiters: Vec<Responder>,
    queued_waiters: Vec<Responder>,
    /// Pushes held back until the in-flight detection is applied.
    deferred: Vec<DeferredPush>,
}

struct DeferredPush {
    edid: String,
    code: u8,
    value: u16,
    source_context: String,
}

struct EngineLoop {
    store: StateStore,
    writer: WriteCoordinator,
    connector: Arc<ServiceConnector>,
    jobs: mpsc::UnboundedSender<Job>,
    client_context: String,
    revert_failed_writes: bool,
    refresh: RefreshState,
}

impl EngineLoop {
    fn new(
        store: StateStore,
        connector: Arc<ServiceConnector>,
        config: &EngineConfig,
        jobs: mpsc::UnboundedSender<Job>,
    ) -> Self {
        Self {
            store,
            writer: WriteCoordinator::new(config.debounce),
            connector,
            jobs,
            client_context: config.client_context.clone(),
            revert_failed_writes: config.revert_failed_writes,
            refresh: RefreshState::default(),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<CommandEnvelope>,
        mut backend_events: broadcast::Receiver<Arc<BackendEvent>>,
        mut done: mpsc::UnboundedReceiver<Completion>,
        mut interval: Option<Interval>,
        cancel: CancellationToken,
    ) {
        let mut events_open = true;
        loop {
            let deadline = self.writer.next_deadline();
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                completion = done.recv() => {
                    let Some(completion) = completion else { break };
                    self.handle_completion(completion);
                }
                envelope = commands.recv() => {
                    let Some(envelope) = envelope else { break };
                    self.handle_command(envelope);
                }
                event = backend_events.recv(), if events_open => match event {
                    Ok(event) => self.handle_backend_event(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "backend events lagged, rescanning");
                        self.request_full_refresh(None);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("backend event stream closed");
                        events_open = false;
                    }
                },
                () = sleep_until_opt(deadline) => self.flush_due(Instant::now()),
                () = tick(&mut interval) => {
                    trace!("periodic refresh");
                    self.request_full_refresh(None);
                }
            }
        }
        debug!(pending_writes = self.writer.pending_len(), "engine loop exiting");
    }

    fn submit(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            // Responders inside the job are dropped; callers see EngineStopped.
            warn!("backend worker is gone, job dropped");
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn handle_command(&mut self, envelope: CommandEnvelope) {
        let CommandEnvelope {
            command,
            response_tx,
        } = envelope;
        trace!(?command, "command");

        match command {
            Command::RequestValue { edid, code, value } => {
                let result = validate_request(&self.store, edid.as_str(), code)
                    .and_then(|state| accept_value(&state, code, value))
                    .map(|value| {
                        self.writer.request(edid, code, value, Instant::now());
                        CommandResult::Ok
                    });
                let _ = response_tx.send(result);
            }
            Command::WriteValue { edid, code, value } => {
                let accepted = validate_request(&self.store, edid.as_str(), code)
                    .and_then(|state| accept_value(&state, code, value).map(|v| (state, v)));
                match accepted {
                    Ok((state, value)) => {
                        self.writer.cancel(&edid, code);
                        self.submit_write(&state, code, value, Some(response_tx), false);
                    }
                    Err(e) => {
                        let _ = response_tx.send(Err(e));
                    }
                }
            }
            Command::ResetFeature { edid, code } => {
                let target = reset_target(&self.store, edid.as_str(), code);
                match target.and_then(|value| {
                    validate_request(&self.store, edid.as_str(), code).map(|s| (s, value))
                }) {
                    Ok((state, value)) => {
                        info!(edid = %edid, code, value, "resetting feature");
                        self.writer.cancel(&edid, code);
                        self.submit_write(&state, code, value, Some(response_tx), true);
                    }
                    Err(e) => {
                        let _ = response_tx.send(Err(e));
                    }
                }
            }
            Command::Rescan => self.request_full_refresh(Some(response_tx)),
            Command::LightRefresh => self.submit(Job::List {
                responder: Some(response_tx),
            }),
            Command::RefreshValues { edid } => match self.store.monitor(edid.as_str()) {
                Some(state) => self.submit(Job::ReadValues {
                    descriptor: state.descriptor(),
                    codes: state.capability_codes(),
                    responder: Some(response_tx),
                }),
                None => {
                    let _ = response_tx.send(Err(CoreError::UnknownMonitor {
                        identifier: edid.to_string(),
                    }));
                }
            },
            Command::CapabilitiesString { edid } => {
                self.submit_query(&edid, Query::CapabilitiesString, response_tx);
            }
            Command::FeatureMetadata { edid, code } => {
                self.submit_query(&edid, |d| Query::FeatureMetadata(d, code), response_tx);
            }
            Command::SleepMultiplier { edid } => {
                self.submit_query(&edid, Query::SleepMultiplier, response_tx);
            }
            Command::SetSleepMultiplier { edid, multiplier } => {
                self.submit_query(
                    &edid,
                    |d| Query::SetSleepMultiplier(d, multiplier),
                    response_tx,
                );
            }
            Command::RestartService {
                options,
                syslog_level,
            } => self.submit(Job::Query {
                query: Query::Restart {
                    options,
                    syslog_level,
                },
                responder: response_tx,
            }),
            Command::ServiceInfo => self.submit(Job::Query {
                query: Query::ServiceInfo,
                responder: response_tx,
            }),
            Command::SetOptions {
                raw_values,
                skip_verify,
            } => {
                self.connector.set_options(raw_values, skip_verify);
                debug!(raw_values, skip_verify, "session options changed");
                let _ = response_tx.send(Ok(CommandResult::Ok));
            }
        }
    }

    /// Queue a per-monitor query, or answer `UnknownMonitor` right away.
    fn submit_query(
        &self,
        edid: &Edid,
        query: impl FnOnce(Arc<MonitorDescriptor>) -> Query,
        responder: Responder,
    ) {
        match self.store.monitor(edid.as_str()) {
            Some(state) => self.submit(Job::Query {
                query: query(state.descriptor()),
                responder,
            }),
            None => {
                let _ = responder.send(Err(CoreError::UnknownMonitor {
                    identifier: edid.to_string(),
                }));
            }
        }
    }

    /// Optimistically store `value`, then queue the write.
    fn submit_write(
        &mut self,
        state: &MonitorState,
        code: u8,
        value: u16,
        responder: Option<Responder>,
        reply_value: bool,
    ) {
        self.store
            .set_local_value(state.edid().as_str(), code, value);
        self.submit(Job::Write {
            descriptor: state.descriptor(),
            code,
            value,
            context: self.client_context.clone(),
            responder,
            reply_value,
        });
    }

    fn flush_due(&mut self, now: Instant) {
        for due in self.writer.take_due(now) {
            if !needs_write(&self.store, &due) {
                trace!(edid = %due.edid, code = due.code, "settled value already current");
                continue;
            }
            let Some(state) = self.store.monitor(due.edid.as_str()) else {
                debug!(edid = %due.edid, "monitor gone before write settled");
                continue;
            };
            self.submit_write(&state, due.code, due.value, None, false);
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    fn request_full_refresh(&mut self, responder: Option<Responder>) {
        if self.refresh.in_flight {
            self.refresh.queued = true;
            self.refresh.queued_waiters.extend(responder);
            return;
        }
        self.refresh.in_flight = true;
        self.refresh.waiters.extend(responder);
        self.submit(Job::Detect {
            settled: self.store.settled_edids(),
        });
    }

    fn finish_full_refresh(&mut self, result: Result<DetectionOutcome, CoreError>) {
        let failure = result.as_ref().err().cloned();
        self.store.apply_full_refresh(result);
        self.refresh.in_flight = false;
        respond_all(std::mem::take(&mut self.refresh.waiters), failure);

        let deferred = std::mem::take(&mut self.refresh.deferred);
        if !deferred.is_empty() {
            debug!(count = deferred.len(), "replaying deferred pushes");
        }
        for push in deferred {
            self.store
                .apply_pushed_value(&push.edid, push.code, push.value, &push.source_context);
        }

        if std::mem::take(&mut self.refresh.queued) {
            let waiters = std::mem::take(&mut self.refresh.queued_waiters);
            self.refresh.in_flight = true;
            self.refresh.waiters = waiters;
            self.submit(Job::Detect {
                settled: self.store.settled_edids(),
            });
        }
    }

    // ── Backend pushes ───────────────────────────────────────────────

    fn handle_backend_event(&mut self, event: &BackendEvent) {
        match event {
            BackendEvent::ServiceInitialized => {
                info!("backend service (re)initialized");
                self.request_full_refresh(None);
            }
            BackendEvent::ConnectedDisplaysChanged {
                edid,
                event_kind,
                flags,
            } => {
                let kind = RefreshKind::for_event(*event_kind);
                debug!(edid = %edid, event_kind, flags, refresh = %kind, "displays changed");
                match kind {
                    RefreshKind::Light => self.submit(Job::List { responder: None }),
                    RefreshKind::Full => self.request_full_refresh(None),
                }
            }
            BackendEvent::VcpValueChanged {
                edid,
                code,
                new_value,
                source_context,
                ..
            } => {
                if self.refresh.in_flight {
                    self.refresh.deferred.push(DeferredPush {
                        edid: edid.clone(),
                        code: *code,
                        value: *new_value,
                        source_context: source_context.clone(),
                    });
                    return;
                }
                // An echo of our own write that matches the store is silent.
                let unchanged = self
                    .store
                    .current_value(edid.as_str(), *code)
                    .is_some_and(|v| v.current == *new_value);
                if *source_context == self.client_context && unchanged {
                    trace!(edid = %edid, code, "own write echoed");
                    return;
                }
                self.store
                    .apply_pushed_value(edid, *code, *new_value, source_context);
            }
        }
    }

    // ── Worker completions ───────────────────────────────────────────

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Detected(result) => self.finish_full_refresh(result),
            Completion::Listed { result, responder } => {
                let failure = result.as_ref().err().cloned();
                self.store.apply_light_refresh(result);
                respond_all(responder, failure);
            }
            Completion::Values {
                edid,
                result,
                responder,
            } => {
                let failure = result.as_ref().err().cloned();
                self.store.apply_values(edid.as_str(), result);
                respond_all(responder, failure);
            }
            Completion::Written {
                edid,
                code,
                value,
                result,
                responder,
                reply_value,
            } => {
                let reply = match result {
                    Ok(()) => {
                        debug!(edid = %edid, code, value, "write acknowledged");
                        Ok(if reply_value {
                            CommandResult::Value(value)
                        } else {
                            CommandResult::Ok
                        })
                    }
                    Err(e) => {
                        warn!(edid = %edid, code, value, error = %e, "write failed");
                        self.store
                            .emit_error(format!("Writing 0x{code:02X} = {value} to {edid}: {e}"));
                        if self.revert_failed_writes {
                            self.revert(&edid, code);
                        }
                        Err(e)
                    }
                };
                if let Some(tx) = responder {
                    let _ = tx.send(reply);
                }
            }
            Completion::Answered { result, responder } => {
                if let Err(e) = &result {
                    debug!(error = %e, "query failed");
                }
                let _ = responder.send(result);
            }
        }
    }

    /// Re-read one feature after a failed write.
    fn revert(&self, edid: &Edid, code: u8) {
        if let Some(state) = self.store.monitor(edid.as_str()) {
            self.submit(Job::ReadValues {
                descriptor: state.descriptor(),
                codes: vec![code],
                responder: None,
            });
        }
    }
}

fn respond_all(responders: impl IntoIterator<Item = Responder>, failure: Option<CoreError>) {
    for tx in responders {
        let _ = tx.send(match &failure {
            Some(e) => Err(e.clone()),
            None => Ok(CommandResult::Ok),
        });
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use ddcsync_api::SimulatedBackend;

    use super::*;

    fn harness() -> (EngineLoop, mpsc::UnboundedReceiver<Job>, Arc<ServiceConnector>) {
        let config = EngineConfig {
            client_context: "me".into(),
            ..EngineConfig::default()
        };
        let connector = Arc::new(ServiceConnector::simulated(
            Arc::new(SimulatedBackend::new()),
            &config,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = EngineLoop::new(StateStore::new(), Arc::clone(&connector), &config, tx);
        (event_loop, rx, connector)
    }

    async fn run_detect(
        event_loop: &mut EngineLoop,
        jobs: &mut mpsc::UnboundedReceiver<Job>,
        connector: &ServiceConnector,
    ) {
        let job = jobs.try_recv().unwrap();
        let completion = run_job(connector, job).await;
        event_loop.handle_completion(completion);
    }

    fn push(edid: &str, code: u8, value: u16, context: &str) -> BackendEvent {
        BackendEvent::VcpValueChanged {
            display_number: 1,
            edid: edid.into(),
            code,
            new_value: value,
            source_name: "test".into(),
            source_context: context.into(),
            flags: 0,
        }
    }

    #[tokio::test]
    async fn pushes_during_detection_are_replayed_after_it() {
        let (mut event_loop, mut jobs, connector) = harness();
        event_loop.request_full_refresh(None);
        run_detect(&mut event_loop, &mut jobs, &connector).await;

        event_loop.request_full_refresh(None);
        event_loop.handle_backend_event(&push("MOCK-MockView-01", 0x10, 90, "other"));
        assert_eq!(
            event_loop.store.current_value("MOCK-MockView-01", 0x10).unwrap().current,
            40
        );

        run_detect(&mut event_loop, &mut jobs, &connector).await;
        assert_eq!(
            event_loop.store.current_value("MOCK-MockView-01", 0x10).unwrap().current,
            90
        );
    }

    #[tokio::test]
    async fn concurrent_rescans_coalesce() {
        let (mut event_loop, mut jobs, connector) = harness();
        event_loop.request_full_refresh(None);
        event_loop.request_full_refresh(None);
        event_loop.request_full_refresh(None);
        assert!(jobs.try_recv().is_ok());
        assert!(jobs.try_recv().is_err());

        let (tx, mut rx) = oneshot::channel();
        event_loop.refresh.queued_waiters.push(tx);
        event_loop.handle_completion(Completion::Detected(
            fetch_detection(&connector, &HashSet::new()).await,
        ));
        // Exactly one follow-up detection.
        assert!(jobs.try_recv().is_ok());
        assert!(jobs.try_recv().is_err());
        assert!(rx.try_recv().is_err());

        run_detect_with(&mut event_loop, &connector).await;
        assert_eq!(rx.try_recv().unwrap().unwrap(), CommandResult::Ok);
    }

    async fn run_detect_with(event_loop: &mut EngineLoop, connector: &ServiceConnector) {
        let outcome = fetch_detection(connector, &event_loop.store.settled_edids()).await;
        event_loop.handle_completion(Completion::Detected(outcome));
    }

    #[tokio::test]
    async fn matching_own_echo_is_silent() {
        let (mut event_loop, mut jobs, connector) = harness();
        event_loop.request_full_refresh(None);
        run_detect(&mut event_loop, &mut jobs, &connector).await;
        let mut events = event_loop.store.handle().subscribe_events();

        event_loop.handle_backend_event(&push("MOCK-MockView-01", 0x12, 50, "me"));
        assert!(events.try_recv().is_err());
        assert_eq!(
            event_loop.store.current_value("MOCK-MockView-01", 0x12).unwrap().current,
            50
        );
    }

    #[tokio::test]
    async fn own_echo_after_foreign_push_is_applied_in_order() {
        let (mut event_loop, mut jobs, connector) = harness();
        event_loop.request_full_refresh(None);
        run_detect(&mut event_loop, &mut jobs, &connector).await;
        let state = event_loop.store.monitor("MOCK-MockView-01").unwrap();

        event_loop.submit_write(&state, 0x10, 50, None, false);
        let _ = jobs.try_recv().unwrap();
        event_loop.handle_backend_event(&push("MOCK-MockView-01", 0x10, 70, "other"));
        event_loop.handle_backend_event(&push("MOCK-MockView-01", 0x10, 50, "me"));

        assert_eq!(
            event_loop.store.current_value("MOCK-MockView-01", 0x10).unwrap().current,
            50
        );
    }

    #[tokio::test]
    async fn display_events_pick_the_refresh_kind() {
        let (mut event_loop, mut jobs, connector) = harness();
        event_loop.request_full_refresh(None);
        run_detect(&mut event_loop, &mut jobs, &connector).await;

        event_loop.handle_backend_event(&BackendEvent::ConnectedDisplaysChanged {
            edid: "x".into(),
            event_kind: 0,
            flags: 0,
        });
        assert!(matches!(jobs.try_recv(), Ok(Job::List { .. })));

        event_loop.handle_backend_event(&BackendEvent::ConnectedDisplaysChanged {
            edid: "x".into(),
            event_kind: 2,
            flags: 0,
        });
        assert!(matches!(jobs.try_recv(), Ok(Job::Detect { .. })));

        event_loop.handle_backend_event(&BackendEvent::ServiceInitialized);
        assert!(jobs.try_recv().is_err(), "coalesced into the in-flight detection");
        assert!(event_loop.refresh.queued);
    }

    #[tokio::test]
    async fn failed_write_reports_error_and_keeps_optimistic_value() {
        let (mut event_loop, mut jobs, connector) = harness();
        event_loop.request_full_refresh(None);
        run_detect(&mut event_loop, &mut jobs, &connector).await;
        let state = event_loop.store.monitor("MOCK-MockView-01").unwrap();
        let mut events = event_loop.store.handle().subscribe_events();

        event_loop.submit_write(&state, 0x10, 66, None, false);
        assert!(matches!(events.try_recv(), Ok(StoreEvent::FeatureChanged { code: 0x10, .. })));
        let _ = jobs.try_recv().unwrap();

        event_loop.handle_completion(Completion::Written {
            edid: state.edid().clone(),
            code: 0x10,
            value: 66,
            result: Err(CoreError::RemoteRejected {
                status: -1,
                message: "nak".into(),
            }),
            responder: None,
            reply_value: false,
        });
        assert!(matches!(events.try_recv(), Ok(StoreEvent::Error { .. })));
        assert_eq!(state.value(0x10).unwrap().current, 66);
        assert!(jobs.try_recv().is_err(), "no revert unless configured");
    }
}
