/**
 * ICE gatherer: collects local candidates for one component
 * https://draft.ortc.org/#rtcicegatherer*
 *
 * Gathering runs on the tokio runtime. Host candidates come from binding a
 * UDP socket and a TCP listener on every non-loopback interface address,
 * server reflexive candidates from a Binding exchange with the configured
 * STUN servers. Progress is published to every subscriber, see
 * `GathererEvent`.
 */
use std::fmt;
use std::mem;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use slog::{debug, error, info, o, Logger};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;

use crate::auth::LocalCredentials;
use crate::error::IceError;
use crate::ice::candidate::{IceCandidate, IceComponent, IceProtocol};
use crate::ice::probe::{probe_for, ProbeFactory, ProbeOutcome};
use crate::ice::server::{sort_by_preference, validate_servers, IceServer, ValidatedServer};
use crate::net::{self, LocalSocket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatherPolicy {
    #[default]
    All,
    Nohost,
    Relay,
}

impl GatherPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatherPolicy::All => "all",
            GatherPolicy::Nohost => "nohost",
            GatherPolicy::Relay => "relay",
        }
    }
}

impl fmt::Display for GatherPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GathererState {
    New,
    Gathering,
    Complete,
    Closed,
}

/**
 * Caller supplied gathering options (RTCIceGatherOptions).
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatherOptions {
    #[serde(default, alias = "gatherPolicy")]
    pub gather_policy: GatherPolicy,
    #[serde(default, alias = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

/**
 * Knobs for the server probes that are not part of the gather options.
 */
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub stun_timeout: Duration,
    pub software: String,
    pub probes: ProbeFactory,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            stun_timeout: Duration::from_millis(3000),
            software: "ORTC_GATHER/1".to_string(),
            probes: probe_for,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParameters {
    pub ice_lite: bool,
    pub password: String,
    pub username_fragment: String,
}

#[derive(Debug, Clone)]
pub enum GathererEvent {
    StateChange(GathererState),
    /// A new candidate. `url` names the server it came from, None for host candidates.
    LocalCandidate {
        candidate: IceCandidate,
        url: Option<String>,
    },
    /// Every probe has settled, no more candidates follow.
    LocalCandidateComplete,
    /// A STUN or TURN server failed to answer, or answered with an error.
    Error {
        url: String,
        error_code: u16,
        error_text: String,
    },
}

struct Inner {
    state: GathererState,
    options: GatherOptions,
    ice_lite: bool,
    credentials: LocalCredentials,
    candidates: Vec<IceCandidate>,
    sockets: Vec<(IceCandidate, LocalSocket)>,
    associated: Option<IceGatherer>,
    subscribers: Vec<UnboundedSender<GathererEvent>>,
}

impl Inner {
    // events go out while the lock is held, so they stay ordered with state changes
    fn publish(&mut self, event: GathererEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn has_subscribers(&mut self) -> bool {
        self.subscribers.retain(|tx| !tx.is_closed());
        !self.subscribers.is_empty()
    }
}

struct Shared {
    component: IceComponent,
    settings: ProbeSettings,
    logger: Logger,
    inner: Mutex<Inner>,
}

/**
 * Handle to a gatherer. Clones share the same gatherer.
 */
#[derive(Clone)]
pub struct IceGatherer {
    shared: Arc<Shared>,
}

impl IceGatherer {
    /**
     * Create an RTP gatherer in the `New` state with fresh credentials.
     */
    pub fn new(options: GatherOptions, logger: &Logger) -> Self {
        Self::with_settings(options, IceComponent::Rtp, ProbeSettings::default(), logger)
    }

    pub fn with_settings(
        options: GatherOptions,
        component: IceComponent,
        settings: ProbeSettings,
        logger: &Logger,
    ) -> Self {
        Self::build(options, component, LocalCredentials::generate(), settings, logger)
    }

    fn build(
        options: GatherOptions,
        component: IceComponent,
        credentials: LocalCredentials,
        settings: ProbeSettings,
        logger: &Logger,
    ) -> Self {
        let logger = logger.new(o!("component" => format!("{component:?}").to_lowercase()));
        debug!(logger, "ICE gatherer created, ufrag {}", credentials.username_fragment);
        Self {
            shared: Arc::new(Shared {
                component,
                settings,
                logger,
                inner: Mutex::new(Inner {
                    state: GathererState::New,
                    options,
                    ice_lite: false,
                    credentials,
                    candidates: Vec::new(),
                    sockets: Vec::new(),
                    associated: None,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /**
     * Subscribe to gatherer events. Only events sent after this call are
     * received. Nothing is ever dropped for a slow subscriber, dropping the
     * receiver unsubscribes.
     */
    pub fn subscribe(&self) -> UnboundedReceiver<GathererEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> GathererState {
        self.lock().state
    }

    pub fn component(&self) -> IceComponent {
        self.shared.component
    }

    /**
     * Start gathering.
     *
     * Server configuration is validated before anything else happens, a
     * failure leaves the gatherer untouched. On success the state is
     * `Gathering` when this returns and the probes run on a spawned task.
     * Fails with `NoRuntime` outside a tokio runtime, and with
     * `InvalidState` while a previous pass is still running.
     *
     * @param options Replaces the options given at construction, if present
     * @return Handle of the gathering task. It resolves once every probe
     *         has settled, with the first fatal socket error if any.
     */
    pub fn gather(
        &self,
        options: Option<GatherOptions>,
    ) -> Result<JoinHandle<Result<(), IceError>>, IceError> {
        let runtime = Handle::try_current().map_err(|_| IceError::NoRuntime)?;
        let (policy, mut servers) = {
            let mut inner = self.lock();
            match inner.state {
                GathererState::Closed => return Err(IceError::InvalidState("gatherer is closed")),
                GathererState::Gathering => {
                    return Err(IceError::InvalidState("gathering already in progress"))
                }
                GathererState::New | GathererState::Complete => {}
            }

            let options = options.unwrap_or_else(|| inner.options.clone());
            let servers = validate_servers(&options.ice_servers)?;
            if servers.is_empty() && options.gather_policy != GatherPolicy::All {
                return Err(IceError::Configuration(format!(
                    "servers cannot be empty for policy {}",
                    options.gather_policy
                )));
            }

            let policy = options.gather_policy;
            inner.ice_lite = servers.is_empty();
            inner.options = options;
            inner.state = GathererState::Gathering;
            inner.publish(GathererEvent::StateChange(GathererState::Gathering));
            (policy, servers)
        };

        sort_by_preference(&mut servers);
        info!(
            self.shared.logger,
            "Gathering started, policy {} with {} server url(s)",
            policy,
            servers.len()
        );

        let gatherer = self.clone();
        Ok(runtime.spawn(async move { gatherer.run(policy, servers).await }))
    }

    async fn run(self, policy: GatherPolicy, servers: Vec<ValidatedServer>) -> Result<(), IceError> {
        let mut probes: JoinSet<Result<(), IceError>> = JoinSet::new();

        if !servers.is_empty() {
            let gatherer = self.clone();
            probes.spawn(async move { gatherer.gather_from_servers(policy, servers).await });
        }

        if policy == GatherPolicy::All {
            for ip in net::local_addresses()? {
                for protocol in [IceProtocol::Udp, IceProtocol::Tcp] {
                    let gatherer = self.clone();
                    probes.spawn(async move { gatherer.gather_host(ip, protocol).await });
                }
            }
        }

        // dropping the set on an early return aborts the remaining probes
        while let Some(joined) = probes.join_next().await {
            let result = joined.map_err(|e| IceError::Task(e.to_string()))?;
            if let Err(e) = result {
                error!(self.shared.logger, "Gathering failed: {}", e);
                return Err(e);
            }
        }

        let mut inner = self.lock();
        if inner.state == GathererState::Closed {
            debug!(self.shared.logger, "Gatherer closed before probes settled");
            return Ok(());
        }
        inner.state = GathererState::Complete;
        info!(
            self.shared.logger,
            "Gathering complete with {} candidate(s)",
            inner.candidates.len()
        );
        inner.publish(GathererEvent::LocalCandidateComplete);
        inner.publish(GathererEvent::StateChange(GathererState::Complete));
        Ok(())
    }

    async fn gather_host(&self, ip: IpAddr, protocol: IceProtocol) -> Result<(), IceError> {
        let socket = match protocol {
            IceProtocol::Udp => net::bind_udp(ip).await?.map(LocalSocket::Udp),
            IceProtocol::Tcp => net::listen_tcp(ip).await?.map(LocalSocket::TcpListener),
        };
        let Some(socket) = socket else {
            debug!(self.shared.logger, "{} is not usable for {} candidates", ip, protocol);
            return Ok(());
        };

        let candidate = IceCandidate::from_local_socket(&socket, self.shared.component)?;
        self.deliver(candidate, socket, None);
        Ok(())
    }

    /**
     * Try the servers in order until one of them yields a candidate. Under
     * the relay policy only TURN servers are tried.
     */
    async fn gather_from_servers(
        &self,
        policy: GatherPolicy,
        servers: Vec<ValidatedServer>,
    ) -> Result<(), IceError> {
        let settings = &self.shared.settings;
        for server in servers {
            if policy == GatherPolicy::Relay && !server.scheme.is_turn() {
                debug!(self.shared.logger, "relay policy, skipping {}", server.url);
                continue;
            }

            let probe = (settings.probes)(
                server.scheme,
                settings.stun_timeout,
                &settings.software,
                &self.shared.logger,
            );
            match probe.probe(&server, self.shared.component).await? {
                ProbeOutcome::Candidate { candidate, socket } => {
                    self.deliver(candidate, socket, Some(server.url));
                    break;
                }
                ProbeOutcome::ServerError {
                    error_code,
                    error_text,
                } => {
                    let mut inner = self.lock();
                    if inner.state != GathererState::Closed {
                        inner.publish(GathererEvent::Error {
                            url: server.url,
                            error_code,
                            error_text,
                        });
                    }
                }
                ProbeOutcome::Unavailable => {}
            }
        }
        Ok(())
    }

    /**
     * Record a candidate and publish it. The socket is dropped instead when
     * the gatherer was closed meanwhile, or when nobody is subscribed.
     *
     * @return true if the candidate was recorded
     */
    fn deliver(&self, candidate: IceCandidate, socket: LocalSocket, url: Option<String>) -> bool {
        let mut inner = self.lock();
        if inner.state == GathererState::Closed {
            debug!(self.shared.logger, "Discarding late candidate {}", candidate);
            return false;
        }
        if !inner.has_subscribers() {
            debug!(self.shared.logger, "No subscriber, closing socket of {}", candidate);
            return false;
        }
        debug!(self.shared.logger, "New local candidate {}", candidate);
        inner.candidates.push(candidate.clone());
        inner.sockets.push((candidate.clone(), socket));
        inner.publish(GathererEvent::LocalCandidate { candidate, url });
        true
    }

    /**
     * Close the gatherer and release the sockets it still holds. The state
     * change happens on a later scheduler turn, so `state()` right after
     * this call still reports the previous state.
     */
    pub fn close(&self) {
        if self.state() == GathererState::Closed {
            return;
        }
        let gatherer = self.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { gatherer.finish_close() });
            }
            Err(_) => gatherer.finish_close(),
        }
    }

    fn finish_close(&self) {
        let sockets = {
            let mut inner = self.lock();
            if inner.state == GathererState::Closed {
                return;
            }
            inner.state = GathererState::Closed;
            inner.publish(GathererEvent::StateChange(GathererState::Closed));
            mem::take(&mut inner.sockets)
        };
        info!(self.shared.logger, "Gatherer closed, releasing {} socket(s)", sockets.len());
        drop(sockets);
    }

    pub fn get_local_parameters(&self) -> Result<LocalParameters, IceError> {
        let inner = self.lock();
        if inner.state == GathererState::Closed {
            return Err(IceError::InvalidState("gatherer is closed"));
        }
        Ok(LocalParameters {
            ice_lite: inner.ice_lite,
            password: inner.credentials.password.clone(),
            username_fragment: inner.credentials.username_fragment.clone(),
        })
    }

    pub fn get_local_candidates(&self) -> Result<Vec<IceCandidate>, IceError> {
        let inner = self.lock();
        if inner.state == GathererState::Closed {
            return Err(IceError::InvalidState("gatherer is closed"));
        }
        Ok(inner.candidates.clone())
    }

    /**
     * Create the RTCP gatherer paired with this one. It shares the options
     * and credentials, and there can only ever be one.
     */
    pub fn create_associated_gatherer(&self) -> Result<IceGatherer, IceError> {
        let mut inner = self.lock();
        if inner.state == GathererState::Closed {
            return Err(IceError::InvalidState("gatherer is closed"));
        }
        if self.shared.component == IceComponent::Rtcp {
            return Err(IceError::InvalidState("an RTCP gatherer cannot have an associated gatherer"));
        }
        if inner.associated.is_some() {
            return Err(IceError::InvalidState("associated gatherer already exists"));
        }

        let associated = IceGatherer::build(
            inner.options.clone(),
            IceComponent::Rtcp,
            inner.credentials.clone(),
            self.shared.settings.clone(),
            &self.shared.logger,
        );
        inner.associated = Some(associated.clone());
        Ok(associated)
    }

    /**
     * Hand the socket behind a local candidate over to the caller. Each
     * socket can be taken once, afterwards the gatherer no longer closes it.
     */
    pub fn take_local_socket(&self, candidate: &IceCandidate) -> Option<LocalSocket> {
        let mut inner = self.lock();
        let index = inner.sockets.iter().position(|(c, _)| c == candidate)?;
        Some(inner.sockets.swap_remove(index).1)
    }
}
