use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use jardim_core::{DiscoveredDevice, ProvisioningResult};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::codec::{self, StatusReport};
use crate::error::ProvisioningError;
use crate::link::{CHARACTERISTIC_UUID, Link, Peripheral, SERVICE_UUID};

/// Timing bounds for scanning and provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a connection attempt may take.
    pub connect_timeout: Duration,
    /// Delay before each status read.
    pub poll_interval: Duration,
    /// Status reads before giving up.
    pub max_attempts: u32,
    /// A scan stops on its own after this long.
    pub scan_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            max_attempts: 20,
            scan_timeout: Duration::from_secs(10),
        }
    }
}

/// Where a provisioning session is. Observable through [`Provisioner::watch_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    DiscoveringServices,
    Writing,
    Polling { attempt: u32 },
    Joined,
    Failed,
    TimedOut,
}

/// How a single status read moves the session along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Joined { ip: String },
    Rejected { status: String },
}

/// Address a device reports before it has a lease.
const UNASSIGNED_IP: &str = "0.0.0.0";

/// Classify a status report.
///
/// Failure statuses win over everything else. A usable address counts as
/// success even when the status field is missing or unrecognised.
pub fn interpret(report: &StatusReport) -> PollOutcome {
    match report.status.as_deref() {
        Some(status @ ("fail" | "error")) => {
            return PollOutcome::Rejected {
                status: status.to_owned(),
            };
        }
        Some("connecting" | "idle") => return PollOutcome::Pending,
        _ => {}
    }

    match report.ip.as_deref().map(str::trim) {
        Some(ip) if !ip.is_empty() && ip != UNASSIGNED_IP => PollOutcome::Joined { ip: ip.to_owned() },
        _ => PollOutcome::Pending,
    }
}

struct ActiveScan {
    id: u64,
    cancel: CancellationToken,
}

/// Scans for pot controllers and hands them Wi-Fi credentials.
///
/// Owns the link exclusively: one scan at a time, and no scanning while a
/// provisioning session is connected.
pub struct Provisioner<L: Link> {
    link: Arc<L>,
    config: SessionConfig,
    scan: Arc<Mutex<Option<ActiveScan>>>,
    next_scan: AtomicU64,
    busy: AtomicBool,
    state: watch::Sender<SessionState>,
}

impl<L: Link> Provisioner<L> {
    pub fn new(link: L, config: SessionConfig) -> Self {
        Self::with_shared_link(Arc::new(link), config)
    }

    pub fn with_shared_link(link: Arc<L>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            link,
            config,
            scan: Arc::new(Mutex::new(None)),
            next_scan: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            state,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn is_scanning(&self) -> bool {
        self.scan.lock().await.is_some()
    }

    /// Start discovering pot controllers.
    ///
    /// `on_found` is called once per device for the lifetime of the scan.
    /// Calling this while a scan runs restarts it with a fresh dedup set.
    /// The scan stops on its own after [`SessionConfig::scan_timeout`].
    /// Fails with [`ProvisioningError::SessionBusy`] while a provisioning
    /// session holds the link.
    pub async fn start_scan<F>(&self, on_found: F) -> Result<(), ProvisioningError>
    where
        F: Fn(DiscoveredDevice) + Send + Sync + 'static,
    {
        let mut active = self.scan.lock().await;
        // Checked under the scan lock: a session that starts after this
        // point waits in `stop_scan` and tears the new scan down.
        if self.busy.load(Ordering::Acquire) {
            warn!("Provisioning session in progress, scan refused");
            return Err(ProvisioningError::SessionBusy);
        }

        if let Some(previous) = active.take() {
            debug!(scan_id = previous.id, "Restarting scan");
            previous.cancel.cancel();
        }

        if let Err(e) = self.link.stop_scan().await {
            warn!(error = %e, "Failed to stop previous scan");
        }

        let rx = self
            .link
            .start_scan(SERVICE_UUID)
            .await
            .map_err(|e| ProvisioningError::LinkUnreachable(e.to_string()))?;

        let id = self.next_scan.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *active = Some(ActiveScan {
            id,
            cancel: cancel.clone(),
        });
        drop(active);

        let scan = ScanTask {
            id,
            timeout: self.config.scan_timeout,
            link: Arc::clone(&self.link),
            active: Arc::clone(&self.scan),
        };

        tokio::spawn(
            scan.run(rx, on_found, cancel)
                .instrument(info_span!("scan", scan_id = id)),
        );

        info!(scan_id = id, timeout = ?self.config.scan_timeout, "Scan started");
        Ok(())
    }

    /// Stop the current scan, if any. Safe to call at any time.
    pub async fn stop_scan(&self) {
        let Some(active) = self.scan.lock().await.take() else {
            return;
        };

        active.cancel.cancel();
        if let Err(e) = self.link.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }
        info!(scan_id = active.id, "Scan stopped");
    }

    /// Scan for `window` (capped by the scan timeout) and return what was seen.
    pub async fn scan_for(&self, window: Duration) -> Result<Vec<DiscoveredDevice>, ProvisioningError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.start_scan(move |device| {
            let _ = tx.send(device);
        })
        .await?;

        tokio::time::sleep(window.min(self.config.scan_timeout)).await;
        self.stop_scan().await;

        let mut found = Vec::new();
        while let Ok(device) = rx.try_recv() {
            found.push(device);
        }
        Ok(found)
    }

    /// Hand Wi-Fi credentials to `device` and wait until it joins the network.
    ///
    /// Stops any scan first. The connection is released on every exit path,
    /// cancellation included. Only one session runs at a time; a second
    /// concurrent call fails with [`ProvisioningError::SessionBusy`].
    #[instrument(
        name = "provision",
        skip(self, device, ssid, password, cancel),
        fields(device_id = %device.device_id, ssid = %ssid)
    )]
    pub async fn send_credentials(
        &self,
        device: &DiscoveredDevice,
        ssid: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResult, ProvisioningError> {
        let Some(_guard) = SessionGuard::acquire(&self.busy) else {
            warn!("Provisioning session already in progress");
            return Err(ProvisioningError::SessionBusy);
        };

        self.stop_scan().await;
        self.transition(SessionState::Connecting);

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            self.link.connect(&device.device_id),
        );

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisioningError::Cancelled),
            result = connect => match result {
                Ok(Ok(peripheral)) => Ok(peripheral),
                Ok(Err(e)) => Err(ProvisioningError::LinkUnreachable(e.to_string())),
                Err(_) => Err(ProvisioningError::LinkUnreachable(format!(
                    "no connection after {:?}",
                    self.config.connect_timeout
                ))),
            },
        };

        let outcome = match connected {
            Ok(mut peripheral) => {
                let outcome = self.exchange(&mut peripheral, ssid, password, cancel).await;
                if let Err(e) = peripheral.disconnect().await {
                    warn!(error = %e, "Failed to release connection");
                }
                outcome
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(result) => {
                info!(ip = %result.ip, "Device joined the network");
                self.transition(SessionState::Joined);
            }
            Err(e @ ProvisioningError::ProvisioningTimeout { .. }) => {
                warn!(error = %e, "Provisioning timed out");
                self.transition(SessionState::TimedOut);
            }
            Err(e) => {
                warn!(error = %e, "Provisioning failed");
                self.transition(SessionState::Failed);
            }
        }

        outcome
    }

    async fn exchange(
        &self,
        peripheral: &mut L::Peripheral,
        ssid: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResult, ProvisioningError> {
        self.transition(SessionState::DiscoveringServices);
        let services = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProvisioningError::Cancelled),
            services = peripheral.discover_services() => services
                .map_err(|e| ProvisioningError::LinkUnreachable(e.to_string()))?,
        };

        let supported = services.iter().any(|s| {
            s.uuid.eq_ignore_ascii_case(SERVICE_UUID) && s.has_characteristic(CHARACTERISTIC_UUID)
        });
        if !supported {
            return Err(ProvisioningError::ProtocolMismatch);
        }

        self.transition(SessionState::Writing);
        let payload = codec::encode_credentials(ssid, password);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProvisioningError::Cancelled),
            written = peripheral.write_with_response(SERVICE_UUID, CHARACTERISTIC_UUID, &payload) => {
                written.map_err(|e| ProvisioningError::WriteFailed(e.to_string()))?
            }
        }
        debug!("Credentials written");

        self.poll(peripheral, ssid, cancel).await
    }

    async fn poll(
        &self,
        peripheral: &mut L::Peripheral,
        ssid: &str,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResult, ProvisioningError> {
        for attempt in 1..=self.config.max_attempts {
            self.transition(SessionState::Polling { attempt });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProvisioningError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProvisioningError::Cancelled),
                read = peripheral.read(SERVICE_UUID, CHARACTERISTIC_UUID) => read,
            };

            let value = match read {
                Ok(value) => value,
                Err(e) => {
                    debug!(attempt, error = %e, "Status read failed");
                    continue;
                }
            };

            let report = match codec::decode_report(&value) {
                Ok(report) => report,
                Err(e) => {
                    debug!(attempt, error = %e, "Status not readable yet");
                    continue;
                }
            };

            match interpret(&report) {
                PollOutcome::Pending => {
                    debug!(attempt, status = ?report.status, "Device still joining");
                }
                PollOutcome::Joined { ip } => {
                    return Ok(ProvisioningResult {
                        ip,
                        ssid: ssid.to_owned(),
                    });
                }
                PollOutcome::Rejected { status } => {
                    return Err(ProvisioningError::CredentialsRejected { status });
                }
            }
        }

        Err(ProvisioningError::ProvisioningTimeout {
            attempts: self.config.max_attempts,
        })
    }

    fn transition(&self, state: SessionState) {
        debug!(?state, "Session state");
        self.state.send_replace(state);
    }
}

struct ScanTask<L: Link> {
    id: u64,
    timeout: Duration,
    link: Arc<L>,
    active: Arc<Mutex<Option<ActiveScan>>>,
}

impl<L: Link> ScanTask<L> {
    async fn run<F>(self, mut rx: mpsc::Receiver<DiscoveredDevice>, on_found: F, cancel: CancellationToken)
    where
        F: Fn(DiscoveredDevice) + Send + Sync + 'static,
    {
        let mut seen = HashSet::new();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                // Whoever cancelled already owns cleanup.
                _ = cancel.cancelled() => return,
                _ = &mut deadline => {
                    info!(found = seen.len(), "Scan window elapsed");
                    break;
                }
                advertisement = rx.recv() => match advertisement {
                    Some(device) => {
                        if seen.insert(device.device_id.clone()) {
                            info!(device_id = %device.device_id, name = ?device.advertised_name, "Found device");
                            on_found(device);
                        }
                    }
                    None => {
                        debug!("Link ended the scan");
                        break;
                    }
                },
            }
        }

        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|scan| scan.id == self.id) {
            *active = None;
            drop(active);
            if let Err(e) = self.link.stop_scan().await {
                warn!(error = %e, "Failed to stop scan");
            }
        }
    }
}

/// Held for the duration of one provisioning session.
struct SessionGuard<'a>(&'a AtomicBool);

impl<'a> SessionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
