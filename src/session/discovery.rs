use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use crate::api::central::{CentralManager, ScanFilter, ScanMode};
use crate::api::central_event::{CentralEvent, CentralState};
use crate::api::peripheral::PeripheralHandle;
use crate::config::{DiscoveryMode, SessionConfig};
use crate::session::timer::DeadlineTimer;
use crate::Error;

/// Outcome of feeding one input to a discovery strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryStep {
    Pending,
    Found(PeripheralHandle),
    Failed(Error),
}

/// Produces at most one peripheral whose name equals the filter.
///
/// Strategies are driven step by step so the session manager can interleave
/// them with its own commands; [`begin`] starts one under its deadline.
#[async_trait]
pub trait DiscoveryStrategy<C: CentralManager>: Send {
    async fn start(&mut self, central: &C, name: &str) -> DiscoveryStep;

    async fn on_event(&mut self, central: &C, event: &CentralEvent) -> DiscoveryStep;

    async fn on_deadline(&mut self, central: &C) -> DiscoveryStep;

    /// Abandons discovery, releasing whatever the strategy holds.
    async fn cancel(&mut self, central: &C);

    /// Deadline to guard the strategy with, if it needs one.
    fn timeout(&self) -> Option<Duration>;

    fn is_active(&self) -> bool;
}

pub fn strategy_for<C: CentralManager>(config: &SessionConfig) -> Box<dyn DiscoveryStrategy<C>> {
    match config.discovery {
        DiscoveryMode::ActiveScan => {
            Box::new(ActiveScan::new(config.scan_mode, config.scan_timeout()))
        }
        DiscoveryMode::Paired => Box::new(PairedLookup::new()),
    }
}

/// Radio scan with an exact-name filter.
#[derive(Debug)]
pub struct ActiveScan {
    mode: ScanMode,
    timeout: Duration,
    filter: Option<String>,
}

impl ActiveScan {
    pub fn new(mode: ScanMode, timeout: Duration) -> Self {
        Self {
            mode,
            timeout,
            filter: None,
        }
    }

    // Every terminal step goes through here so the scan is stopped exactly once.
    async fn finish<C: CentralManager>(
        &mut self,
        central: &C,
        step: DiscoveryStep,
    ) -> DiscoveryStep {
        if self.filter.take().is_some() {
            if let Err(e) = central.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
        step
    }
}

#[async_trait]
impl<C: CentralManager> DiscoveryStrategy<C> for ActiveScan {
    async fn start(&mut self, central: &C, name: &str) -> DiscoveryStep {
        if self.filter.is_some() {
            self.finish(central, DiscoveryStep::Pending).await;
        }
        info!("Scanning for {} ({:?})", name, self.mode);
        self.filter = Some(name.to_string());
        match central.start_scan(ScanFilter::by_name(name, self.mode)).await {
            Ok(()) => DiscoveryStep::Pending,
            Err(e) => {
                warn!("Failed to start scan: {}", e);
                self.finish(central, DiscoveryStep::Failed(Error::ScannerUnavailable))
                    .await
            }
        }
    }

    async fn on_event(&mut self, central: &C, event: &CentralEvent) -> DiscoveryStep {
        let Some(filter) = self.filter.as_deref() else {
            return DiscoveryStep::Pending;
        };
        match event {
            CentralEvent::DeviceDiscovered { peripheral, rssi } => {
                if !peripheral.name_matches(filter) {
                    trace!("Skipping {} (rssi {:?})", peripheral, rssi);
                    return DiscoveryStep::Pending;
                }
                info!("Found {} (rssi {:?})", peripheral, rssi);
                self.finish(central, DiscoveryStep::Found(peripheral.clone()))
                    .await
            }
            CentralEvent::ScanFailed { code } => {
                warn!("Scan failed with code {}", code);
                self.finish(central, DiscoveryStep::Failed(Error::ScanFailed(*code)))
                    .await
            }
            CentralEvent::StateUpdate {
                state: CentralState::PoweredOff,
            } => {
                warn!("Adapter powered off while scanning");
                self.finish(central, DiscoveryStep::Failed(Error::RadioDisabled))
                    .await
            }
            _ => DiscoveryStep::Pending,
        }
    }

    async fn on_deadline(&mut self, central: &C) -> DiscoveryStep {
        if self.filter.is_none() {
            return DiscoveryStep::Pending;
        }
        warn!("No device found within {:?}", self.timeout);
        self.finish(central, DiscoveryStep::Failed(Error::ScanTimeout))
            .await
    }

    async fn cancel(&mut self, central: &C) {
        if self.filter.is_some() {
            debug!("Scan cancelled");
        }
        self.finish(central, DiscoveryStep::Pending).await;
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    fn is_active(&self) -> bool {
        self.filter.is_some()
    }
}

/// Lookup among peripherals the platform is already bonded with.
#[derive(Debug, Default)]
pub struct PairedLookup;

impl PairedLookup {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<C: CentralManager> DiscoveryStrategy<C> for PairedLookup {
    async fn start(&mut self, central: &C, name: &str) -> DiscoveryStep {
        let bonded = match central.bonded_peripherals().await {
            Ok(bonded) => bonded,
            Err(e) => {
                warn!("Failed to list bonded devices: {}", e);
                return DiscoveryStep::Failed(Error::ScannerUnavailable);
            }
        };
        debug!("{} bonded devices", bonded.len());
        match bonded.into_iter().find(|p| p.name_matches(name)) {
            Some(peripheral) => {
                info!("Found bonded {}", peripheral);
                DiscoveryStep::Found(peripheral)
            }
            None => {
                warn!("{} is not bonded", name);
                DiscoveryStep::Failed(Error::DeviceNotFound(name.to_string()))
            }
        }
    }

    async fn on_event(&mut self, _central: &C, _event: &CentralEvent) -> DiscoveryStep {
        DiscoveryStep::Pending
    }

    async fn on_deadline(&mut self, _central: &C) -> DiscoveryStep {
        DiscoveryStep::Pending
    }

    async fn cancel(&mut self, _central: &C) {}

    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn is_active(&self) -> bool {
        false
    }
}

/// Starts `strategy` and, while it is still pending, arms `timer` with its
/// deadline.
pub async fn begin<C: CentralManager>(
    central: &C,
    strategy: &mut dyn DiscoveryStrategy<C>,
    timer: &mut DeadlineTimer,
    name: &str,
) -> DiscoveryStep {
    timer.cancel();
    let step = strategy.start(central, name).await;
    if step == DiscoveryStep::Pending {
        if let Some(timeout) = strategy.timeout() {
            timer.arm(timeout);
        }
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::fake::{FakeCentral, Script};
    use tokio::sync::mpsc::{self, Receiver};
    use tokio::time::Instant;

    const LOCK: &str = "ESP_SMART_LOCK";

    // Drives a strategy to completion the way the session manager does.
    async fn discover<C: CentralManager>(
        central: &C,
        strategy: &mut dyn DiscoveryStrategy<C>,
        events: &mut Receiver<CentralEvent>,
        name: &str,
    ) -> Result<PeripheralHandle> {
        let mut timer = DeadlineTimer::new();
        let mut step = begin(central, strategy, &mut timer, name).await;
        loop {
            match step {
                DiscoveryStep::Found(peripheral) => return Ok(peripheral),
                DiscoveryStep::Failed(e) => return Err(e),
                DiscoveryStep::Pending => {}
            }
            step = tokio::select! {
                Some(event) = events.recv() => strategy.on_event(central, &event).await,
                _ = timer.expired() => strategy.on_deadline(central).await,
            };
        }
    }

    fn setup(script: Script) -> (FakeCentral, Receiver<CentralEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (FakeCentral::new(tx, script), rx)
    }

    fn scan() -> ActiveScan {
        ActiveScan::new(ScanMode::LowLatency, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn first_exact_match_wins() {
        let (central, mut events) = setup(Script {
            advertisements: vec![
                PeripheralHandle::new("AA:01", Some("OtherDevice")),
                PeripheralHandle::new("AA:02", Some(LOCK)),
                PeripheralHandle::new("AA:03", Some(LOCK)),
            ],
            ..Script::default()
        });
        let start = Instant::now();

        let found = discover(&central, &mut scan(), &mut events, LOCK).await.unwrap();

        assert_eq!(found, PeripheralHandle::new("AA:02", Some(LOCK)));
        assert!(start.elapsed() < Duration::from_secs(10));
        let calls = central.calls();
        assert_eq!(calls.scans_started, 1);
        assert_eq!(calls.scans_stopped, 1);
        assert_eq!(
            calls.last_filter,
            Some(ScanFilter::by_name(LOCK, ScanMode::LowLatency))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_matching_names_time_out() {
        let (central, mut events) = setup(Script {
            advertisements: vec![
                PeripheralHandle::new("AA:01", Some("OtherDevice")),
                PeripheralHandle::new("AA:02", Some("esp_smart_lock")),
                PeripheralHandle::new("AA:03", Some("ESP_SMART_LOCK2")),
                PeripheralHandle::new("AA:04", None),
            ],
            ..Script::default()
        });
        let start = Instant::now();

        let err = discover(&central, &mut scan(), &mut events, LOCK).await.unwrap_err();

        assert_eq!(err, Error::ScanTimeout);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(central.calls().scans_stopped, 1);
    }

    #[tokio::test]
    async fn scan_engine_error_stops_scan() {
        let (central, mut events) = setup(Script {
            scan_failure: Some(2),
            ..Script::default()
        });

        let err = discover(&central, &mut scan(), &mut events, LOCK).await.unwrap_err();

        assert_eq!(err, Error::ScanFailed(2));
        assert_eq!(central.calls().scans_stopped, 1);
    }

    #[tokio::test]
    async fn scanner_start_failure_is_unavailable() {
        let (central, mut events) = setup(Script {
            start_scan_error: true,
            ..Script::default()
        });

        let err = discover(&central, &mut scan(), &mut events, LOCK).await.unwrap_err();

        assert_eq!(err, Error::ScannerUnavailable);
        assert_eq!(central.calls().scans_stopped, 1);
    }

    #[tokio::test]
    async fn power_loss_ends_scan() {
        let (central, _events) = setup(Script::default());
        let mut strategy = scan();

        assert_eq!(strategy.start(&central, LOCK).await, DiscoveryStep::Pending);
        let step = strategy
            .on_event(
                &central,
                &CentralEvent::StateUpdate {
                    state: CentralState::PoweredOff,
                },
            )
            .await;

        assert_eq!(step, DiscoveryStep::Failed(Error::RadioDisabled));
        assert!(!DiscoveryStrategy::<FakeCentral>::is_active(&strategy));
        assert_eq!(central.calls().scans_stopped, 1);
    }

    #[tokio::test]
    async fn events_after_a_match_are_ignored() {
        let (central, _events) = setup(Script::default());
        let mut strategy = scan();
        let lock = CentralEvent::DeviceDiscovered {
            peripheral: PeripheralHandle::new("AA:02", Some(LOCK)),
            rssi: None,
        };

        strategy.start(&central, LOCK).await;
        assert!(matches!(
            strategy.on_event(&central, &lock).await,
            DiscoveryStep::Found(_)
        ));
        assert_eq!(strategy.on_event(&central, &lock).await, DiscoveryStep::Pending);
        assert_eq!(strategy.on_deadline(&central).await, DiscoveryStep::Pending);
        strategy.cancel(&central).await;

        assert_eq!(central.calls().scans_stopped, 1);
    }

    #[tokio::test]
    async fn paired_lookup_matches_exact_name() {
        let (central, mut events) = setup(Script {
            bonded: vec![
                PeripheralHandle::new("AA:01", Some("Headphones")),
                PeripheralHandle::new("AA:02", Some(LOCK)),
            ],
            ..Script::default()
        });

        let found = discover(&central, &mut PairedLookup::new(), &mut events, LOCK)
            .await
            .unwrap();

        assert_eq!(found.id.0, "AA:02");
        let calls = central.calls();
        assert_eq!(calls.bonded_queries, 1);
        assert_eq!(calls.scans_started, 0);
        assert_eq!(calls.scans_stopped, 0);
    }

    #[tokio::test]
    async fn paired_lookup_reports_missing_device() {
        let (central, mut events) = setup(Script {
            bonded: vec![PeripheralHandle::new("AA:01", Some("esp_smart_lock"))],
            ..Script::default()
        });

        let err = discover(&central, &mut PairedLookup::new(), &mut events, LOCK)
            .await
            .unwrap_err();

        assert_eq!(err, Error::DeviceNotFound(LOCK.to_string()));
    }

    #[tokio::test]
    async fn paired_lookup_failure_is_unavailable() {
        let (central, mut events) = setup(Script {
            bonded_error: true,
            ..Script::default()
        });

        let err = discover(&central, &mut PairedLookup::new(), &mut events, LOCK)
            .await
            .unwrap_err();

        assert_eq!(err, Error::ScannerUnavailable);
        assert_eq!(central.calls().bonded_queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_arms_deadline_only_while_pending() {
        let (central, _events) = setup(Script::default());
        let mut timer = DeadlineTimer::new();

        let step = begin(&central, &mut scan(), &mut timer, LOCK).await;
        assert_eq!(step, DiscoveryStep::Pending);
        assert!(timer.is_armed());

        let step = begin(&central, &mut PairedLookup::new(), &mut timer, LOCK).await;
        assert_eq!(step, DiscoveryStep::Failed(Error::DeviceNotFound(LOCK.into())));
        assert!(!timer.is_armed());
    }

    #[test]
    fn config_selects_strategy() {
        let mut config = SessionConfig::default();
        let strategy = strategy_for::<FakeCentral>(&config);
        assert_eq!(strategy.timeout(), Some(config.scan_timeout()));

        config.discovery = DiscoveryMode::Paired;
        let strategy = strategy_for::<FakeCentral>(&config);
        assert_eq!(strategy.timeout(), None);
    }
}
