//! Per-device poll scheduling: independent timers, store-gated ticks,
//! bounded result history, and reconciliation against the configuration
//! store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use uuid::Uuid;

use crate::models::metric::TransmitterMetricData;
use crate::models::transmitter::Transmitter;
use crate::oid::expand_poll_set;
use crate::parser;
use crate::snmp::{DeviceSession, SnmpEndpoint, varbinds_to_map};
use crate::store::Store;

/// Results retained per device; one device's traffic never evicts
/// another's history.
const RING_CAP: usize = 100;

/// Upper bound on any merged result query.
const MERGED_CAP: usize = 1000;

/// Window consulted by the online heuristic.
const STATUS_WINDOW: usize = 10;

/// Failures tolerated inside the window before a device counts as down.
const STATUS_FAILURE_LIMIT: usize = 5;

/// Floor for configured poll cadence.
const MIN_POLL_INTERVAL_MS: i64 = 1000;

/// Outcome of one poll tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub device_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub data: Option<TransmitterMetricData>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub device_count: usize,
    pub results_buffered: usize,
}

struct DeviceSlot {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

type ResultRings = HashMap<Uuid, VecDeque<PollResult>>;

struct Inner {
    store: Store,
    devices: RwLock<HashMap<Uuid, DeviceSlot>>,
    rings: RwLock<ResultRings>,
    running: AtomicBool,
}

pub struct PollScheduler {
    inner: Arc<Inner>,
}

impl PollScheduler {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                devices: RwLock::new(HashMap::new()),
                rings: RwLock::new(ResultRings::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Stop all timers, rebuild the device table from the store, and
    /// restart scheduling. Result history survives the reload.
    pub async fn reload_from_store(&self) -> anyhow::Result<()> {
        self.stop_tasks().await;

        let transmitters = self.inner.store.list_transmitters().await?;
        let total = transmitters.len();
        let mut devices = self.inner.devices.write().await;
        for t in transmitters {
            if !t.is_active {
                continue;
            }
            devices.insert(t.id, spawn_slot(&self.inner, t));
        }
        self.inner.running.store(true, Ordering::SeqCst);
        tracing::info!(
            scheduled = devices.len(),
            configured = total,
            "poller reloaded from store"
        );
        Ok(())
    }

    /// Replace a single device's slot. The old task is stopped first, so a
    /// changed connection tuple always gets a fresh session before the next
    /// poll.
    pub async fn update_device(&self, device: Transmitter) {
        let mut devices = self.inner.devices.write().await;
        if let Some(slot) = devices.remove(&device.id) {
            let _ = slot.shutdown.send(true);
            let _ = slot.task.await;
        }
        if device.is_active && self.is_running() {
            tracing::info!(device = %device.name, "device rescheduled");
            devices.insert(device.id, spawn_slot(&self.inner, device));
        }
    }

    /// Cancel all timers and wait for in-flight polls to resolve. UDP
    /// round-trips in progress run to completion or their timeout.
    pub async fn stop(&self) {
        self.stop_tasks().await;
        self.inner.running.store(false, Ordering::SeqCst);
        tracing::info!("poller stopped");
    }

    async fn stop_tasks(&self) {
        let mut devices = self.inner.devices.write().await;
        for (_, slot) in devices.drain() {
            let _ = slot.shutdown.send(true);
            let _ = slot.task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let device_count = self.inner.devices.read().await.len();
        let results_buffered = self.inner.rings.read().await.values().map(VecDeque::len).sum();
        SchedulerStatus {
            running: self.is_running(),
            device_count,
            results_buffered,
        }
    }

    /// Recorded results, newest first.
    pub async fn results(&self, device: Option<Uuid>, limit: usize) -> Vec<PollResult> {
        let rings = self.inner.rings.read().await;
        merged_results(&rings, device, limit)
    }

    pub async fn clear_results(&self) {
        self.inner.rings.write().await.clear();
    }

    pub async fn device_status(&self, id: Uuid) -> DeviceStatus {
        let scheduled = self.inner.devices.read().await.contains_key(&id);
        let rings = self.inner.rings.read().await;
        status_from_ring(rings.get(&id), scheduled)
    }
}

fn spawn_slot(inner: &Arc<Inner>, device: Transmitter) -> DeviceSlot {
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(run_device(inner.clone(), device, rx));
    DeviceSlot { shutdown, task }
}

async fn run_device(inner: Arc<Inner>, device: Transmitter, mut shutdown: watch::Receiver<bool>) {
    let endpoint = SnmpEndpoint::from_transmitter(&device);
    let mut session = DeviceSession::new(endpoint);
    let oids = expand_poll_set(&device.oids);
    let period = (device.poll_interval as i64).max(MIN_POLL_INTERVAL_MS) as u64;

    let mut ticker = interval(Duration::from_millis(period));
    // Reschedule only after the current poll resolves; a slow poll must not
    // pile up concurrent requests for the same device.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        device = %device.name,
        host = %device.snmp_host,
        interval_ms = period,
        oids = oids.len(),
        "polling started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        // Re-check the activity gates right before the GET to close the
        // race between scheduling and execution.
        if !gate_allows(&inner.store, &device).await {
            tracing::debug!(device = %device.name, "tick skipped, gated off");
            continue;
        }

        let result = poll_once(&mut session, &device, &oids).await;
        record(&inner, result).await;
    }

    session.close();
    tracing::debug!(device = %device.name, "polling stopped");
}

/// Activity gate: transmitter flag, then the owning site's flag. A storage
/// fault defaults to allow so polling never stalls on a flaky database.
async fn gate_allows(store: &Store, device: &Transmitter) -> bool {
    let transmitter = match store.get_transmitter(device.id).await {
        Ok(Some(t)) => t,
        Ok(None) => return false,
        Err(e) => {
            tracing::debug!(device = %device.name, error = %e, "gate check failed, allowing");
            return true;
        }
    };
    if !transmitter.is_active {
        return false;
    }
    match store.get_site(transmitter.site_id).await {
        Ok(Some(site)) => site.is_active,
        Ok(None) => true,
        Err(e) => {
            tracing::debug!(device = %device.name, error = %e, "gate check failed, allowing");
            true
        }
    }
}

async fn poll_once(
    session: &mut DeviceSession,
    device: &Transmitter,
    oids: &[String],
) -> PollResult {
    match session.get_many(oids).await {
        Ok(varbinds) => {
            let data = parser::parse_metrics(varbinds_to_map(varbinds));
            PollResult {
                device_id: device.id,
                timestamp: data.timestamp,
                success: true,
                data: Some(data),
                error: None,
            }
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(device = %device.name, error = %message, "poll failed");
            let data = TransmitterMetricData::failure(message.clone());
            PollResult {
                device_id: device.id,
                timestamp: data.timestamp,
                success: false,
                data: Some(data),
                error: Some(message),
            }
        }
    }
}

/// Record into the bounded ring and hand the observation to the store.
/// Storage failures are logged and dropped, never propagated.
async fn record(inner: &Arc<Inner>, result: PollResult) {
    {
        let mut rings = inner.rings.write().await;
        push_result(&mut rings, result.clone());
    }

    if let Some(data) = result.data {
        let store = inner.store.clone();
        let device_id = result.device_id;
        tokio::spawn(async move {
            if let Err(e) = store.store_metrics(device_id, &data).await {
                tracing::warn!(%device_id, error = %e, "metric write dropped");
            }
        });
    }
}

fn push_result(rings: &mut ResultRings, result: PollResult) {
    let ring = rings.entry(result.device_id).or_default();
    if ring.len() >= RING_CAP {
        ring.pop_front();
    }
    ring.push_back(result);
}

fn merged_results(rings: &ResultRings, device: Option<Uuid>, limit: usize) -> Vec<PollResult> {
    let mut out: Vec<PollResult> = match device {
        Some(id) => rings
            .get(&id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default(),
        None => rings.values().flat_map(|r| r.iter().cloned()).collect(),
    };
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out.truncate(limit.min(MERGED_CAP));
    out
}

fn status_from_ring(ring: Option<&VecDeque<PollResult>>, scheduled: bool) -> DeviceStatus {
    let Some(ring) = ring else {
        return DeviceStatus {
            online: false,
            last_seen: None,
            error_count: 0,
        };
    };
    let window: Vec<&PollResult> = ring.iter().rev().take(STATUS_WINDOW).collect();
    let error_count = window.iter().filter(|r| !r.success).count();
    let successes = window.len() - error_count;
    let last_seen = ring.iter().rev().find(|r| r.success).map(|r| r.timestamp);
    DeviceStatus {
        online: scheduled && successes >= 1 && error_count < STATUS_FAILURE_LIMIT,
        last_seen,
        error_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn result(device_id: Uuid, success: bool, offset_secs: i64) -> PollResult {
        PollResult {
            device_id,
            timestamp: Utc::now() + TimeDelta::seconds(offset_secs),
            success,
            data: None,
            error: (!success).then(|| "request timeout".to_string()),
        }
    }

    #[test]
    fn ring_is_bounded_per_device() {
        let id = Uuid::new_v4();
        let mut rings = ResultRings::new();
        for i in 0..(RING_CAP as i64 + 250) {
            push_result(&mut rings, result(id, true, i));
        }
        let ring = rings.get(&id).unwrap();
        assert_eq!(ring.len(), RING_CAP);
        // Oldest entries were evicted; the newest survives at the back.
        let newest = ring.back().unwrap().timestamp;
        let oldest = ring.front().unwrap().timestamp;
        assert!(newest > oldest);
    }

    #[test]
    fn merged_results_newest_first_and_capped() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rings = ResultRings::new();
        for i in 0..50 {
            push_result(&mut rings, result(a, true, i * 2));
            push_result(&mut rings, result(b, false, i * 2 + 1));
        }
        let merged = merged_results(&rings, None, 30);
        assert_eq!(merged.len(), 30);
        for pair in merged.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }

        let only_a = merged_results(&rings, Some(a), 1000);
        assert_eq!(only_a.len(), 50);
        assert!(only_a.iter().all(|r| r.device_id == a));
    }

    #[test]
    fn merged_results_hard_cap() {
        let mut rings = ResultRings::new();
        for _ in 0..15 {
            let id = Uuid::new_v4();
            for i in 0..RING_CAP as i64 {
                push_result(&mut rings, result(id, true, i));
            }
        }
        let merged = merged_results(&rings, None, usize::MAX);
        assert_eq!(merged.len(), MERGED_CAP);
    }

    #[test]
    fn online_requires_a_success_and_few_failures() {
        let id = Uuid::new_v4();
        let mut rings = ResultRings::new();

        // 10 failures: down.
        for i in 0..10 {
            push_result(&mut rings, result(id, false, i));
        }
        let status = status_from_ring(rings.get(&id), true);
        assert!(!status.online);
        assert_eq!(status.error_count, 10);
        assert!(status.last_seen.is_none());

        // Successes push failures out of the window.
        for i in 10..16 {
            push_result(&mut rings, result(id, true, i));
        }
        let status = status_from_ring(rings.get(&id), true);
        assert!(status.online);
        assert_eq!(status.error_count, 4);
        assert!(status.last_seen.is_some());
    }

    #[test]
    fn exactly_five_failures_in_window_is_down() {
        let id = Uuid::new_v4();
        let mut rings = ResultRings::new();
        for i in 0..5 {
            push_result(&mut rings, result(id, true, i));
        }
        for i in 5..10 {
            push_result(&mut rings, result(id, false, i));
        }
        let status = status_from_ring(rings.get(&id), true);
        assert_eq!(status.error_count, 5);
        assert!(!status.online);
    }

    #[test]
    fn unscheduled_device_reports_offline_despite_history() {
        let id = Uuid::new_v4();
        let mut rings = ResultRings::new();
        for i in 0..10 {
            push_result(&mut rings, result(id, true, i));
        }
        let status = status_from_ring(rings.get(&id), false);
        assert!(!status.online);
        // History is still visible even though the device is gone.
        assert!(status.last_seen.is_some());
    }

    #[test]
    fn unknown_device_status_is_empty() {
        let rings = ResultRings::new();
        let status = status_from_ring(rings.get(&Uuid::new_v4()), false);
        assert!(!status.online);
        assert_eq!(status.error_count, 0);
        assert!(status.last_seen.is_none());
    }
}
