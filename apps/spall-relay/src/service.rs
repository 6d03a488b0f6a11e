use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::{
    admission::AdmissionGate,
    buffer::TraceBuffer,
    ingest::MAX_INGEST_READ,
};

/// Process-wide relay state, built once at startup and shared by the ingest
/// loop and every viewer connection.
pub struct RelayService {
    buffer: TraceBuffer,
    gate: AdmissionGate,
    max_ingest_bytes: usize,
    viewers: AtomicUsize,
    ingest_accepted: AtomicU64,
    ingest_rejected: AtomicU64,
    ingest_failed: AtomicU64,
    metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceStats {
    pub fill_cursor: usize,
    pub buffer_capacity: usize,
    pub ingest_in_flight: usize,
    pub ingest_accepted_total: u64,
    pub ingest_rejected_total: u64,
    pub ingest_failed_total: u64,
    pub active_viewers: usize,
}

impl RelayService {
    pub fn new(max_ingest_bytes: usize) -> Self {
        Self {
            buffer: TraceBuffer::new(),
            gate: AdmissionGate::new(),
            max_ingest_bytes,
            viewers: AtomicUsize::new(0),
            ingest_accepted: AtomicU64::new(0),
            ingest_rejected: AtomicU64::new(0),
            ingest_failed: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn buffer(&self) -> &TraceBuffer {
        &self.buffer
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn max_ingest_bytes(&self) -> usize {
        self.max_ingest_bytes
    }

    pub fn active_viewers(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }

    pub(crate) fn on_ingest_accepted(&self) {
        self.ingest_accepted.fetch_add(1, Ordering::Relaxed);
        counter!("spall_relay_ingest_sessions_total", "outcome" => "accepted").increment(1);
    }

    pub(crate) fn on_ingest_rejected(&self) {
        self.ingest_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("spall_relay_ingest_sessions_total", "outcome" => "rejected").increment(1);
    }

    pub(crate) fn on_ingest_failed(&self) {
        self.ingest_failed.fetch_add(1, Ordering::Relaxed);
        counter!("spall_relay_ingest_sessions_total", "outcome" => "failed").increment(1);
    }

    pub(crate) fn on_ingest_appended(&self, bytes: usize, fill_cursor: usize) {
        counter!("spall_relay_ingest_bytes_total").increment(bytes as u64);
        gauge!("spall_relay_buffer_fill_bytes").set(fill_cursor as f64);
    }

    pub(crate) fn on_viewer_connected(&self) -> usize {
        let active = self.viewers.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("spall_relay_viewers_active").set(active as f64);
        active
    }

    pub(crate) fn on_viewer_disconnected(&self) -> usize {
        let active = self.viewers.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!("spall_relay_viewers_active").set(active as f64);
        active
    }

    pub(crate) fn on_delta_sent(&self, bytes: usize) {
        counter!("spall_relay_deltas_sent_total").increment(1);
        counter!("spall_relay_relayed_bytes_total").increment(bytes as u64);
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            fill_cursor: self.buffer.fill_cursor(),
            buffer_capacity: self.buffer.capacity(),
            ingest_in_flight: self.gate.in_flight(),
            ingest_accepted_total: self.ingest_accepted.load(Ordering::Relaxed),
            ingest_rejected_total: self.ingest_rejected.load(Ordering::Relaxed),
            ingest_failed_total: self.ingest_failed.load(Ordering::Relaxed),
            active_viewers: self.active_viewers(),
        }
    }

    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}

impl Default for RelayService {
    fn default() -> Self {
        Self::new(MAX_INGEST_READ)
    }
}
