//! Audit records and sinks.
//!
//! # Purpose
//! One [`AuditRecord`] is emitted per `authorize` call. Sinks are best-effort:
//! `record` must not block the decision path and cannot fail it.
use crate::decision::{DecisionReason, Outcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimsSource {
    Cache,
    Verified,
    /// No claims were established (invalid token or internal fault).
    None,
}

impl ClaimsSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimsSource::Cache => "cache",
            ClaimsSource::Verified => "verified",
            ClaimsSource::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub timestamp_ms: u64,
    pub subject: Option<String>,
    pub tenant: Option<String>,
    pub destination_workload: String,
    pub outcome: Outcome,
    pub matched_rule: Option<String>,
    pub reason: DecisionReason,
    pub claims_source: ClaimsSource,
    pub internal_error: bool,
    pub duration_us: u64,
}

impl AuditRecord {
    pub(crate) fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes each record as a structured event under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "audit",
            timestamp_ms = record.timestamp_ms,
            subject = record.subject.as_deref().unwrap_or(""),
            tenant = record.tenant.as_deref().unwrap_or(""),
            destination = %record.destination_workload,
            outcome = record.outcome.as_str(),
            matched_rule = record.matched_rule.as_deref().unwrap_or(""),
            reason = record.reason.as_str(),
            claims_source = record.claims_source.as_str(),
            internal_error = record.internal_error,
            duration_us = record.duration_us,
            "authorization decision"
        );
    }
}

/// Hands records to a bounded channel. Records are dropped, and counted, when
/// the consumer falls behind or has gone away.
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditRecord>,
    dropped: AtomicU64,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, record: AuditRecord) {
        if self.tx.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("warden_audit_dropped_total").increment(1);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: AuditRecord) {}
}
