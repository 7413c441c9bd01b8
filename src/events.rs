//! Structured events handed to the notification collaborator.
//!
//! Events are emitted only after the transaction that produced them has
//! committed, so a sink never sees state that was rolled back.

use crate::billing::InvoiceStatus;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    InvoiceStatusChanged {
        invoice_id: String,
        student_id: String,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },
    ProgressUpdated {
        student_id: String,
        course_id: String,
        from: i64,
        to: i64,
    },
    CertificateIssued {
        certificate_id: String,
        student_id: String,
        course_id: String,
        unique_id: String,
    },
}

pub trait EventSink {
    fn emit(&self, event: &EngineEvent);
}

/// Default sink: the events land in the process log.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &EngineEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => tracing::info!(target: "campusd::events", %payload, "event"),
            Err(e) => tracing::warn!(error = %e, "event serialization failed"),
        }
    }
}
