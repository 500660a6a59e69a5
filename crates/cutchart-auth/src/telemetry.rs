//! Telemetry collaborator
//!
//! The lifecycle manager reports through this trait and never hands it a
//! token: only event names, non-secret claims, and free-form trace text.

use tracing::{debug, info};

use crate::claims::IdentityClaims;

/// Event sink. Recording is fire-and-forget; implementations must not fail
/// the caller.
pub trait Telemetry: Send + Sync {
    fn record_event(&self, name: &str, properties: &[(&'static str, String)]);

    fn record_trace(&self, message: &str);

    fn set_session(&self, session_id: &str);

    fn set_user(&self, claims: &IdentityClaims);
}

/// Writes telemetry as structured `tracing` events under the
/// `telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record_event(&self, name: &str, properties: &[(&'static str, String)]) {
        let properties = properties
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "telemetry", event = name, properties = %properties, "telemetry event");
    }

    fn record_trace(&self, message: &str) {
        debug!(target: "telemetry", message);
    }

    fn set_session(&self, session_id: &str) {
        debug!(target: "telemetry", session_id, "telemetry session set");
    }

    fn set_user(&self, claims: &IdentityClaims) {
        debug!(
            target: "telemetry",
            user_name = %claims.name,
            user_email = %claims.email,
            user_subject = %claims.subject,
            "telemetry user set"
        );
    }
}
