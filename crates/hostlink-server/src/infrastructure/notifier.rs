//! Operator alerts for security events, written to the log.

use tracing::{debug, info, warn};

use crate::application::processor::SecurityEventSink;

/// [`SecurityEventSink`] that logs through `tracing`.
///
/// With alerts disabled the events are still logged, at `debug` only.
#[derive(Debug, Clone, Copy)]
pub struct TracingSecuritySink {
    alerts_enabled: bool,
}

impl TracingSecuritySink {
    pub fn new(alerts_enabled: bool) -> Self {
        Self { alerts_enabled }
    }

    pub fn alerts_enabled(&self) -> bool {
        self.alerts_enabled
    }
}

impl SecurityEventSink for TracingSecuritySink {
    fn authentication_failed(&self, remote_address: &str) {
        if self.alerts_enabled {
            warn!(remote = remote_address, "authentication failed");
        } else {
            debug!(remote = remote_address, "authentication failed");
        }
    }

    fn client_identified(&self, remote_address: &str) {
        if self.alerts_enabled {
            info!(remote = remote_address, "new client connected");
        } else {
            debug!(remote = remote_address, "new client connected");
        }
    }
}
