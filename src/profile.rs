use std::time::Duration;

use crate::lifecycle::SettleDelays;
use crate::reconnect::ReconnectPolicy;

/// Endpoint paths of one task service, relative to the server base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    pub start: String,
    pub events: String,
    pub response: String,
    pub cancel: String,
}

impl EndpointPaths {
    /// `{root}`, `{root}/events`, `{root}/response`, `{root}/cancel`.
    pub fn under(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            start: root.to_owned(),
            events: format!("{root}/events"),
            response: format!("{root}/response"),
            cancel: format!("{root}/cancel"),
        }
    }
}

/// Everything that differs between task services sharing this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    pub id_prefix: String,
    pub endpoints: EndpointPaths,
    pub reconnect: ReconnectPolicy,
    pub settle: SettleDelays,
    pub completion_prefers_result_summary: bool,
}

impl ServiceProfile {
    pub fn new(id_prefix: impl Into<String>, endpoints: EndpointPaths) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            endpoints,
            reconnect: ReconnectPolicy::default(),
            settle: SettleDelays::default(),
            completion_prefers_result_summary: false,
        }
    }

    /// Slash-command runner.
    pub fn auto_command() -> Self {
        Self::new("msg", EndpointPaths::under("/api/auto-command"))
    }

    /// Code-writing runs; completion reports the result summary.
    pub fn coding() -> Self {
        Self::new("coding", EndpointPaths::under("/api/coding-command"))
            .with_settle(SettleDelays::uniform(Duration::from_millis(300)))
            .with_completion_summary(true)
    }

    /// Agentic edit runs share the auto-command endpoints.
    pub fn agentic_edit() -> Self {
        Self::new("agentic", EndpointPaths::under("/api/auto-command"))
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_settle(mut self, settle: SettleDelays) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_completion_summary(mut self, prefer: bool) -> Self {
        self.completion_prefers_result_summary = prefer;
        self
    }

    pub fn with_endpoints(mut self, endpoints: EndpointPaths) -> Self {
        self.endpoints = endpoints;
        self
    }
}

impl Default for ServiceProfile {
    fn default() -> Self {
        Self::auto_command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_hang_off_a_single_root() {
        let paths = EndpointPaths::under("/api/coding-command/");

        assert_eq!(paths.start, "/api/coding-command");
        assert_eq!(paths.events, "/api/coding-command/events");
        assert_eq!(paths.response, "/api/coding-command/response");
        assert_eq!(paths.cancel, "/api/coding-command/cancel");
    }

    #[test]
    fn presets_differ_only_where_services_differ() {
        let auto = ServiceProfile::auto_command();
        let coding = ServiceProfile::coding();
        let agentic = ServiceProfile::agentic_edit();

        assert_eq!(auto.id_prefix, "msg");
        assert_eq!(auto.settle.on_completion, Duration::from_millis(1000));
        assert_eq!(coding.settle.on_completion, Duration::from_millis(300));
        assert!(coding.completion_prefers_result_summary);
        assert_eq!(agentic.endpoints, auto.endpoints);
        assert_eq!(agentic.reconnect, ReconnectPolicy::default());
    }
}
