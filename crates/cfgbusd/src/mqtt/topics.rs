//! Topic layout of the MQTT bus.

const ROOT: &str = "cfgbus";

/// Builds and parses topics under one controller id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    controller_id: String,
}

impl Topics {
    /// Topic namespace for `controller_id`.
    #[must_use]
    pub fn new(controller_id: impl Into<String>) -> Self {
        Self {
            controller_id: controller_id.into(),
        }
    }

    /// Subscription filter covering every action of `module`.
    #[must_use]
    pub fn request_filter(&self, module: &str) -> String {
        format!("{ROOT}/{}/request/{module}/action/+", self.controller_id)
    }

    /// Topic a caller publishes to for `module`/`action`.
    #[must_use]
    pub fn request(&self, module: &str, action: &str) -> String {
        format!("{ROOT}/{}/request/{module}/action/{action}", self.controller_id)
    }

    /// Topic the reply to `reply_msg_id` is published on.
    #[must_use]
    pub fn reply(&self, reply_msg_id: &str) -> String {
        format!("{ROOT}/{}/reply/{reply_msg_id}", self.controller_id)
    }

    /// Topic carrying notifications of `module`.
    #[must_use]
    pub fn notification(&self, module: &str, event: &str) -> String {
        format!("{ROOT}/{}/notification/{module}/action/{event}", self.controller_id)
    }

    /// Extracts `(module, action)` from a request topic of this controller.
    #[must_use]
    pub fn parse_request<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let mut parts = topic.split('/');
        let root = parts.next()?;
        let controller = parts.next()?;
        let request = parts.next()?;
        let module = parts.next()?;
        let action_marker = parts.next()?;
        let action = parts.next()?;
        let well_formed = root == ROOT
            && controller == self.controller_id
            && request == "request"
            && action_marker == "action"
            && !module.is_empty()
            && !action.is_empty();
        (well_formed && parts.next().is_none()).then_some((module, action))
    }
}
