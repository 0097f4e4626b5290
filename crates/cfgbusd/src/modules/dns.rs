//! Resolver settings kept in memory behind the configuration lock.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::router::{ActionContext, ActionSpec, DataShape, HandlerError, Module, ModuleDeps};
use crate::sync::RwLock;

const SETTINGS_KEYS: &[&str] = &["forwarding_enabled", "dnssec_enabled", "dns_from_dhcp_enabled"];

const ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "get_settings",
        mutating: false,
        request: None,
        reply: DataShape::new(SETTINGS_KEYS, &[]),
    },
    ActionSpec {
        name: "update_settings",
        mutating: true,
        request: Some(DataShape::new(SETTINGS_KEYS, &[])),
        reply: DataShape::new(&["result"], &[]),
    },
];

/// Resolver switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSettings {
    /// Forward queries to upstream resolvers.
    pub forwarding_enabled: bool,
    /// Validate DNSSEC signatures.
    pub dnssec_enabled: bool,
    /// Resolve names of DHCP clients.
    pub dns_from_dhcp_enabled: bool,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            forwarding_enabled: true,
            dnssec_enabled: true,
            dns_from_dhcp_enabled: false,
        }
    }
}

/// The `dns` module.
#[derive(Debug)]
pub struct Dns {
    lock: RwLock,
    settings: Mutex<DnsSettings>,
}

impl Dns {
    /// Creates the module with default settings.
    #[must_use]
    pub fn new(lock: RwLock) -> Self {
        Self {
            lock,
            settings: Mutex::new(DnsSettings::default()),
        }
    }

    fn current(&self) -> DnsSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_settings(&self) -> Result<Value, HandlerError> {
        let settings = self.lock.with_read("dns.get_settings", || self.current());
        serde_json::to_value(settings).map_err(|error| HandlerError::failed(error.to_string()))
    }

    fn update_settings(&self, data: Option<Value>, ctx: &ActionContext) -> Result<Value, HandlerError> {
        let data = data.ok_or_else(|| HandlerError::invalid_data("settings are missing"))?;
        let settings: DnsSettings = serde_json::from_value(data.clone())
            .map_err(|error| HandlerError::invalid_data(error.to_string()))?;
        self.lock.with_write("dns.update_settings", || {
            *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
        });
        ctx.notify("update_settings", Some(data));
        Ok(json!({ "result": true }))
    }
}

/// Registers [`Dns`] with the shared configuration lock.
pub fn factory(deps: &ModuleDeps) -> Arc<dyn Module> {
    Arc::new(Dns::new(deps.lock.clone()))
}

impl Module for Dns {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn actions(&self) -> &'static [ActionSpec] {
        ACTIONS
    }

    fn handle(
        &self,
        action: &str,
        data: Option<Value>,
        ctx: &ActionContext,
    ) -> Result<Value, HandlerError> {
        match action {
            "get_settings" => self.get_settings(),
            "update_settings" => self.update_settings(data, ctx),
            other => Err(HandlerError::failed(format!("unsupported action '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use cfgbus_config::LockBackend;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::notify::NotificationSender;

    #[fixture]
    fn dns() -> Dns {
        Dns::new(RwLock::new(LockBackend::Thread).expect("thread lock"))
    }

    #[rstest]
    fn reports_default_settings(dns: Dns) {
        let ctx = ActionContext::new("dns", NotificationSender::discard());
        let reply = dns.handle("get_settings", None, &ctx).expect("settings");
        assert_eq!(
            reply,
            json!({"forwarding_enabled": true, "dnssec_enabled": true, "dns_from_dhcp_enabled": false})
        );
    }

    #[rstest]
    fn update_is_stored_and_announced(dns: Dns) {
        let ctx = ActionContext::new("dns", NotificationSender::discard());
        let update =
            json!({"forwarding_enabled": false, "dnssec_enabled": false, "dns_from_dhcp_enabled": true});

        let reply = dns
            .handle("update_settings", Some(update.clone()), &ctx)
            .expect("update");
        assert_eq!(reply, json!({"result": true}));
        assert_eq!(
            ctx.take_pending(),
            vec![("update_settings".to_owned(), Some(update.clone()))]
        );
        assert_eq!(dns.handle("get_settings", None, &ctx).expect("settings"), update);
        assert!(ctx.take_pending().is_empty());
    }

    #[rstest]
    fn wrongly_typed_settings_are_rejected(dns: Dns) {
        let ctx = ActionContext::new("dns", NotificationSender::discard());
        let update =
            json!({"forwarding_enabled": "yes", "dnssec_enabled": false, "dns_from_dhcp_enabled": true});
        let error = dns
            .handle("update_settings", Some(update), &ctx)
            .expect_err("string is not a bool");
        assert!(matches!(error, HandlerError::InvalidData(_)));
        assert_eq!(dns.current(), DnsSettings::default());
    }
}
