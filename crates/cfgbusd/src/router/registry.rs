//! Static registration table mapping module and action names to handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use cfgbus_config::Config;
use serde_json::Value;

use crate::notify::NotificationSender;
use crate::sync::RwLock;

use super::errors::HandlerError;

/// Keys a payload may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataShape {
    /// Keys that must be present.
    pub required: &'static [&'static str],
    /// Keys that may be present.
    pub optional: &'static [&'static str],
}

impl DataShape {
    /// Builds a shape from required and optional key lists.
    #[must_use]
    pub const fn new(
        required: &'static [&'static str],
        optional: &'static [&'static str],
    ) -> Self {
        Self { required, optional }
    }

    /// Returns whether `key` is declared by this shape.
    #[must_use]
    pub fn allows(&self, key: &str) -> bool {
        self.required.contains(&key) || self.optional.contains(&key)
    }
}

/// Declaration of one action exposed by a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    /// Action name as it appears in envelopes.
    pub name: &'static str,
    /// Whether the action changes configuration.
    pub mutating: bool,
    /// Request data shape; `None` when the action takes no data.
    pub request: Option<DataShape>,
    /// Reply data shape.
    pub reply: DataShape,
}

/// A feature module with a fixed action set.
pub trait Module: Send + Sync {
    /// Module name used for routing.
    fn name(&self) -> &'static str;

    /// Actions the module handles.
    fn actions(&self) -> &'static [ActionSpec];

    /// Handles one validated request.
    fn handle(
        &self,
        action: &str,
        data: Option<Value>,
        ctx: &ActionContext,
    ) -> Result<Value, HandlerError>;
}

/// Shared collaborators handed to every module factory.
#[derive(Debug, Clone)]
pub struct ModuleDeps {
    /// Immutable daemon configuration.
    pub config: Arc<Config>,
    /// Lock serialising access to the configuration backend.
    pub lock: RwLock,
}

/// Constructor registered for each built-in module.
pub type ModuleFactory = fn(&ModuleDeps) -> Arc<dyn Module>;

/// Modules resolved once at startup.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Builds the registry from `factories`, keeping only modules named by
    /// the configured allow-list when one is set.
    #[must_use]
    pub fn build(factories: &[ModuleFactory], deps: &ModuleDeps) -> Self {
        let filter = deps.config.module_filter();
        let mut registry = Self::default();
        for factory in factories {
            let module = factory(deps);
            if filter.is_empty() || filter.iter().any(|name| name == module.name()) {
                registry.register(module);
            }
        }
        registry
    }

    /// Adds `module`, replacing any module registered under the same name.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name(), module);
    }

    /// Looks up the module and action declaration for a route.
    #[must_use]
    pub fn resolve(&self, module: &str, action: &str) -> Option<(&Arc<dyn Module>, &ActionSpec)> {
        let handler = self.modules.get(module)?;
        let spec = handler.actions().iter().find(|spec| spec.name == action)?;
        Some((handler, spec))
    }

    /// Registered module names in sorted order.
    pub fn module_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.keys().copied()
    }

    /// Action names `module` declares, empty when it is not registered.
    #[must_use]
    pub fn action_names(&self, module: &str) -> Vec<&'static str> {
        self.modules
            .get(module)
            .map(|handler| handler.actions().iter().map(|spec| spec.name).collect())
            .unwrap_or_default()
    }

    /// Returns a registry holding only `name`.
    #[must_use]
    pub fn only(&self, name: &str) -> Self {
        let modules = self
            .modules
            .iter()
            .filter(|(module, _)| **module == name)
            .map(|(module, handler)| (*module, Arc::clone(handler)))
            .collect();
        Self { modules }
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.modules.keys()).finish()
    }
}

/// Notification raised by a handler, held until the request succeeds.
pub(crate) type PendingNotification = (String, Option<Value>);

/// Per-request context handed to module handlers.
#[derive(Debug)]
pub struct ActionContext {
    module: &'static str,
    notifications: NotificationSender,
    pending: Mutex<Vec<PendingNotification>>,
}

impl ActionContext {
    pub(crate) const fn new(module: &'static str, notifications: NotificationSender) -> Self {
        Self {
            module,
            notifications,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queues `event` from the current module.
    ///
    /// The router broadcasts queued events once the request has produced a
    /// valid reply for a mutating action, and drops them otherwise.
    pub fn notify(&self, event: &str, data: Option<Value>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_owned(), data));
    }

    /// Removes and returns the queued events.
    pub(crate) fn take_pending(&self) -> Vec<PendingNotification> {
        mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Broadcasts every queued event.
    pub(crate) fn publish_pending(&self) {
        for (event, data) in self.take_pending() {
            self.notifications.notify(self.module, &event, data);
        }
    }

    /// Returns a notifier that outlives the request, for exit handlers of
    /// supervised commands.
    #[must_use]
    pub fn notifier(&self) -> ModuleNotifier {
        ModuleNotifier {
            module: self.module,
            notifications: self.notifications.clone(),
        }
    }
}

/// Detached notification handle bound to one module.
#[derive(Debug, Clone)]
pub struct ModuleNotifier {
    module: &'static str,
    notifications: NotificationSender,
}

impl ModuleNotifier {
    /// Broadcasts `event` from the bound module.
    pub fn notify(&self, event: &str, data: Option<Value>) {
        self.notifications.notify(self.module, event, data);
    }

    /// Asks the transport notifier to reopen its connection.
    pub fn reset(&self) {
        self.notifications.reset();
    }
}

#[cfg(test)]
mod tests {
    use cfgbus_config::LockBackend;
    use rstest::{fixture, rstest};

    use super::*;

    struct Named(&'static str);

    const ACTIONS: &[ActionSpec] = &[ActionSpec {
        name: "get",
        mutating: false,
        request: None,
        reply: DataShape::new(&[], &[]),
    }];

    impl Module for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn actions(&self) -> &'static [ActionSpec] {
            ACTIONS
        }

        fn handle(
            &self,
            _action: &str,
            _data: Option<Value>,
            _ctx: &ActionContext,
        ) -> Result<Value, HandlerError> {
            Ok(Value::Null)
        }
    }

    fn alpha(_: &ModuleDeps) -> Arc<dyn Module> {
        Arc::new(Named("alpha"))
    }

    fn beta(_: &ModuleDeps) -> Arc<dyn Module> {
        Arc::new(Named("beta"))
    }

    fn deps(modules: Option<&str>) -> ModuleDeps {
        let config = Config {
            modules: modules.map(str::to_owned),
            ..Config::default()
        };
        ModuleDeps {
            config: Arc::new(config),
            lock: RwLock::new(LockBackend::Thread).expect("thread lock"),
        }
    }

    #[fixture]
    fn registry() -> ModuleRegistry {
        ModuleRegistry::build(&[alpha, beta], &deps(None))
    }

    #[rstest]
    fn resolves_known_routes(registry: ModuleRegistry) {
        let (module, spec) = registry.resolve("beta", "get").expect("route");
        assert_eq!(module.name(), "beta");
        assert_eq!(spec.name, "get");
    }

    #[rstest]
    #[case::module("gamma", "get")]
    #[case::action("alpha", "set")]
    fn unknown_routes_resolve_to_none(
        registry: ModuleRegistry,
        #[case] module: &str,
        #[case] action: &str,
    ) {
        assert!(registry.resolve(module, action).is_none());
    }

    #[test]
    fn filter_limits_registered_modules() {
        let registry = ModuleRegistry::build(&[alpha, beta], &deps(Some("beta")));
        assert_eq!(registry.module_names().collect::<Vec<_>>(), ["beta"]);
    }

    #[rstest]
    fn only_selects_a_single_module(registry: ModuleRegistry) {
        let single = registry.only("alpha");
        assert_eq!(single.len(), 1);
        assert!(single.resolve("beta", "get").is_none());
    }
}
