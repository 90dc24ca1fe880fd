//! Dispatch table keyed by operation kind.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::debug;

use super::{Callback, OperationState, Plugin};
use crate::core::OperationKind;
use crate::error::{RegistrationError, TenancyResult};

/// Ordered callbacks for each [`OperationKind`].
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    callbacks: [Vec<Arc<dyn Callback>>; 6],
    plugins: Vec<String>,
}

impl Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in OperationKind::ALL {
            map.entry(&kind, &self.names(kind));
        }
        map.finish()
    }
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` at one interception point.
    pub fn register(
        &mut self,
        kind: OperationKind,
        callback: Arc<dyn Callback>,
    ) -> Result<(), RegistrationError> {
        let slot = &mut self.callbacks[kind.index()];
        if slot.iter().any(|c| c.name() == callback.name()) {
            return Err(RegistrationError::DuplicateCallback {
                name: callback.name().to_string(),
                kind,
            });
        }
        debug!(callback = callback.name(), %kind, "Registered callback");
        slot.push(callback);
        Ok(())
    }

    /// Registers the same `callback` at every interception point.
    ///
    /// Nothing is registered if any point already has a callback with this name.
    pub fn register_all(&mut self, callback: Arc<dyn Callback>) -> Result<(), RegistrationError> {
        for kind in OperationKind::ALL {
            if self.contains(kind, callback.name()) {
                return Err(RegistrationError::DuplicateCallback {
                    name: callback.name().to_string(),
                    kind,
                });
            }
        }
        for kind in OperationKind::ALL {
            self.register(kind, Arc::clone(&callback))?;
        }
        Ok(())
    }

    /// Initializes a plugin, rejecting a second plugin with the same name.
    pub fn use_plugin(&mut self, plugin: &dyn Plugin) -> Result<(), RegistrationError> {
        if self.plugins.iter().any(|p| p == plugin.name()) {
            return Err(RegistrationError::DuplicatePlugin {
                name: plugin.name().to_string(),
            });
        }
        plugin.initialize(self)?;
        self.plugins.push(plugin.name().to_string());
        Ok(())
    }

    /// Returns `true` if a callback named `name` is registered at `kind`.
    pub fn contains(&self, kind: OperationKind, name: &str) -> bool {
        self.callbacks[kind.index()].iter().any(|c| c.name() == name)
    }

    /// Returns callback names registered at `kind`, in dispatch order.
    pub fn names(&self, kind: OperationKind) -> Vec<&str> {
        self.callbacks[kind.index()]
            .iter()
            .map(|c| c.name())
            .collect()
    }

    /// Returns the names of initialized plugins.
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Runs every callback registered for the state's kind, stopping at the first error.
    pub async fn run_before(&self, state: &mut OperationState<'_>) -> TenancyResult<()> {
        for callback in &self.callbacks[state.kind.index()] {
            callback.before(state).await?;
        }
        Ok(())
    }
}
