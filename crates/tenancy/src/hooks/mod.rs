//! Hook dispatch for data-access operations.
//!
//! Every operation passes through a fixed set of interception points, one per
//! [`OperationKind`]. Callbacks registered at a point run, in registration
//! order, after a connection has been bound to the operation and before the
//! statement is sent.

mod registry;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::core::{Connection, OperationKind, OperationScope};
use crate::error::{RegistrationError, TenancyResult};
use crate::tenant::RequestContext;

pub use registry::CallbackRegistry;

/// Everything a callback may look at or act on for one operation.
pub struct OperationState<'a> {
    /// The interception point being dispatched.
    pub kind: OperationKind,
    /// The request context, or `None` for administrative operations.
    pub context: Option<&'a RequestContext>,
    /// The statement or transaction scope this operation runs in.
    pub scope: &'a mut OperationScope,
    /// The connection bound to this operation.
    pub connection: &'a mut dyn Connection,
}

impl Debug for OperationState<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationState")
            .field("kind", &self.kind)
            .field("context", &self.context)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A hook invoked before an operation reaches the database.
///
/// Returning an error aborts the current operation only.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Unique name of this callback at each point it is registered.
    fn name(&self) -> &str;

    /// Runs before the operation's statement is executed.
    async fn before(&self, state: &mut OperationState<'_>) -> TenancyResult<()>;
}

/// A bundle of callbacks installed together.
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Registers this plugin's callbacks.
    fn initialize(&self, registry: &mut CallbackRegistry) -> Result<(), RegistrationError>;
}
