pub mod admin;
pub mod builtin;
pub mod lookup;
pub mod process;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;
pub mod traits;

pub use registry::{Entry, Registry, Resolved, LEAVE};
pub use traits::{Action, ActionContext, ActionError, ActionSpec, Invocation};
