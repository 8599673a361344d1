pub mod controller;
pub mod pool;
pub mod session;

pub use controller::{LifecycleError, ScriptVmController, VmController};
pub use pool::{VmLease, VmPool};
pub use session::{VmSession, VmState};
