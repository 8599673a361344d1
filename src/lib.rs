pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod invoker;
pub mod logging;
pub mod remote;
pub mod runtime;
pub mod store;
pub mod vm;

pub use artifact::{ArtifactStager, StagedArtifact};
pub use config::Config;
pub use error::{ErrorKind, ExecutionError, FnBoxError, Result};
pub use invoker::{FunctionInvoker, FunctionRunner};
pub use remote::{ChannelCredentials, ExecutionClient, ExecutionRequest};
pub use runtime::Runtime;
pub use vm::{VmPool, VmSession, VmState};
