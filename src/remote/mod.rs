pub mod channel;
pub mod classify;
pub mod client;
pub mod ssh;

pub use channel::{ChannelConnector, ChannelCredentials, ChannelError, CommandOutput, RemoteChannel};
pub use classify::classify_output;
pub use client::{ExecutionClient, ExecutionRequest};
pub use ssh::{OpenSshChannel, OpenSshConnector};
