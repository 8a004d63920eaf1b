//! Core library for the Buran ephemeral node manager.
//!
//! The crate provisions short-lived compute instances against any cloud
//! provider that implements [`ProviderGateway`], drives them through a
//! create → wait → use → destroy lifecycle that tolerates eventual
//! consistency, and ties instance lifetime to a unit of work via
//! [`ScopedNodeManager`].

pub mod config;
pub mod keys;
pub mod lifecycle;
pub mod provider;
pub mod scoped;
pub mod session;
pub mod telemetry;
pub mod test_support;

pub use config::{ConfigError, NodeConfig};
pub use keys::{KeyError, KeyPair};
pub use lifecycle::{
    DestroyPolicy, ImageSource, KeyDeliveryProfile, NodeError, NodeLifecycle, NodeSpec,
    NodeSpecBuilder, NodeSpecError, NodeState, ReadyPolicy, SizeSource,
};
pub use provider::{
    CreateParams, GatewayFuture, ImageRef, InstanceHandle, NodeStatus, ProviderGateway, SizeRef,
};
pub use scoped::{ScopedError, ScopedNodeManager};
pub use session::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput, RemoteSession,
    SessionError, SessionOptions,
};
pub use telemetry::TelemetryError;
