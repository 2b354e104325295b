//! Conduit core library
//!
//! Keeps supervised JSON-RPC connections to external assistant processes
//! alive over stdio, HTTP and WebSocket, and feeds errors found in
//! application logs back to them as notifications.
//!
//! # Architecture
//! - [`transport`]: one [`Transport`] trait over three wire mechanics
//! - [`rpc`]: request/response correlation and the `initialize` handshake
//! - [`supervisor`]: child processes behind stdio connections
//! - [`manager`]: named connections and their lifecycle
//! - [`logwatch`]: log tailing, error classification and debouncing
//! - [`forwarder`]: fan-out of classified errors to connections
//! - [`admin`]: start / stop / status / test over one or all connections

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod logwatch;
pub mod manager;
pub mod protocol;
pub mod rpc;
pub mod supervisor;
pub mod transport;

pub use admin::{AdminService, BatchItem, BatchReport, Target};
pub use config::{Auth, Capability, ConduitConfig, ConnectionConfig, TransportKind};
pub use error::{ConduitError, ConduitResult};
pub use forwarder::{ForwardReport, NotificationForwarder};
pub use logwatch::{ErrorEvent, ErrorKind, LogWatcher, LogWatcherRegistry, Severity, WatchError};
pub use manager::{
    ConnectionHealth, ConnectionManager, ConnectionSnapshot, ConnectionStatus, ManagerError,
    ManagerSettings,
};
pub use rpc::{RpcClient, RpcError};
pub use supervisor::{ProcessSupervisor, RestartPolicy, SupervisorError};
pub use transport::{Transport, TransportConfig, TransportError};
