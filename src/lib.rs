pub mod api;
pub mod backend;
pub mod bridge;
pub mod callbacks;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod controller;
pub mod error;
pub mod inflight;
pub mod models;
pub mod push;
pub mod reconciler;
pub mod render;
pub mod scheduler;
pub mod settings;
pub mod simulate;
pub mod util;


pub use api::{ActionEndpoint, ApiClient};
pub use backend::{Backend, FetchParams};
pub use bridge::EventBridge;
pub use callbacks::Callbacks;
pub use connectivity::{ConnectivityState, ConnectivityTracker};
pub use controller::{ControllerOptions, ControllerState, RefreshController, RefreshOutcome};
pub use error::{CommandError, ControllerError, FailureKind, FetchError, PushError};
pub use models::{Command, CommandOutcome, Resource, Snapshot};
pub use push::{PushTransport, SocketIoTransport};
pub use reconciler::{Origin, Reconciled, Reconciler, ViewEntry};
pub use scheduler::{RefreshPolicy, Scheduler};
pub use simulate::SimulatedBackend;
