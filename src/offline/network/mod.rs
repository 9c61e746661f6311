//! Network status monitoring

pub mod monitor;
pub mod probe;

pub use monitor::{NetworkMonitor, OnlineStatusCallback, OnlineStatusSubscription};
pub use probe::{ConnectivityProbe, HttpProbe};
