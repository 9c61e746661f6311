pub mod context;
pub mod db;
pub mod error;
pub mod network;
pub mod realtime;
pub mod settings;
pub mod store;
pub mod sync;
pub mod types;
pub mod worker;
