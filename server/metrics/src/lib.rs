pub mod config;
pub mod connection;
pub mod http;
pub mod labels;
pub mod room;

pub use config::MetricsConfig;
pub use connection::ConnectionMetrics;
pub use http::MetricsServer;
pub use labels::{BoundedLabel, LabelPolicy};
pub use room::RoomMetrics;
