// src/config/mod.rs
pub mod channels;
pub mod relay;

pub use channels::{ChannelsConfig, SmtpSettings};
pub use relay::{Limits, RelayConfig, Thresholds, Timeouts};
