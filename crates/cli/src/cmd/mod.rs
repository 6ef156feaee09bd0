mod connect;
mod notify;
mod serve;

pub use connect::{ConnectOptions, cmd_connect};
pub use notify::cmd_notify;
pub use serve::cmd_serve;
