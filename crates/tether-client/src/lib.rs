//! Client facade over the tether dispatch engine.
//!
//! A [`Client`] owns one connection to a remote host, the registry of event
//! handlers for every object it created, and the dispatch thread delivering
//! notifications to those handlers. [`RemoteObject`]s are proxies for host
//! instances: their members are looked up by name and every outbound call
//! carries the [`CallContext`](tether_core::CallContext) it was issued from.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::process::{Command, Stdio};
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use tether_client::Client;
//! use tether_config::Config;
//! use tether_core::{CallContext, Handler};
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = Command::new("tether-host")
//!         .stdin(Stdio::piped())
//!         .stdout(Stdio::piped())
//!         .spawn()?;
//!     let (Some(input), Some(output)) = (host.stdin.take(), host.stdout.take()) else {
//!         return Err("host pipes unavailable".into());
//!     };
//!     let client = Client::connect_pipes(output, input, &Config::default())?;
//!
//!     let timer = client.create("timer")?;
//!     timer.set(&CallContext::root(), "interval", json!(250))?;
//!     timer.connect("tick", Handler::new(|_, arguments| {
//!         println!("tick {arguments:?}");
//!         Ok(())
//!     }))?;
//!     timer.invoke(&CallContext::root(), "start", Vec::new())?;
//!
//!     timer.destroy()?;
//!     client.close(Some(Duration::from_secs(5)))?;
//!     Ok(())
//! }
//! ```

mod client;
pub mod error;
pub mod members;
mod object;
pub mod registry;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use self::client::Client;
pub use self::error::ClientError;
pub use self::members::MemberTable;
pub use self::object::RemoteObject;
pub use self::registry::{ClientFactory, ClientRegistry, default_machine};
pub use self::telemetry::{TelemetryError, TelemetryHandle};
