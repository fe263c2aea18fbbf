//! Subprocess loading strategy for Marquee providers.
//!
//! This crate provides:
//! - A JSON-lines protocol for talking to provider plugin executables
//! - An exec-based host that spawns and drives a plugin process
//! - Adapters implementing `Provider` and `ProviderApi` on top of the host
//! - [`ExecPluginLoader`], the `ProviderLoader` used by the download installer
//!
//! # Plugin Protocol
//!
//! The host writes one [`PluginRequest`] per line to the plugin's stdin and
//! reads [`PluginResponse`] lines from its stdout. `GetLinks` is answered by
//! any number of `Link` responses followed by `LinksDone`, so links reach
//! the caller while the plugin is still resolving.
//!
//! # Example Plugin (pseudocode)
//!
//! ```text
//! while (line = read_stdin()):
//!     request = json_parse(line)
//!     if request.method.type == "Initialize":
//!         reply(request.id, {"status": "Initialized",
//!                            "metadata": {...}, "manifest": {...},
//!                            "protocol_version": 1})
//!     elif request.method.type == "GetLinks":
//!         for link in resolve(request.method.params):
//!             reply(request.id, {"status": "Link", "link": link})
//!         reply(request.id, {"status": "LinksDone"})
//! ```

mod adapter;
mod host;
mod loader;
pub mod protocol;

pub use adapter::{ExecProvider, ExecProviderApi};
pub use host::{ExecPluginHost, PluginConfig, PluginHostError, PluginHostResult};
pub use loader::ExecPluginLoader;
pub use protocol::{
    InstanceInfo, PluginError, PluginErrorKind, PluginInfo, PluginMethod, PluginRequest,
    PluginResponse, PluginResult, PROTOCOL_VERSION,
};
