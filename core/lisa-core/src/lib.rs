//! lisa-core: supervision of coding-agent CLIs hosted in detached tmux sessions.
//!
//! The crate is organised bottom-up:
//!
//! - [`storage`] and [`session`] own the per-session artifacts on disk
//! - [`tmux`] and [`process`] wrap the external programs we observe
//! - [`signals`] turns one observation into a [`lisa_protocol::Signals`] record
//! - [`classifier`] maps signals to a [`lisa_protocol::SessionState`]
//! - [`monitor`] and [`reaper`] drive polling and residue cleanup
//! - [`engine`] composes all of the above into the CLI's commands
//!
//! Everything that touches the outside world sits behind a trait
//! ([`tmux::Multiplexer`], [`process::ProcessTable`], [`monitor::Sleeper`],
//! [`monitor::Clock`], [`reaper::SocketDiscovery`]) so tests can drive the
//! whole flow with fakes.

pub mod classifier;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod patterns;
pub mod process;
pub mod reaper;
pub mod session;
pub mod signals;
pub mod storage;
pub mod tmux;

pub use config::LisaConfig;
pub use engine::{Backends, PollOptions, SessionEngine};
pub use error::{LisaError, Result};
pub use storage::StorageConfig;

pub use lisa_protocol as protocol;
