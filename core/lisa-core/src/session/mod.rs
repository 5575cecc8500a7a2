//! Per-session artifacts: metadata, state, event log and sentinels.

pub mod events;
pub mod sentinel;
pub mod store;
pub mod types;

pub use events::{append_event, new_event, read_events_tail, EventTail};
pub use sentinel::{read_sentinel, write_output_file, write_sentinel, Sentinel};
pub use store::{load_meta, load_state, remove_session_files, save_meta, save_state};
pub use types::{SessionMeta, SessionStateRecord};
