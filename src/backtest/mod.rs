pub mod replay;
pub mod synthetic;

pub use replay::{expected_session_hours, run_replay, session_windows, SessionWindow};
pub use synthetic::SyntheticHistory;
