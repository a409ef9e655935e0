//! Process-wide init helpers (logging).

pub mod logging;
