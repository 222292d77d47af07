//! Wire envelopes and UI log lines.

pub mod envelope;
pub mod log;
