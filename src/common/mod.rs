//! Common code used by the `statemask` binary

pub mod logging;
pub mod profiler;
