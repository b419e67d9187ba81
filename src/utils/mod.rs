//! Process-level helpers for binaries embedding busline.

pub mod bootstrap;
