//! Executable-format input layer.

pub mod le;
