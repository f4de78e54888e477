//! Core types, config, errors, and value marshalling for Hostlink.

pub mod capability;
pub mod config;
pub mod error;
pub mod marshal;
pub mod protocol;
