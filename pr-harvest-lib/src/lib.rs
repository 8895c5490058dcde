#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for pr-harvest
//!
//! This library holds everything the `pr-harvest` tool does: it lists the closed pull
//! requests of a repository, resolves the issues each one closes, and turns merged pull
//! requests into dataset instances made of a code patch, a test patch, and a problem
//! statement with hints.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and orchestration
//! - [`collect`]: Rate-limit aware access to the hosting REST API
//! - [`dataset`]: Turning pull requests into dataset instances

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub type HashSet<T> = rustc_hash::FxHashSet<T>;
pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

#[cfg(any(debug_assertions, test))]
pub mod collect;
#[cfg(not(any(debug_assertions, test)))]
mod collect;

#[cfg(any(debug_assertions, test))]
pub mod dataset;
#[cfg(not(any(debug_assertions, test)))]
mod dataset;

pub use crate::commands::{Host, run};
