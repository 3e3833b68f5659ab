//! Test utilities for mixbench and its stores.
//!
//! This crate provides utilities to facilitate testing of benchmarks against stores that
//! misbehave. See the modules for all available utilities.

pub mod faulty;
pub mod tracing;
