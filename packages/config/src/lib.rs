// ABOUTME: Configuration constants shared across Splitlab packages
// ABOUTME: Re-exports environment variable names and their defaults

pub mod constants;

pub use constants::*;
