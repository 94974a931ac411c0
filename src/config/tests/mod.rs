//! Unit tests for podscp configuration types.
//!
//! This module contains tests organised into:
//! - [`helpers`] - Shared fixtures and helper functions
//! - [`types_tests`] - Defaults and TOML deserialisation
//! - [`validation`] - `AppConfig::validate` tests
//! - [`layer_precedence_tests`] - `MergeComposer` layer precedence tests

mod helpers;
