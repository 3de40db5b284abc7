//! Helpers for tests: a throwaway SQLite store, scripted gateway and notifier fakes, and fixture builders.
pub mod fakes;
pub mod fixtures;
pub mod prepare_env;
