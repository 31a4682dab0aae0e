//! Test suites for the watcher daemon.

mod support;
mod unit;
