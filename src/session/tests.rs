//! Unit tests for the session state machine.
//!
//! Tests are split into focused submodules to keep each file short and
//! easy to navigate.

mod attach_tests;
mod support;
mod transfer_tests;
