//! Runner lifecycle tests

mod helpers;
mod sync_tests;
