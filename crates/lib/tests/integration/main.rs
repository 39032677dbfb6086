//! Library integration tests: whole builds through the scheduler.

mod common;

mod cache_tests;
mod failure_tests;
mod hook_tests;
mod ordering_tests;
mod retry_tests;
mod verification_tests;
