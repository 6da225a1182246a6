//! CLI tests against a store populated through the library.

mod gc_tests;
mod inspect_tests;
