//! Integration tests for mids-trigger

mod engine_test;
mod feed_test;
mod support;
