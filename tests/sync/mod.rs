// Test module entry point for sync tests
// End-to-end runs against the in-memory provider

mod common;
mod maintenance_tests;
mod merge_tests;
mod upload_tests;
