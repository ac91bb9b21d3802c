// ABOUTME: Test module organization for the chat bridge
// ABOUTME: End-to-end scenarios for batching, echo suppression, healing, diagnostics and properties

pub mod healing_tests;
pub mod property_tests;
pub mod support;
