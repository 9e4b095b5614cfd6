//! Integration test suite for warden.
//!
//! These tests run real agent runtimes and an orchestrator against the
//! in-memory broker and verify that the components work together.
//!
//! # Test Categories
//!
//! - `messaging`: request/response, broadcast and handler isolation
//! - `lifecycle`: start/stop, registration, heartbeat and pause
//! - `registry`: listings, dispatch eligibility and stale eviction
//! - `workflow_e2e`: workflow execution end to end


mod messaging;
mod registry;
mod workflow_e2e;
