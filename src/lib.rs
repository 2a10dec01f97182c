#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Migflow Core
//!
//! Orchestration engine for long-running, multi-phase migration workflows.
//!
//! ## Overview
//!
//! A migration workflow (discovery, collection, assessment, decommission)
//! is a fixed sequence of phases executed strictly in order by a background
//! runner. Each flow is persisted as a master record (identity, lifecycle)
//! plus a child record (phase-by-phase progress), so a flow survives process
//! restarts and can be paused, resumed, cancelled, or reclaimed when its
//! executor dies.
//!
//! ## Architecture
//!
//! Control and execution are separate planes. The
//! [`OrchestrationCoordinator`](orchestration::OrchestrationCoordinator)
//! owns control operations and flips persisted lifecycle state under an
//! optimistic-lock version; the
//! [`FlowRunner`](orchestration::FlowRunner) executes phases in a spawned
//! task, fenced by a process-local registry and a storage-level execution
//! lease so at most one runner drives a flow at a time. A
//! [`FlowHealthMonitor`](orchestration::FlowHealthMonitor) sweeps for flows
//! whose executor disappeared and reclaims them.
//!
//! ## Module Organization
//!
//! - [`workflow`] - Workflow types and their ordered phase definitions
//! - [`models`] - Persisted records: master flows, child flows, artifacts, leases
//! - [`state_machine`] - Lifecycle and phase transition rules
//! - [`store`] - Storage trait with PostgreSQL and in-memory backends
//! - [`orchestration`] - Coordinator, runner, health monitor, deletion
//! - [`registry`] - Phase handler registration and dispatch
//! - [`events`] - Broadcast lifecycle event stream
//! - [`web`] - Axum REST API over the coordinator
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use migflow_core::config::MigflowConfig;
//! use migflow_core::events::EventPublisher;
//! use migflow_core::orchestration::{
//!     ExecutionRegistry, FlowRunner, InitializeRequest, OrchestrationCoordinator,
//! };
//! use migflow_core::registry::PhaseHandlerRegistry;
//! use migflow_core::store::{FlowRecordStore, InMemoryFlowRecordStore};
//! use migflow_core::workflow::WorkflowType;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigflowConfig::default();
//! let store: Arc<dyn FlowRecordStore> = Arc::new(InMemoryFlowRecordStore::new());
//! let handlers = Arc::new(PhaseHandlerRegistry::new());
//! let executions = Arc::new(ExecutionRegistry::new());
//! let events = EventPublisher::default();
//!
//! let runner = FlowRunner::new(
//!     store.clone(),
//!     handlers,
//!     executions.clone(),
//!     events.clone(),
//!     config.execution.clone(),
//! );
//! let coordinator = OrchestrationCoordinator::new(store, runner, executions, events);
//!
//! let created = coordinator
//!     .initialize(InitializeRequest {
//!         tenant_id: "tenant-1".to_string(),
//!         scope_id: "project-7".to_string(),
//!         workflow_type: WorkflowType::Discovery,
//!         selected_entity_ids: vec!["vm-42".to_string()],
//!         input: Some(serde_json::json!({"region": "us-east-1"})),
//!     })
//!     .await?;
//! println!("flow {} is {}", created.master_flow_id, created.lifecycle_status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! The in-memory store backs most tests; no database is required:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod store;
pub mod web;
pub mod workflow;

pub use config::{
    DatabaseConfig, ExecutionConfig, HealthConfig, LoggingConfig, MigflowConfig, WebConfig,
};
pub use error::{OrchestrationError, Result};
pub use models::{ChildFlowRecord, FlowArtifact, MasterFlowRecord};
pub use state_machine::{LifecycleStatus, PhaseStatus};
pub use workflow::{PhaseName, WorkflowType};
