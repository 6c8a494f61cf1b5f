#![forbid(unsafe_code)]

//! Simform Runtime
//!
//! Everything in simform that touches the network or the clock.
//!
//! # Key Components
//!
//! - [`ApiClient`] - Typed calls to the simulation backend over a [`Transport`]
//! - [`HttpTransport`] - `reqwest`-based transport with a cookie session
//! - [`MockTransport`] - Scripted in-memory transport
//! - [`ClientConfig`] - Base URL, app name, timing and retry settings
//! - [`RetryPolicy`] - Exponential backoff for transient failures
//! - [`StopSignal`] / [`StopTrigger`] - Cooperative cancellation
//! - [`ReportPoller`] - Token-gated report polling on worker threads
//! - [`AutoRunReport`] - Restarts polling when dependency values change
//! - [`SimulationLoader`] - Guest bootstrap and save
//! - [`FileFieldClient`] - File listing, upload and download
//! - [`ComputedOptionsClient`] - Options of backend-computed enum fields
//!
//! # How it fits
//! `simform-core` owns form state and never blocks. This crate feeds it
//! (loading models into an [`EditSession`](simform_core::EditSession)) and
//! reads from it (serialized models for reports and saves).

pub mod api;
pub mod compute;
pub mod config;
pub mod files;
pub mod mock;
pub mod poll;
pub mod report;
pub mod retry;
pub mod simulation;
pub mod stop;

pub use api::{
    ApiClient, ApiError, Body, HttpTransport, Method, Request, Response, RunSimulationRequest,
    Transport, endpoint_path,
};
pub use compute::{ComputeError, ComputedOptionsClient};
pub use config::{ClientConfig, ConfigError};
pub use files::{FileFieldClient, file_field_name};
pub use mock::{MockTransport, Reply};
pub use poll::{
    DEFAULT_TRACE_CAPACITY, PollChain, PollCoordinator, PollError, PollEvent, PollMessage,
    PollOutcome, PollPhase, PollStep, PollToken, PollTrace, PollUpdate, ReportPoller, classify,
};
pub use report::{AutoRunReport, ObserveOutcome, ReportError};
pub use retry::{RetryError, RetryPolicy};
pub use simulation::{SimulationError, SimulationInfo, SimulationLoader, save_body};
pub use stop::{StopSignal, StopTrigger};
