//! # Drivegate Gateway Library
//!
//! This crate provides the gateway service for Drivegate, fronting a
//! remote object store with access control, rate limiting, and streamed
//! transfer.
//!
//! ## Overview
//!
//! The gateway is the single entry point between clients and the remote
//! store. It provides:
//!
//! - **Share Tokens**: Signed, revocable bearer capabilities for single
//!   resources
//! - **Access Resolution**: Ancestry-walking restriction checks with
//!   fail-closed semantics
//! - **Rate Limiting**: Sliding-window per-client limits by route class
//! - **Download Proxy**: Range-aware streaming with mirrored partial
//!   content headers
//! - **Upload Orchestration**: Chunked resumable uploads with retry and
//!   re-authentication
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HTTP Surface                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────┐  ┌──────────────┐  ┌────────────────────┐   │
//! │  │   Token    │  │    Access    │  │       Rate         │   │
//! │  │  Service   │  │   Resolver   │  │      Limiter       │   │
//! │  └────────────┘  └──────────────┘  └────────────────────┘   │
//! │                                                              │
//! │  ┌──────────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Download Pipeline  │  │    Upload Orchestrator      │  │
//! │  └──────────────────────┘  └─────────────────────────────┘  │
//! │                                                              │
//! │  ┌───────────────────┐  ┌────────────────────────────────┐  │
//! │  │   Remote Store    │  │      Shared Counter Store      │  │
//! │  └───────────────────┘  └────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, defaults, and validation
//! - [`auth`]: Token service and access resolver
//! - [`store`]: Remote store client and shared counter store
//! - [`limit`]: Per-route-class rate limiting
//! - [`stream`]: Byte-serving header plumbing
//! - [`upload`]: Resumable upload orchestration
//! - [`activity`]: Download/upload activity recording
//! - [`http`]: Routing and request handlers

pub mod activity;
pub mod auth;
pub mod config;
pub mod http;
pub mod limit;
pub mod store;
pub mod stream;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
