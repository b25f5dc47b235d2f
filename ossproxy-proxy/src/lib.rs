#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The request-serving pipeline, routing cache glue, and the three HTTP
//! listeners (`ossproxy-proxy` exposes a client-facing proxy, an admin
//! `/health`+`/metrics` server, and a loopback ingestion API). Split into a
//! library so the pipeline can be driven directly from integration tests,
//! the same `src/lib.rs` + `src/main.rs` split the teacher uses.

pub mod admin;
pub mod apikey;
pub mod cli;
pub mod ingestion;
pub mod pipeline;
pub mod service;
pub mod state;
