//! gRPC service implementations and their registration.
//!
//! ## Structure
//!
//! - [`handler`] - `NotesService` entry point ([`NotesApi`](handler::NotesApi)).
//! - [`registry`] - the immutable dispatch table served by the RPC server.

pub mod handler;
pub mod registry;
