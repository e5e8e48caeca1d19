//! Handler set for the `notes.NotesService` gRPC service.
//!
//! The service currently declares no methods. [`NotesApi`] is still
//! registered so that the service is discoverable through reflection and
//! health checks, and it owns the database handle the methods will use.

use notes_core::proto::notes_service_server::{NotesService, NotesServiceServer};
use tonic::codec::CompressionEncoding;

use crate::server::database::Database;

/// Implementation of [`NotesService`].
///
/// Cloned per connection by tonic; clones share the same pool.
#[derive(Clone, Debug)]
pub struct NotesApi {
    database: Database,
}

impl NotesApi {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Wraps the handler set in its generated server with every supported
    /// compression encoding enabled.
    pub fn into_server(self) -> NotesServiceServer<Self> {
        NotesServiceServer::new(self)
            .send_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Deflate)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Deflate)
    }
}

#[tonic::async_trait]
impl NotesService for NotesApi {}
