#![doc = include_str!("../README.md")]

/// Generated protobuf messages, the `NotesService` server trait and its
/// client.
pub mod proto {
    tonic::include_proto!("notes");

    /// Encoded descriptor set for `notes.proto`, registered with the
    /// reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("notes_descriptor");
}

/// Fully qualified gRPC name of the notes service, as reported by health
/// checks and reflection.
pub const NOTES_SERVICE_NAME: &str = "notes.NotesService";

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::server::NamedService;

    #[test]
    fn generated_server_name_matches_constant() {
        struct Unused;
        #[tonic::async_trait]
        impl proto::notes_service_server::NotesService for Unused {}

        assert_eq!(
            <proto::notes_service_server::NotesServiceServer<Unused> as NamedService>::NAME,
            NOTES_SERVICE_NAME
        );
    }

    #[test]
    fn descriptor_set_is_embedded() {
        assert!(!proto::FILE_DESCRIPTOR_SET.is_empty());
    }
}
