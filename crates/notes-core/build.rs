/// Builds the gRPC client and server code for `proto/notes.proto` using
/// `tonic-prost-build`.
///
/// Alongside the bindings, a file descriptor set is written to `OUT_DIR` so
/// the server can expose the schema through gRPC reflection:
///
/// ```rust,ignore
/// pub const FILE_DESCRIPTOR_SET: &[u8] =
///     tonic::include_file_descriptor_set!("notes_descriptor");
/// ```
///
/// # Panics
///
/// Panics if `OUT_DIR` is unset or code generation fails, which aborts the
/// build with the underlying `protoc` diagnostic.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("notes_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/notes.proto");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/notes.proto"], &["proto"])
        .unwrap();
}
