/// Generates the gRPC client and server code for `proto/callme.proto`.
///
/// Both services (`PhoneBookService` and `SmsService`) land in the `callme`
/// package, which the crate exposes as `proto`:
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("callme");
/// }
/// ```
///
/// A file descriptor set is written next to the generated code so the server
/// can register it with `tonic-reflection`.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("callme_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/callme.proto");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/callme.proto"], &["proto"])
        .unwrap();
}
