#![doc = include_str!("../README.md")]

mod client;
mod common;

pub use client::*;
pub use common::*;
// Re-exported so the server and clients agree on one version of the domain.
pub use callme;

/// gRPC services and messages generated from `proto/callme.proto`.
///
/// - [`PhoneBookService`](proto::phone_book_service_server::PhoneBookService):
///   `Exists`, `Reserve`, `Assign`.
/// - [`SmsService`](proto::sms_service_server::SmsService): `SendOne` and the
///   client-streaming `SendMany`.
pub mod proto {
    tonic::include_proto!("callme");

    /// Encoded descriptor set for `tonic-reflection`.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("callme_descriptor");
}
