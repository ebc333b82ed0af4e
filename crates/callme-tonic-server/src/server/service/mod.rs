//! gRPC service implementations.
//!
//! - [`phonebook`] - `PhoneBookService` over an [`Allocator`](callme::Allocator).
//! - [`sms`] - `SmsService` over a [`Sender`](callme::Sender).
//!
//! Handlers only translate: requests are parsed into domain types, the core
//! does the work, and failures leave through
//! [`callme_tonic_core::Error`]'s `Status` mapping.

pub mod phonebook;
pub mod sms;
