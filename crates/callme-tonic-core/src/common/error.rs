//! Transport error type for the callme gRPC services.
//!
//! [`Error`] wraps every domain failure and adds the cases that only exist at
//! the transport edge. `From<Error> for Status` picks the gRPC code:
//!
//! | Error                                 | Code                  |
//! | ------------------------------------- | --------------------- |
//! | malformed field, wrong reservation    | `INVALID_ARGUMENT`    |
//! | area code exhausted                   | `FAILED_PRECONDITION` |
//! | phone number not assigned             | `NOT_FOUND`           |
//! | store, lookup or stream failure       | `INTERNAL`            |
//! | caller went away                      | `CANCELLED`           |
//! | server shutting down                  | `UNAVAILABLE`         |

use callme::ErrorKind;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// A failure reported by the allocator or the sender.
    #[error(transparent)]
    Domain(#[from] callme::Error),

    /// A required request field was missing.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Reading the client stream failed.
    #[error("Stream read error: {context}")]
    StreamRead { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Domain(e) => {
                let message = e.to_string();
                match e.kind() {
                    ErrorKind::InvalidArgument => Status::invalid_argument(message),
                    ErrorKind::FailedPrecondition => Status::failed_precondition(message),
                    ErrorKind::NotFound => Status::not_found(message),
                    ErrorKind::Cancelled => Status::cancelled(message),
                    ErrorKind::Internal => {
                        tracing::error!(error = %message, "internal error");
                        Status::internal(format!("Internal error: {message}"))
                    }
                }
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::StreamRead { context } => {
                tracing::error!(error = %context, "stream read error");
                Status::internal(format!("Stream read error: {context}"))
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callme::{AreaCode, PhoneNumber};
    use tonic::Code;

    fn code(err: impl Into<Error>) -> Code {
        Status::from(err.into()).code()
    }

    #[test]
    fn domain_errors_map_to_their_codes() {
        assert_eq!(code(callme::Error::InvalidReservation), Code::InvalidArgument);
        assert_eq!(code(callme::Error::invalid("bad")), Code::InvalidArgument);
        assert_eq!(
            code(callme::Error::PoolExhausted {
                area_code: AreaCode::new(613).unwrap()
            }),
            Code::FailedPrecondition
        );
        assert_eq!(
            code(callme::Error::NumberNotFound {
                number: PhoneNumber::parse("+16135550100").unwrap()
            }),
            Code::NotFound
        );
        assert_eq!(code(callme::Error::store("spop", "eof")), Code::Internal);
        assert_eq!(code(callme::Error::lookup("refused")), Code::Internal);
        assert_eq!(code(callme::Error::Cancelled), Code::Cancelled);
    }

    #[test]
    fn transport_errors_map_to_their_codes() {
        assert_eq!(
            code(Error::InvalidRequest {
                reason: "sms is required".into()
            }),
            Code::InvalidArgument
        );
        assert_eq!(
            code(Error::StreamRead {
                context: "reset".into()
            }),
            Code::Internal
        );
        assert_eq!(code(Error::ServiceShutdown), Code::Unavailable);
    }

    #[test]
    fn wrong_reservation_message_is_stable() {
        let status = Status::from(Error::from(callme::Error::InvalidReservation));
        assert_eq!(status.message(), "Phone number and/or reference id is wrong");
    }
}
