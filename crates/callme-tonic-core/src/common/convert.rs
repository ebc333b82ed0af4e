//! Conversions between protobuf messages and domain types.
//!
//! Presence checks happen here; content validation is left to the domain
//! parsers so both paths report `INVALID_ARGUMENT` with the same wording.

use crate::{Error, Result, proto};
use callme::{AreaCode, PhoneNumber, RefId, Reservation, SendOutcome, Sms, UserId};

fn required(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest {
            reason: format!("{field} is required"),
        });
    }
    Ok(value)
}

impl TryFrom<proto::ExistsRequest> for PhoneNumber {
    type Error = Error;

    fn try_from(req: proto::ExistsRequest) -> Result<Self> {
        Ok(PhoneNumber::parse(required("phone_number", req.phone_number)?)?)
    }
}

impl TryFrom<proto::ReserveRequest> for AreaCode {
    type Error = Error;

    fn try_from(req: proto::ReserveRequest) -> Result<Self> {
        Ok(AreaCode::try_from(req.area_code)?)
    }
}

/// A parsed `Assign` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub ref_id: RefId,
    pub phone_number: PhoneNumber,
    pub user: UserId,
}

impl TryFrom<proto::AssignRequest> for Assignment {
    type Error = Error;

    fn try_from(req: proto::AssignRequest) -> Result<Self> {
        if req.user_id <= 0 {
            return Err(Error::InvalidRequest {
                reason: format!("user_id must be positive, got {}", req.user_id),
            });
        }
        Ok(Self {
            ref_id: RefId::parse(required("ref_id", req.ref_id)?)?,
            phone_number: PhoneNumber::parse(required("phone_number", req.phone_number)?)?,
            user: UserId(i64::from(req.user_id)),
        })
    }
}

impl From<Reservation> for proto::ReserveResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            phone_numbers: reservation
                .numbers
                .into_iter()
                .map(PhoneNumber::into_string)
                .collect(),
            ref_id: reservation.ref_id.into_string(),
        }
    }
}

impl From<proto::Sms> for Sms {
    fn from(sms: proto::Sms) -> Self {
        Self {
            idempotency_key: sms.idempotency_key,
            from: sms.from_phone_number,
            to: sms.to_phone_number,
            content: sms.content,
        }
    }
}

impl From<Sms> for proto::Sms {
    fn from(sms: Sms) -> Self {
        Self {
            idempotency_key: sms.idempotency_key,
            from_phone_number: sms.from,
            to_phone_number: sms.to,
            content: sms.content,
        }
    }
}

impl TryFrom<proto::SendOneRequest> for Sms {
    type Error = Error;

    fn try_from(req: proto::SendOneRequest) -> Result<Self> {
        req.sms.map(Sms::from).ok_or_else(|| Error::InvalidRequest {
            reason: "sms is required".into(),
        })
    }
}

impl From<SendOutcome> for proto::SendOneResponse {
    fn from(outcome: SendOutcome) -> Self {
        Self {
            sent: outcome.sent,
            message: outcome.message,
        }
    }
}
