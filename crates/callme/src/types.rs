//! # Domain types
//!
//! Validated newtypes shared by the allocator, the sender and every backend.
//! Parsing happens once at the edge; past that point the core only handles
//! values that are known to be well formed.
//!
//! - [`PhoneNumber`] - an allocatable resource, E.164-like.
//! - [`AreaCode`] - the scope a number is drawn from.
//! - [`RefId`] - the single-use token naming a [`Reservation`].
//! - [`UserId`] - the owner of an assigned number.
//! - [`IdempotencyKey`] - the client token that makes a send at-most-once.

use crate::{Error, Result};
use core::fmt;
use ferroid::{base32::Base32UlidExt, generator::thread_local::Ulid};

/// Number of phone numbers handed out by a single reserve call.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Prefix of the cache set holding the AVAILABLE numbers of an area code.
pub const AREA_CODE_KEY_PREFIX: &str = "areacode-";

/// A validated phone number: an optional `+` followed by 4 to 15 digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    const MIN_DIGITS: usize = 4;
    const MAX_DIGITS: usize = 15;

    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let digits = raw.strip_prefix('+').unwrap_or(&raw);
        if digits.len() < Self::MIN_DIGITS || digits.len() > Self::MAX_DIGITS {
            return Err(Error::invalid(format!(
                "phone number must have between {} and {} digits, got {:?}",
                Self::MIN_DIGITS,
                Self::MAX_DIGITS,
                raw
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid(format!(
                "phone number may only contain digits, got {raw:?}"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The scope tag of a phone number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaCode(u32);

impl AreaCode {
    pub fn new(code: u32) -> Result<Self> {
        if code == 0 {
            return Err(Error::invalid("area code must be greater than 0"));
        }
        Ok(Self(code))
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Name of the cache set holding this scope's AVAILABLE numbers.
    pub fn cache_key(self) -> String {
        format!("{AREA_CODE_KEY_PREFIX}{}", self.0)
    }

    /// Inverse of [`AreaCode::cache_key`].
    pub fn from_cache_key(key: &str) -> Option<Self> {
        key.strip_prefix(AREA_CODE_KEY_PREFIX)?
            .parse()
            .ok()
            .and_then(|code| Self::new(code).ok())
    }
}

impl TryFrom<i32> for AreaCode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        u32::try_from(code)
            .map_err(|_| Error::invalid(format!("area code must be positive, got {code}")))
            .and_then(Self::new)
    }
}

impl fmt::Display for AreaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reservation token.
///
/// Freshly generated tokens are Crockford base32 ULIDs, so they sort by
/// creation time and never collide across processes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefId(String);

impl RefId {
    pub fn generate() -> Self {
        Self(Ulid::new_ulid_mono().encode().as_string())
    }

    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::invalid("reference id cannot be empty"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-supplied token guaranteeing at-most-once delivery of a message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    const MAX_LENGTH: usize = 128;

    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::invalid("idempotency key cannot be empty"));
        }
        if raw.len() > Self::MAX_LENGTH {
            return Err(Error::invalid(format!(
                "idempotency key exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::invalid(
                "idempotency key may only contain a-z, A-Z, 0-9, '-' and '_'",
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live, single-use hold on a batch of numbers from one area code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub ref_id: RefId,
    pub area_code: AreaCode,
    pub numbers: Vec<PhoneNumber>,
}

impl Reservation {
    pub fn holds(&self, number: &PhoneNumber) -> bool {
        self.numbers.contains(number)
    }

    /// Every held number except `chosen`.
    pub fn skipped(&self, chosen: &PhoneNumber) -> Vec<PhoneNumber> {
        self.numbers
            .iter()
            .filter(|n| *n != chosen)
            .cloned()
            .collect()
    }
}

/// An SMS exactly as the client submitted it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sms {
    pub idempotency_key: String,
    pub from: String,
    pub to: String,
    pub content: String,
}

/// An [`Sms`] whose fields have all been validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidSms {
    pub idempotency_key: IdempotencyKey,
    pub from: PhoneNumber,
    pub to: PhoneNumber,
    pub content: String,
}

impl TryFrom<Sms> for ValidSms {
    type Error = Error;

    fn try_from(sms: Sms) -> Result<Self> {
        if sms.content.is_empty() {
            return Err(Error::invalid("content cannot be empty"));
        }
        Ok(Self {
            idempotency_key: IdempotencyKey::parse(sms.idempotency_key)?,
            from: PhoneNumber::parse(sms.from)?,
            to: PhoneNumber::parse(sms.to)?,
            content: sms.content,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageStatus {
    /// Placeholder claiming the idempotency key; content not yet written.
    Pending,
    Sent,
}

impl MessageStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
        }
    }
}

/// A durable message record, keyed by its idempotency key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub idempotency_key: IdempotencyKey,
    pub from: Option<PhoneNumber>,
    pub to: Option<PhoneNumber>,
    pub content: Option<String>,
    pub status: MessageStatus,
}

impl MessageRecord {
    pub const fn placeholder(idempotency_key: IdempotencyKey) -> Self {
        Self {
            idempotency_key,
            from: None,
            to: None,
            content: None,
            status: MessageStatus::Pending,
        }
    }
}
