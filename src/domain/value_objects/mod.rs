//! Value Objects for the furniture store

use argon2::password_hash::{rand_core::OsRng, PasswordHash as PhcString, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Product rating on a 0..=5 scale with one decimal place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating(Decimal);

impl Rating {
    pub fn new(value: Decimal) -> Result<Self, RatingError> {
        if value < Decimal::ZERO || value > Decimal::from(5) {
            return Err(RatingError(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal { self.0 }

    /// Folds a new review into the rating: 80% history, 20% new rate.
    pub fn apply(&self, rate: ReviewRate) -> Rating {
        let history = Decimal::new(8, 1);
        let sample = Decimal::new(2, 1);
        Self((self.0 * history + Decimal::from(rate.value()) * sample).round_dp(1))
    }
}

#[derive(Debug, Clone, Error)]
#[error("rating {0} is outside 0..=5")]
pub struct RatingError(pub Decimal);

/// A single review score, 1..=5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReviewRate(u8);

impl ReviewRate {
    pub fn new(value: i64) -> Result<Self, RatingError> {
        match u8::try_from(value) {
            Ok(v @ 1..=5) => Ok(Self(v)),
            _ => Err(RatingError(Decimal::from(value))),
        }
    }
    pub fn value(&self) -> u8 { self.0 }
}

/// Phone numbers are stored as up to 20 digits.
pub fn digits_only(value: &str) -> Result<(), validator::ValidationError> {
    if !value.is_empty() && value.len() <= 20 && value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("phone"))
    }
}

/// Plain-text password that satisfied the account password policy.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub const MIN_LENGTH: usize = 8;

    pub fn new(raw: impl Into<String>) -> Result<Self, PasswordError> {
        let raw = raw.into();
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) { return Err(PasswordError::InvalidCharacters); }
        if raw.len() < Self::MIN_LENGTH { return Err(PasswordError::TooShort); }
        let lower = raw.chars().any(|c| c.is_ascii_lowercase());
        let upper = raw.chars().any(|c| c.is_ascii_uppercase());
        let digit = raw.chars().any(|c| c.is_ascii_digit());
        if !(lower && upper && digit) { return Err(PasswordError::MissingCharacterClass); }
        Ok(Self(raw))
    }

    pub fn hash(&self) -> Result<PasswordHash, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(self.0.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(PasswordHash(hash.to_string()))
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Password(***)") }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("the password must be at least 8 characters long")]
    TooShort,
    #[error("the password may contain only latin letters and digits")]
    InvalidCharacters,
    #[error("the password must contain upper and lower case letters and digits")]
    MissingCharacterClass,
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Argon2id hash in PHC string form, as stored in the users table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn from_stored(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }

    /// Unparseable stored values never match.
    pub fn verify(&self, candidate: &str) -> bool {
        PhcString::new(&self.0)
            .map(|parsed| Argon2::default().verify_password(candidate.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    #[default]
    Ordinary,
    Express,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Ordinary => "ordinary", Self::Express => "express" }
    }
}

impl FromStr for DeliveryType {
    type Err = ParseEnumError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordinary" => Ok(Self::Ordinary),
            "express" => Ok(Self::Express),
            _ => Err(ParseEnumError::new("delivery type", s)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    #[default]
    Online,
    Someone,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Online => "online", Self::Someone => "someone" }
    }
}

impl FromStr for PaymentType {
    type Err = ParseEnumError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "someone" => Ok(Self::Someone),
            _ => Err(ParseEnumError::new("payment type", s)),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError { pub kind: &'static str, pub value: String }

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self { Self { kind, value: value.to_string() } }
}

/// Card details submitted to the payment stub.
#[derive(Clone, Debug, Deserialize)]
pub struct PaymentCard {
    pub number: String,
    #[serde(default)]
    pub name: String,
    pub month: String,
    pub year: String,
    #[serde(default)]
    pub code: String,
}

impl PaymentCard {
    pub const MAX_DIGITS: usize = 12;

    /// Placeholder gateway rules: numeric, at most 12 digits, odd-valued, not expired.
    pub fn check(&self, today: NaiveDate) -> Result<(), PaymentError> {
        let number = self.number.trim();
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(PaymentError::InvalidNumber);
        }
        if number.len() > Self::MAX_DIGITS { return Err(PaymentError::NumberTooLong); }
        let last = number.as_bytes()[number.len() - 1] - b'0';
        if last % 2 == 0 { return Err(PaymentError::EvenNumber); }

        let month: u32 = self.month.trim().parse().map_err(|_| PaymentError::InvalidExpiry)?;
        if !(1..=12).contains(&month) { return Err(PaymentError::InvalidExpiry); }
        let mut year: i32 = self.year.trim().parse().map_err(|_| PaymentError::InvalidExpiry)?;
        if (0..100).contains(&year) { year += 2000; }
        if (year, month) < (today.year(), today.month()) { return Err(PaymentError::Expired); }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("card number must contain digits only")]
    InvalidNumber,
    #[error("card number is longer than 12 digits")]
    NumberTooLong,
    #[error("card number must be odd")]
    EvenNumber,
    #[error("invalid card expiry date")]
    InvalidExpiry,
    #[error("card has expired")]
    Expired,
}
