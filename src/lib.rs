//! Furniture store backend
//!
//! JSON HTTP service for an online furniture shop.
//!
//! ## Features
//! - Product catalog with filtering, sorting and pagination
//! - Session basket reconciled against live stock
//! - Order placement, confirmation and payment
//! - Reviews with rolling product rating
//! - Sales that snapshot and override the live price
//! - Accounts, profiles and avatars

pub mod accounts;
pub mod api;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod events;
pub mod media;
pub mod session;
pub mod store;

use thiserror::Error;

use crate::domain::aggregates::{BasketError, OrderError, ProductError};
use crate::domain::value_objects::{PasswordError, PaymentError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("invalid request: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("payment rejected: {0}")]
    PaymentValidation(#[from] PaymentError),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthenticated,

    #[error("the password you have entered does not match your current one")]
    PasswordMismatch,

    #[error("access denied")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Order(OrderError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShopError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

impl From<BasketError> for ShopError {
    fn from(e: BasketError) -> Self {
        match e {
            BasketError::ItemNotFound(id) => Self::not_found("basket item", id),
            BasketError::InvalidQuantity(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<OrderError> for ShopError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Payment(p) => Self::PaymentValidation(p),
            other => Self::Order(other),
        }
    }
}

impl From<PasswordError> for ShopError {
    fn from(e: PasswordError) -> Self {
        match e {
            PasswordError::Hashing(_) => Self::Internal(e.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<ProductError> for ShopError {
    fn from(e: ProductError) -> Self {
        Self::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShopError>;
