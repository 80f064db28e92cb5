//! Server error types and their HTTP representation.
//!
//! Every failure that escapes a handler is a [`ServerError`]. The [`ResponseError`] impl turns it into a JSON body
//! of the form `{"code": <u32>, "hint": <string>}`; failures caused by an upstream exchange additionally carry the
//! exchange's HTTP status, error code and raw reply so that wallets can distinguish "we are broken" from "the
//! exchange is broken". Codes are stable across releases; renumbering them breaks deployed clients.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use mpg_common::AmountError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use merchant_payment_engine::{db_types::DatabaseError, traits::TipError};

/// Numeric error codes reported in JSON error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u32")]
#[repr(u32)]
pub enum ErrorCode {
    ParameterMissing = 1000,
    ParameterMalformed = 1001,
    EndpointUnknown = 1002,
    MethodNotAllowed = 1003,
    InstanceUnknown = 1100,
    InstanceIdExists = 1101,
    TipIdUnknown = 1102,
    ProductUnknown = 1103,
    OrderUnknown = 1104,
    ProductInsufficientStock = 1200,
    TipNoFunds = 1201,
    TipExpired = 1202,
    TipTooManyPlanchets = 1203,
    TipReserveNotConfigured = 1204,
    AmountOverflow = 1300,
    ExchangeDown = 1400,
    ExchangeLackedKeys = 1401,
    ExchangeLackedKey = 1402,
    ExchangeIncompatible = 1403,
    WithdrawFailedAtExchange = 1404,
    HoleInWireFeeStructure = 1405,
    DbHardFailure = 1500,
    DbSoftFailure = 1501,
    InternalInvariant = 1502,
    InitializeError = 1503,
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code as u32
    }
}

/// Details of a failed HTTP exchange interaction, preserved for the error body.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeFailure {
    pub exchange_http_status: u16,
    pub exchange_code: u32,
    pub exchange_reply: serde_json::Value,
}

impl std::fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exchange returned HTTP {} (code {})", self.exchange_http_status, self.exchange_code)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Could not initialize the server. {0}")]
    InitializeError(String),
    #[error("Missing parameter: {0}")]
    ParameterMissing(String),
    #[error("Malformed parameter: {0}")]
    ParameterMalformed(String),
    #[error("Instance '{0}' is not known here")]
    InstanceUnknown(String),
    #[error("An instance with id '{0}' already exists")]
    InstanceIdExists(String),
    #[error("Tip id '{0}' is not known here")]
    TipUnknown(String),
    #[error("Product '{0}' is not known here")]
    ProductUnknown(String),
    #[error("Order '{0}' is not known here")]
    OrderUnknown(String),
    #[error("Insufficient stock to lock product '{0}'")]
    InsufficientStock(String),
    #[error("The tip balance does not cover this pickup. {0}")]
    TipNoFunds(String),
    #[error("The tip expired at {0}")]
    TipExpired(String),
    #[error("Too many planchets in pickup request ({0})")]
    TooManyPlanchets(usize),
    #[error("No tipping reserve is configured for instance '{0}'")]
    TipReserveNotConfigured(String),
    #[error("Amount arithmetic failed. {0}")]
    AmountOverflow(String),
    #[error("The exchange is unreachable or misbehaving. {0}")]
    ExchangeDown(String),
    #[error("The exchange did not provide a usable key set")]
    ExchangeLackedKeys,
    #[error("The exchange does not offer denomination {0}")]
    ExchangeLackedKey(String),
    #[error("The exchange speaks an incompatible protocol version ({0})")]
    ExchangeIncompatible(String),
    #[error("Withdrawing coins at the exchange failed. {0}")]
    WithdrawFailed(ExchangeFailure),
    #[error("The exchange announced wire fees with a hole in the timeline for method '{0}'")]
    WireFeeHole(String),
    #[error("Unrecoverable database failure. {0}")]
    DbHardFailure(String),
    #[error("The database is busy. Try again later. {0}")]
    DbSoftFailure(String),
    #[error("An internal invariant was violated. {0}")]
    InternalInvariant(String),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InitializeError(_) => ErrorCode::InitializeError,
            Self::ParameterMissing(_) => ErrorCode::ParameterMissing,
            Self::ParameterMalformed(_) => ErrorCode::ParameterMalformed,
            Self::InstanceUnknown(_) => ErrorCode::InstanceUnknown,
            Self::InstanceIdExists(_) => ErrorCode::InstanceIdExists,
            Self::TipUnknown(_) => ErrorCode::TipIdUnknown,
            Self::ProductUnknown(_) => ErrorCode::ProductUnknown,
            Self::OrderUnknown(_) => ErrorCode::OrderUnknown,
            Self::InsufficientStock(_) => ErrorCode::ProductInsufficientStock,
            Self::TipNoFunds(_) => ErrorCode::TipNoFunds,
            Self::TipExpired(_) => ErrorCode::TipExpired,
            Self::TooManyPlanchets(_) => ErrorCode::TipTooManyPlanchets,
            Self::TipReserveNotConfigured(_) => ErrorCode::TipReserveNotConfigured,
            Self::AmountOverflow(_) => ErrorCode::AmountOverflow,
            Self::ExchangeDown(_) => ErrorCode::ExchangeDown,
            Self::ExchangeLackedKeys => ErrorCode::ExchangeLackedKeys,
            Self::ExchangeLackedKey(_) => ErrorCode::ExchangeLackedKey,
            Self::ExchangeIncompatible(_) => ErrorCode::ExchangeIncompatible,
            Self::WithdrawFailed(_) => ErrorCode::WithdrawFailedAtExchange,
            Self::WireFeeHole(_) => ErrorCode::HoleInWireFeeStructure,
            Self::DbHardFailure(_) => ErrorCode::DbHardFailure,
            Self::DbSoftFailure(_) => ErrorCode::DbSoftFailure,
            Self::InternalInvariant(_) => ErrorCode::InternalInvariant,
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ParameterMissing(_) | Self::ParameterMalformed(_) | Self::TooManyPlanchets(_) => {
                StatusCode::BAD_REQUEST
            },
            Self::InstanceUnknown(_) | Self::TipUnknown(_) | Self::ProductUnknown(_) | Self::OrderUnknown(_) => {
                StatusCode::NOT_FOUND
            },
            Self::InstanceIdExists(_) | Self::InsufficientStock(_) | Self::TipNoFunds(_) => StatusCode::CONFLICT,
            Self::TipExpired(_) | Self::TipReserveNotConfigured(_) => StatusCode::PRECONDITION_FAILED,
            Self::AmountOverflow(_) => StatusCode::BAD_REQUEST,
            Self::ExchangeDown(_)
            | Self::ExchangeLackedKeys
            | Self::ExchangeLackedKey(_)
            | Self::ExchangeIncompatible(_)
            | Self::WithdrawFailed(_)
            | Self::WireFeeHole(_) => StatusCode::BAD_GATEWAY,
            Self::DbSoftFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InitializeError(_) | Self::DbHardFailure(_) | Self::InternalInvariant(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({ "code": self.code(), "hint": self.to_string() });
        if let Self::WithdrawFailed(failure) = self {
            body["exchange_http_status"] = json!(failure.exchange_http_status);
            body["exchange_code"] = json!(failure.exchange_code);
            body["exchange_reply"] = failure.exchange_reply.clone();
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::InitializeError(err.to_string())
    }
}

impl From<DatabaseError> for ServerError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Soft(msg) => Self::DbSoftFailure(msg),
            DatabaseError::Hard(msg) => Self::DbHardFailure(msg),
        }
    }
}

impl From<TipError> for ServerError {
    fn from(err: TipError) -> Self {
        match err {
            TipError::UnknownTipId(id) => Self::TipUnknown(id.to_string()),
            TipError::InsufficientFunds { requested, left } => {
                Self::TipNoFunds(format!("requested {requested}, but only {left} left"))
            },
            TipError::Expired(when) => Self::TipExpired(when.to_rfc3339()),
            TipError::Amount(e) => Self::AmountOverflow(e.to_string()),
            TipError::Database(e) => e.into(),
        }
    }
}

impl From<AmountError> for ServerError {
    fn from(err: AmountError) -> Self {
        match err {
            AmountError::Invalid(msg) => Self::ParameterMalformed(msg),
            other => Self::AmountOverflow(other.to_string()),
        }
    }
}
