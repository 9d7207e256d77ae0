//! Credit engine client SDK.
//!
//! Typed access to the credit engine's internal RPC surface for request handlers
//! that run paid AI operations.
//!
//! # Example
//!
//! ```no_run
//! use credit_engine_client::{ClientError, CreditEngineClient, ReserveRequest};
//! use credit_engine_core::{HoldId, UserId};
//!
//! # async fn example(user_id: UserId) -> Result<(), ClientError> {
//! let client = CreditEngineClient::new(
//!     "http://credit-engine.internal:8080",
//!     "your-service-api-key",
//! )?;
//!
//! // Hold the credits before calling the provider
//! let hold_id: HoldId = "render-42".parse().expect("valid hold id");
//! let reservation = client
//!     .reserve(&ReserveRequest::amount(user_id, 4).with_hold_id(hold_id.clone()))
//!     .await?;
//!
//! let provider_succeeded = true;
//! if provider_succeeded {
//!     client.commit(&reservation.hold_id).await?;
//! } else {
//!     client.cancel(&reservation.hold_id).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, CreditEngineClient};
pub use error::{ClientError, Result};
pub use types::*;
