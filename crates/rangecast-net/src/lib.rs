#![forbid(unsafe_code)]

//! HTTP transport used by rangecast sessions.
//!
//! [`HttpClient`] is the `reqwest`-backed [`Net`] implementation. Decorators
//! from [`NetExt`] add bounded retries ([`RetryNet`]) and request-phase
//! timeouts ([`TimeoutNet`]).

mod client;
mod error;
mod retry;
mod timeout;
mod traits;
mod types;

pub use crate::{
    client::HttpClient,
    error::{NetError, NetResult},
    retry::{DefaultRetryPolicy, RetryNet, RetryPolicyTrait},
    timeout::TimeoutNet,
    traits::{ByteStream, Net, NetExt},
    types::{Headers, NetOptions, RangeSpec, RetryPolicy},
};

/// Mock of [`Net`] for downstream unit tests.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    pub use crate::traits::NetMock;
}
