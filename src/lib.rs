//! # Vestibule
//!
//! `vestibule` is the admission pipeline that runs in front of a multi-tenant
//! HTTP API. Every request passes, in order, through:
//!
//! - **Rate limiting:** a per-client token bucket keyed by client address.
//!   Refused requests get `429` and never reach authentication.
//! - **Authentication:** an optional `Authorization: Bearer <token>` header is
//!   resolved to a user through the token store. Tokens are random 26-character
//!   base32 strings; only their SHA-256 fingerprint is ever stored.
//! - **Authorization:** per-route gates require an authenticated caller, an
//!   activated account, or a named permission code such as `comments:write`.
//!
//! The [`api`] module wires the pipeline into an `axum` router together with the
//! account routes (registration, activation, bearer token issuance), and
//! [`storage`] provides PostgreSQL and in-memory backends for the token,
//! permission and user stores.

pub mod api;
pub mod cli;
pub mod gateway;
pub mod storage;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
