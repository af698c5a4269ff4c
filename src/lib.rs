//! # Tessera
//!
//! `tessera` is the identity service that sits behind the API gateway. It
//! issues short-lived signed access tokens and long-lived, single-use refresh
//! tokens for first-party username/password accounts, and protects its own
//! credential endpoints with a distributed fixed-window rate limiter.
//!
//! ## Token lifecycle
//!
//! Every successful registration, login or refresh mints a fresh pair:
//!
//! - **Access token**: an HS256 JWT carrying `{sub, username, iat, exp}`,
//!   verified statelessly by downstream services. Never persisted.
//! - **Refresh token**: 32 bytes from the OS RNG, URL-safe base64. Only its
//!   SHA-256 digest is stored, bound to the owning user and an absolute
//!   expiry. Redeeming it deletes the row in a single statement, so a stolen
//!   or replayed token loses the race against the legitimate holder.
//!
//! ## Rate limiting
//!
//! Counters live in `PostgreSQL`, keyed by `(policy, identity, window)`, so
//! any number of horizontally scaled instances share the same budget. The
//! global policy covers every route; a tighter sensitive policy additionally
//! guards `/register`.

pub mod api;
pub mod cli;
