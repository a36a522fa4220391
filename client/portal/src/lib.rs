//! Donation portal client core.
//!
//! Session restoration and verification, route gating, the donation and
//! admin REST calls, and the realtime channel that keeps the administrator
//! dashboard in step with the server.
//! The REST API and push server are external; this crate only consumes them.

pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod donation;
pub mod errors;
pub mod guard;
pub mod principal;
pub mod realtime;
pub mod rest;
pub mod session;
pub mod stats;
pub mod verifier;

pub use credentials::CredentialStore;
pub use donation::{Donation, DonationNotice};
pub use errors::{PortalError, Result};
pub use principal::{Administrator, Donor, Principal, PrincipalKind, UserType};
pub use session::{SessionContext, SessionState};
