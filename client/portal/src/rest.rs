//! REST client for the donation API.
//!
//! Only the profile fetch participates in session verification; the login,
//! registration and dashboard calls produce the values the session and
//! dashboard consume. Amounts go out as JSON numbers.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::donation::{Donation, DonationPage, DonorPage, PageRequest};
use crate::errors::{PortalError, Result};
use crate::principal::{Administrator, Donor, Principal};
use crate::stats::DashboardStats;

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterDonor {
    pub username: String,
    pub password: String,
    pub age: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub token: String,
    #[serde(default)]
    pub user: Option<Donor>,
    #[serde(default)]
    pub admin: Option<Administrator>,
}

#[derive(Debug, Deserialize)]
struct ProfileUpdateResponse {
    user: Donor,
}

#[derive(Debug, Serialize)]
struct AdminRegisterRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct DonateRequest {
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
}

/// Donation entered by an administrator on a donor's behalf.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDonation {
    pub user_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct DonationResponse {
    #[serde(default)]
    donation: Option<Donation>,
}

#[derive(Debug, Deserialize)]
struct DonationListResponse {
    #[serde(default)]
    donations: Vec<Donation>,
}

#[derive(Debug, Deserialize)]
struct CreatedDonorResponse {
    #[serde(default)]
    user: Option<Donor>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    /// Per-field validation failures.
    #[serde(default)]
    errors: Option<Vec<FieldError>>,
}

#[derive(Debug, Deserialize)]
struct FieldError {
    msg: String,
}

impl ErrorBody {
    /// Validation messages joined with `", "`, else `message`.
    fn into_message(self) -> Option<String> {
        match self.errors {
            Some(errors) if !errors.is_empty() => Some(
                errors
                    .into_iter()
                    .map(|e| e.msg)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => self.message,
        }
    }
}

/// A successful authentication: the token and the principal it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
    pub principal: Principal,
}

impl AuthResponse {
    fn into_donor_grant(self) -> Result<AuthGrant> {
        let user = self
            .user
            .ok_or_else(|| PortalError::Protocol("auth response missing `user`".into()))?;
        Ok(AuthGrant {
            token: self.token,
            principal: Principal::Donor(user),
        })
    }

    fn into_admin_grant(self) -> Result<AuthGrant> {
        let admin = self
            .admin
            .ok_or_else(|| PortalError::Protocol("auth response missing `admin`".into()))?;
        Ok(AuthGrant {
            token: self.token,
            principal: Principal::Admin(admin),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Profile collaborator seam
// ─────────────────────────────────────────────────────────

/// Source of the current donor's profile, keyed by bearer token.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_donor_profile(&self, token: &str) -> Result<Donor>;
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `POST /users/login`
    pub async fn login_donor(&self, username: &str, password: &str) -> Result<AuthGrant> {
        let req = self
            .client
            .post(self.url("/users/login"))
            .json(&LoginRequest { username, password });
        let resp: AuthResponse = send_json(req, "Login failed").await?;
        resp.into_donor_grant()
    }

    /// `POST /users/register`
    pub async fn register_donor(&self, form: &RegisterDonor) -> Result<AuthGrant> {
        let req = self.client.post(self.url("/users/register")).json(form);
        let resp: AuthResponse = send_json(req, "Registration failed").await?;
        resp.into_donor_grant()
    }

    /// `POST /admin/login`
    pub async fn login_admin(&self, username: &str, password: &str) -> Result<AuthGrant> {
        let req = self
            .client
            .post(self.url("/admin/login"))
            .json(&LoginRequest { username, password });
        let resp: AuthResponse = send_json(req, "Admin login failed").await?;
        resp.into_admin_grant()
    }

    /// `GET /users/profile`
    pub async fn donor_profile(&self, token: &str) -> Result<Donor> {
        let req = self.client.get(self.url("/users/profile")).bearer_auth(token);
        send_json(req, "Failed to load profile").await
    }

    /// `PUT /users/profile`
    pub async fn update_donor_profile(&self, token: &str, update: &ProfileUpdate) -> Result<Donor> {
        let req = self
            .client
            .put(self.url("/users/profile"))
            .bearer_auth(token)
            .json(update);
        let resp: ProfileUpdateResponse = send_json(req, "Update failed").await?;
        Ok(resp.user)
    }

    /// `GET /admin/dashboard`
    pub async fn dashboard_stats(&self, token: &str) -> Result<DashboardStats> {
        let req = self.client.get(self.url("/admin/dashboard")).bearer_auth(token);
        send_json(req, "Failed to load dashboard stats").await
    }

    // ─── Donations ────────────────────────────────────────

    /// `POST /donations` as the signed-in donor.
    pub async fn donate(&self, token: &str, amount: Decimal) -> Result<Option<Donation>> {
        let req = self
            .client
            .post(self.url("/donations"))
            .bearer_auth(token)
            .json(&DonateRequest { amount });
        let resp: DonationResponse = send_json(req, "Donation failed").await?;
        Ok(resp.donation)
    }

    /// `GET /donations/my-donations`
    pub async fn my_donations(&self, token: &str) -> Result<Vec<Donation>> {
        let req = self
            .client
            .get(self.url("/donations/my-donations"))
            .bearer_auth(token);
        let resp: DonationListResponse = send_json(req, "Failed to load donations").await?;
        Ok(resp.donations)
    }

    /// `GET /donations/all`, one page at a time.
    pub async fn all_donations(&self, token: &str, page: PageRequest) -> Result<DonationPage> {
        let path = format!("/donations/all?{}", page.query());
        let req = self.client.get(self.url(&path)).bearer_auth(token);
        send_json(req, "Failed to load donations").await
    }

    /// `POST /donations/admin`
    pub async fn record_donation(
        &self,
        token: &str,
        donation: &RecordDonation,
    ) -> Result<Option<Donation>> {
        let req = self
            .client
            .post(self.url("/donations/admin"))
            .bearer_auth(token)
            .json(donation);
        let resp: DonationResponse = send_json(req, "Failed to create donation").await?;
        Ok(resp.donation)
    }

    // ─── Admin user management ────────────────────────────

    /// `GET /admin/users`
    pub async fn list_donors(&self, token: &str, page: PageRequest) -> Result<DonorPage> {
        let path = format!("/admin/users?{}", page.query());
        let req = self.client.get(self.url(&path)).bearer_auth(token);
        send_json(req, "Failed to load users").await
    }

    /// `POST /admin/users`
    pub async fn create_donor(&self, token: &str, form: &RegisterDonor) -> Result<Option<Donor>> {
        let req = self
            .client
            .post(self.url("/admin/users"))
            .bearer_auth(token)
            .json(form);
        let resp: CreatedDonorResponse = send_json(req, "Failed to create user").await?;
        Ok(resp.user)
    }

    /// `DELETE /admin/users/:id`
    pub async fn delete_donor(&self, token: &str, id: i64) -> Result<()> {
        let req = self
            .client
            .delete(self.url(&format!("/admin/users/{id}")))
            .bearer_auth(token);
        check_status(req.send().await?, "Failed to delete user").await?;
        Ok(())
    }

    /// `POST /admin/register`: create another administrator account.
    pub async fn register_admin(&self, token: &str, username: &str, password: &str) -> Result<()> {
        let req = self
            .client
            .post(self.url("/admin/register"))
            .bearer_auth(token)
            .json(&AdminRegisterRequest { username, password });
        check_status(req.send().await?, "Failed to create admin").await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileSource for RestClient {
    async fn fetch_donor_profile(&self, token: &str) -> Result<Donor> {
        self.donor_profile(token).await
    }
}

/// Send a request and decode a JSON body, mapping non-2xx responses to
/// [`PortalError::Status`] with the server's `message` when it sent one.
async fn send_json<T: DeserializeOwned>(req: RequestBuilder, fallback: &str) -> Result<T> {
    let resp = req.send().await?;
    let resp = check_status(resp, fallback).await?;
    Ok(resp.json().await?)
}

async fn check_status(resp: Response, fallback: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = resp
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| fallback.to_string());
    debug!("REST call rejected with {status}: {message}");
    Err(PortalError::Status {
        status: status.as_u16(),
        message,
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
