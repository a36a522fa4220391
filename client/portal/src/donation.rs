//! Donation records and the paginated listings the admin views page through.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::principal::Donor;

/// A recorded donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: i64,
    pub amount: Decimal,
    pub user_id: i64,
    /// Present when the server joins the donor into the listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Donor>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A donation as pushed over the realtime channel.
///
/// Same fields as [`Donation`], but the server only guarantees `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationNotice {
    pub amount: Decimal,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub user: Option<Donor>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DonationNotice {
    /// A notice carrying nothing but the amount.
    pub fn amount_only(amount: Decimal) -> Self {
        Self {
            amount,
            id: None,
            user_id: None,
            user: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// The full record, when the push carried every required field.
    pub fn into_donation(self) -> Option<Donation> {
        Some(Donation {
            id: self.id?,
            amount: self.amount,
            user_id: self.user_id?,
            user: self.user,
            created_at: self.created_at?,
            updated_at: self.updated_at,
        })
    }
}

impl From<Donation> for DonationNotice {
    fn from(donation: Donation) -> Self {
        Self {
            amount: donation.amount,
            id: Some(donation.id),
            user_id: Some(donation.user_id),
            user: donation.user,
            created_at: Some(donation.created_at),
            updated_at: donation.updated_at,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Pagination
// ─────────────────────────────────────────────────────────

/// Page window requested from a listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub(crate) fn query(&self) -> String {
        format!("page={}&limit={}", self.page, self.limit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// One page of `GET /donations/all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DonationPage {
    #[serde(default)]
    pub donations: Vec<Donation>,
    #[serde(default)]
    pub pagination: Option<PaginationMeta>,
}

/// One page of `GET /admin/users`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DonorPage {
    #[serde(default)]
    pub users: Vec<Donor>,
    #[serde(default)]
    pub pagination: Option<PaginationMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn donation_with_joined_donor() {
        let donation: Donation = serde_json::from_value(json!({
            "id": 7,
            "amount": 25.5,
            "userId": 3,
            "user": { "id": 3, "username": "dana", "age": 44, "createdAt": "2024-05-05T10:00:00Z" },
            "createdAt": "2024-06-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(donation.amount, Decimal::new(255, 1));
        assert_eq!(donation.user.as_ref().map(|u| u.username.as_str()), Some("dana"));
        assert!(donation.updated_at.is_none());
    }

    #[test]
    fn notice_upgrades_only_when_complete() {
        let bare: DonationNotice = serde_json::from_value(json!({ "amount": 12.5 })).unwrap();
        assert_eq!(bare, DonationNotice::amount_only(Decimal::new(125, 1)));
        assert!(bare.into_donation().is_none());

        let full: DonationNotice = serde_json::from_value(json!({
            "id": 9,
            "amount": 40,
            "userId": 2,
            "createdAt": "2024-06-01T12:00:00Z"
        }))
        .unwrap();
        let donation = full.clone().into_donation().unwrap();
        assert_eq!(donation.id, 9);
        assert_eq!(DonationNotice::from(donation), full);
    }

    #[test]
    fn page_listing_tolerates_missing_fields() {
        let page: DonationPage = serde_json::from_value(json!({})).unwrap();
        assert!(page.donations.is_empty());
        assert!(page.pagination.is_none());

        let page: DonorPage = serde_json::from_value(json!({
            "users": [],
            "pagination": { "total": 25, "page": 2, "limit": 10, "totalPages": 3 }
        }))
        .unwrap();
        let meta = page.pagination.unwrap();
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next());
    }

    #[test]
    fn page_request_clamps_to_first_page() {
        assert_eq!(PageRequest::new(0, 0).query(), "page=1&limit=1");
        assert_eq!(PageRequest::default().query(), "page=1&limit=10");
    }
}
