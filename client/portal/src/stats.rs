//! Dashboard statistics and notification values rendered by the admin view.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default visible lifetime of a [`Notification`].
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(5);

/// A count/amount pair over one reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub amount: Decimal,
    pub count: u64,
}

/// Replace-only aggregate of dashboard statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub daily: Window,
    pub weekly: Window,
    pub monthly: Window,
    pub annual: Window,
    pub total_users: u64,
    pub total_donations: Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
}

/// Transient message shown over the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NotificationKind::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NotificationKind::Error,
        }
    }

    /// Notice raised when another client records a donation.
    pub fn donation_received(amount: Decimal) -> Self {
        Self::success(format!("New donation received: ${}", format_amount(amount)))
    }
}

/// Render a currency amount with exactly two decimal places.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}
