use serde::{Deserialize, Serialize};

use super::order::Order;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Customer,
}

impl Role {
    /// Anything other than the exact `ADMIN` role is an ordinary customer.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("ADMIN") => Role::Admin,
            _ => Role::Customer,
        }
    }
}

/// Identity forwarded by the gateway on each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
    pub role: Role,
}

impl Caller {
    pub fn customer(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn owns(&self, order: &Order) -> bool {
        self.user_id.as_deref() == Some(order.user_id.as_str())
    }

    pub fn can_view(&self, order: &Order) -> bool {
        self.is_admin() || self.owns(order)
    }

    /// User filter for listings: admins see the whole store.
    pub fn scope(&self) -> Option<&str> {
        if self.is_admin() {
            None
        } else {
            self.user_id.as_deref()
        }
    }
}
