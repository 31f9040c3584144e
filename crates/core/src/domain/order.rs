use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::subject::SubjectId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn generate() -> Self {
        Self(format!("ORD-{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    NewPrescription,
    Refill,
    OverTheCounter,
}

impl OrderType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewPrescription => "New prescription",
            Self::Refill => "Refill",
            Self::OverTheCounter => "Over the counter",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "New prescription" => Some(Self::NewPrescription),
            "Refill" => Some(Self::Refill),
            "Over the counter" => Some(Self::OverTheCounter),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Delivery,
    Pickup,
}

impl DeliveryMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivery => "Delivery",
            Self::Pickup => "Pickup",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Delivery" => Some(Self::Delivery),
            "Pickup" => Some(Self::Pickup),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Placed,
    Processing,
    Completed,
    Cancelled,
}

/// A finalized medication order, written once when a PlaceOrder wizard
/// commits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub subject_id: SubjectId,
    pub order_type: OrderType,
    pub refill_reference: Option<String>,
    pub otc_items: Option<String>,
    pub delivery_method: DeliveryMethod,
    pub pharmacy: Option<String>,
    pub delivery_address: Option<String>,
    pub extra_notes: Option<String>,
    pub attachment_count: u32,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Entry in the pickup pharmacy directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pharmacy {
    pub id: String,
    pub name: String,
    pub suburb: String,
}

impl Pharmacy {
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.suburb)
    }
}
