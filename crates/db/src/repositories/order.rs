use sqlx::Row;

use remedi_core::{DeliveryMethod, Order, OrderId, OrderStatus, OrderType, SubjectId};

use super::{parse_timestamp, OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn order_type_as_str(order_type: &OrderType) -> &'static str {
    match order_type {
        OrderType::NewPrescription => "new_prescription",
        OrderType::Refill => "refill",
        OrderType::OverTheCounter => "over_the_counter",
    }
}

fn parse_order_type(raw: &str) -> Result<OrderType, RepositoryError> {
    match raw {
        "new_prescription" => Ok(OrderType::NewPrescription),
        "refill" => Ok(OrderType::Refill),
        "over_the_counter" => Ok(OrderType::OverTheCounter),
        other => Err(RepositoryError::Decode(format!("unknown order type `{other}`"))),
    }
}

fn delivery_method_as_str(method: &DeliveryMethod) -> &'static str {
    match method {
        DeliveryMethod::Delivery => "delivery",
        DeliveryMethod::Pickup => "pickup",
    }
}

fn parse_delivery_method(raw: &str) -> Result<DeliveryMethod, RepositoryError> {
    match raw {
        "delivery" => Ok(DeliveryMethod::Delivery),
        "pickup" => Ok(DeliveryMethod::Pickup),
        other => Err(RepositoryError::Decode(format!("unknown delivery method `{other}`"))),
    }
}

fn status_as_str(status: &OrderStatus) -> &'static str {
    match status {
        OrderStatus::Placed => "placed",
        OrderStatus::Processing => "processing",
        OrderStatus::Completed => "completed",
        OrderStatus::Cancelled => "cancelled",
    }
}

fn parse_status(raw: &str) -> OrderStatus {
    match raw {
        "processing" => OrderStatus::Processing,
        "completed" => OrderStatus::Completed,
        "cancelled" => OrderStatus::Cancelled,
        _ => OrderStatus::Placed,
    }
}

fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let subject_id: String =
        row.try_get("subject_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let order_type_raw: String =
        row.try_get("order_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let refill_reference: Option<String> =
        row.try_get("refill_reference").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let otc_items: Option<String> =
        row.try_get("otc_items").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delivery_method_raw: String =
        row.try_get("delivery_method").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let pharmacy: Option<String> =
        row.try_get("pharmacy").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delivery_address: Option<String> =
        row.try_get("delivery_address").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let extra_notes: Option<String> =
        row.try_get("extra_notes").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let attachment_count: i64 =
        row.try_get("attachment_count").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_raw: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_raw: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Order {
        id: OrderId(id),
        subject_id: SubjectId(subject_id),
        order_type: parse_order_type(&order_type_raw)?,
        refill_reference,
        otc_items,
        delivery_method: parse_delivery_method(&delivery_method_raw)?,
        pharmacy,
        delivery_address,
        extra_notes,
        attachment_count: attachment_count.max(0) as u32,
        status: parse_status(&status_raw),
        created_at: parse_timestamp(&created_at_raw)?,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO patient_order (id, subject_id, order_type, refill_reference, otc_items, \
             delivery_method, pharmacy, delivery_address, extra_notes, attachment_count, status, \
             created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(&order.subject_id.0)
        .bind(order_type_as_str(&order.order_type))
        .bind(&order.refill_reference)
        .bind(&order.otc_items)
        .bind(delivery_method_as_str(&order.delivery_method))
        .bind(&order.pharmacy)
        .bind(&order.delivery_address)
        .bind(&order.extra_notes)
        .bind(i64::from(order.attachment_count))
        .bind(status_as_str(&order.status))
        .bind(order.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM patient_order WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn list_for_subject(&self, subject: &SubjectId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM patient_order WHERE subject_id = ? ORDER BY created_at DESC",
        )
        .bind(&subject.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn distinct_addresses(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT delivery_address FROM patient_order \
             WHERE subject_id = ? AND delivery_address IS NOT NULL \
             GROUP BY delivery_address ORDER BY MAX(created_at) DESC",
        )
        .bind(&subject.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("delivery_address")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect()
    }
}
