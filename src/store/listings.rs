//! Listing CRUD and the browse filter.

use serde_json::Value;
use tokio_postgres::Row;
use uuid::Uuid;

use super::Store;
use crate::domain::{Category, HotelType, Listing};
use crate::error::StoreError;

/// Listing fields collected by the add-listing wizard.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub region: String,
    pub category: Category,
    pub subtype: Option<HotelType>,
    pub title: String,
    pub description: String,
    pub price_from: Option<i64>,
    pub phone: Option<String>,
    pub owner_chat_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub photos: Vec<String>,
}

const LISTING_COLUMNS: &str = "id, region, category, subtype, title, description, price_from, \
                               currency, phone, owner_chat_id, latitude, longitude, address, \
                               photos, is_active, created_at";

impl Store {
    pub async fn create_listing(&self, new: &NewListing) -> Result<Uuid, StoreError> {
        let client = self.client().await?;
        let photos = Value::from(new.photos.clone());
        let row = client
            .query_one(
                "INSERT INTO listings
                   (region, category, subtype, title, description, price_from,
                    phone, owner_chat_id, latitude, longitude, address, photos, is_active)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, true)
                 RETURNING id",
                &[
                    &new.region,
                    &new.category.as_str(),
                    &new.subtype.map(|s| s.as_str()),
                    &new.title,
                    &new.description,
                    &new.price_from,
                    &new.phone,
                    &new.owner_chat_id,
                    &new.latitude,
                    &new.longitude,
                    &new.address,
                    &photos,
                ],
            )
            .await?;
        Ok(row.get(0))
    }

    pub async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &*format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| listing_from_row(&r)).transpose()
    }

    /// Active listings for the browse flow, newest first.
    pub async fn browse_listings(
        &self,
        region: &str,
        category: Category,
        subtype: Option<HotelType>,
    ) -> Result<Vec<Listing>, StoreError> {
        let client = self.client().await?;
        let subtype_str = subtype.map(|s| s.as_str());
        let rows = client
            .query(
                &*format!(
                    "SELECT {LISTING_COLUMNS} FROM listings
                     WHERE region = $1 AND category = $2
                       AND ($3::text IS NULL OR subtype = $3)
                       AND is_active = true
                     ORDER BY created_at DESC"
                ),
                &[&region, &category.as_str(), &subtype_str],
            )
            .await?;
        rows.iter().map(listing_from_row).collect()
    }

    pub async fn listings_by_owner(&self, owner_chat_id: i64) -> Result<Vec<Listing>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                &*format!(
                    "SELECT {LISTING_COLUMNS} FROM listings
                     WHERE owner_chat_id = $1 ORDER BY created_at DESC"
                ),
                &[&owner_chat_id],
            )
            .await?;
        rows.iter().map(listing_from_row).collect()
    }

    /// Toggle visibility; guarded by the owner in the WHERE clause.
    pub async fn set_listing_active(
        &self,
        id: Uuid,
        owner_chat_id: i64,
        active: bool,
    ) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE listings SET is_active = $3 WHERE id = $1 AND owner_chat_id = $2",
                &[&id, &owner_chat_id, &active],
            )
            .await?;
        Ok(n > 0)
    }

    /// Hard delete; cascades to bookings.
    pub async fn delete_listing(&self, id: Uuid, owner_chat_id: i64) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let n = client
            .execute(
                "DELETE FROM listings WHERE id = $1 AND owner_chat_id = $2",
                &[&id, &owner_chat_id],
            )
            .await?;
        Ok(n > 0)
    }

    pub async fn count_active_listings(&self) -> Result<i64, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM listings WHERE is_active = true", &[])
            .await?;
        Ok(row.get(0))
    }
}

pub(crate) fn listing_from_row(row: &Row) -> Result<Listing, StoreError> {
    let category_str: String = row.get("category");
    let category = Category::from_str(&category_str)
        .ok_or_else(|| StoreError::Invalid(format!("unknown category: {category_str}")))?;
    let subtype = row
        .get::<_, Option<String>>("subtype")
        .map(|s| {
            HotelType::from_str(&s).ok_or_else(|| StoreError::Invalid(format!("unknown subtype: {s}")))
        })
        .transpose()?;
    let photos: Value = row.get("photos");
    let photos: Vec<String> = serde_json::from_value(photos)
        .map_err(|e| StoreError::Invalid(format!("photos column: {e}")))?;

    Ok(Listing {
        id: row.get("id"),
        region: row.get("region"),
        category,
        subtype,
        title: row.get("title"),
        description: row.get("description"),
        price_from: row.get("price_from"),
        currency: row.get("currency"),
        phone: row.get("phone"),
        owner_chat_id: row.get("owner_chat_id"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        address: row.get("address"),
        photos,
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    })
}
