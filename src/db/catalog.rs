//! Read access to the shared catalog, plus the small write surface used to
//! seed it. Item authoring proper lives outside this crate.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{CatalogItem, Category, NewItem};

pub(crate) const ITEM_COLUMNS: &str =
    "i.id, i.title, i.category, i.subcategory, i.attachments, i.created_at";

/// Map the six [`ITEM_COLUMNS`] starting at `offset`.
pub(crate) fn item_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<CatalogItem> {
    let attachments_json: String = row.get(offset + 4)?;
    let attachments = serde_json::from_str(&attachments_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(offset + 4, Type::Text, Box::new(e))
    })?;

    Ok(CatalogItem {
        id: row.get(offset)?,
        title: row.get(offset + 1)?,
        category: row.get(offset + 2)?,
        subcategory: row.get(offset + 3)?,
        attachments,
        created_at: row.get(offset + 5)?,
    })
}

pub(crate) fn fetch_item(conn: &Connection, item_id: i64) -> Result<CatalogItem> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?1"),
        params![item_id],
        |row| item_from_row(row, 0),
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("item {item_id}")))
}

impl Database {
    pub fn add_item(&self, new: &NewItem) -> Result<CatalogItem> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(Error::NotEligible("item title must not be empty".into()));
        }
        let subcategory = new.subcategory.trim();
        if !new.category.accepts_subcategory(subcategory) {
            return Err(Error::NotEligible(format!(
                "'{}' is not a {} subcategory (allowed: {})",
                subcategory,
                new.category,
                new.category.allowed_subcategories().join(", ")
            )));
        }

        let attachments = serde_json::to_string(&new.attachments)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        self.conn.execute(
            "INSERT INTO items (title, category, subcategory, attachments, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, new.category, subcategory, attachments, Utc::now()],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(item_id = id, category = %new.category, "catalog item added");

        fetch_item(&self.conn, id)
    }

    pub fn get_item(&self, item_id: i64) -> Result<CatalogItem> {
        fetch_item(&self.conn, item_id)
    }

    pub fn list_items(&self, category: Option<Category>) -> Result<Vec<CatalogItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items i \
             WHERE ?1 IS NULL OR i.category = ?1 \
             ORDER BY i.category, i.subcategory, i.id"
        ))?;
        let rows = stmt.query_map(params![category], |row| item_from_row(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Remove an item; overlay and session rows go with it.
    pub fn delete_item(&self, item_id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM items WHERE id = ?1", params![item_id])?;
        if rows > 0 {
            info!(item_id, "catalog item deleted");
        }
        Ok(rows > 0)
    }
}
