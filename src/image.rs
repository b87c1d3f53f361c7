use anyhow::Context;
use async_trait::async_trait;
use tokio_rusqlite::Connection;

#[derive(Clone, Debug)]
pub struct ProductImage {
    pub id: i64,
    pub product_id: i64,
    pub url: String,
    pub is_primary: bool,
    pub sort_order: i64,
}

#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Images for the given products, primary first, then by sort order.
    async fn by_products(&self, product_ids: &[i64]) -> anyhow::Result<Vec<ProductImage>>;
}

pub struct SqliteImageRepository {
    conn: Connection,
}

impl SqliteImageRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_image (
                    id INTEGER PRIMARY KEY,
                    product_id INTEGER NOT NULL,
                    url TEXT NOT NULL,
                    is_primary INTEGER NOT NULL DEFAULT 0,
                    sort_order INTEGER NOT NULL DEFAULT 0
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_image_product_idx
                 ON product_image(product_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ImageRepository for SqliteImageRepository {
    async fn by_products(&self, product_ids: &[i64]) -> anyhow::Result<Vec<ProductImage>> {
        if product_ids.is_empty() {
            return Ok(vec![]);
        }
        let product_ids = product_ids.to_vec();
        self.conn
            .call(move |conn| {
                let mut images = Vec::new();
                for chunk in product_ids.chunks(400) {
                    let mut sql = String::from(
                        "SELECT id, product_id, url, is_primary, sort_order
                         FROM product_image WHERE product_id IN (",
                    );
                    for (idx, _) in chunk.iter().enumerate() {
                        if idx > 0 {
                            sql.push_str(", ");
                        }
                        sql.push('?');
                    }
                    sql.push_str(") ORDER BY is_primary DESC, sort_order ASC, id ASC");
                    let params: Vec<rusqlite::types::Value> =
                        chunk.iter().map(|id| (*id).into()).collect();
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(params), |row| {
                            let is_primary: i64 = row.get(3)?;
                            Ok(ProductImage {
                                id: row.get(0)?,
                                product_id: row.get(1)?,
                                url: row.get(2)?,
                                is_primary: is_primary != 0,
                                sort_order: row.get(4)?,
                            })
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    images.extend(rows);
                }
                Ok(images)
            })
            .await
            .context("Unable to fetch product images")
    }
}
