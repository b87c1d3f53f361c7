use anyhow::Context;
use async_trait::async_trait;
use tokio_rusqlite::Connection;

#[derive(Clone, Debug)]
pub struct Variant {
    pub id: i64,
    pub product_id: i64,
    pub article: Option<String>,
    pub color_name: Option<String>,
    pub color_hex: Option<String>,
    pub measure: Option<String>,
    pub finish: Option<String>,
    pub price: i64,
    pub sale_price: Option<i64>,
    pub stock: i64,
    pub is_active: bool,
    pub is_default: bool,
    pub image: Option<String>,
}

#[async_trait]
pub trait VariantRepository: Send + Sync {
    /// Active variants for the given products, in fetch (id) order.
    async fn active_by_products(&self, product_ids: &[i64]) -> anyhow::Result<Vec<Variant>>;
}

pub struct SqliteVariantRepository {
    conn: Connection,
}

impl SqliteVariantRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS variant (
                    id INTEGER PRIMARY KEY,
                    product_id INTEGER NOT NULL,
                    article TEXT,
                    color_name TEXT,
                    color_hex TEXT,
                    measure TEXT,
                    finish TEXT,
                    price INTEGER NOT NULL DEFAULT 0,
                    sale_price INTEGER,
                    stock INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 0,
                    is_default INTEGER NOT NULL DEFAULT 0,
                    image TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS variant_product_idx ON variant(product_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn variant_from_row(row: &rusqlite::Row) -> rusqlite::Result<Variant> {
    let is_active: i64 = row.get(10)?;
    let is_default: i64 = row.get(11)?;
    Ok(Variant {
        id: row.get(0)?,
        product_id: row.get(1)?,
        article: row.get(2)?,
        color_name: row.get(3)?,
        color_hex: row.get(4)?,
        measure: row.get(5)?,
        finish: row.get(6)?,
        price: row.get(7)?,
        sale_price: row.get(8)?,
        stock: row.get(9)?,
        is_active: is_active != 0,
        is_default: is_default != 0,
        image: row.get(12)?,
    })
}

#[async_trait]
impl VariantRepository for SqliteVariantRepository {
    async fn active_by_products(&self, product_ids: &[i64]) -> anyhow::Result<Vec<Variant>> {
        if product_ids.is_empty() {
            return Ok(vec![]);
        }
        let product_ids = product_ids.to_vec();
        self.conn
            .call(move |conn| {
                let mut variants = Vec::new();
                for chunk in product_ids.chunks(400) {
                    let mut sql = String::from(
                        "SELECT id, product_id, article, color_name, color_hex, measure,
                                finish, price, sale_price, stock, is_active, is_default, image
                         FROM variant WHERE is_active = 1 AND product_id IN (",
                    );
                    for (idx, _) in chunk.iter().enumerate() {
                        if idx > 0 {
                            sql.push_str(", ");
                        }
                        sql.push('?');
                    }
                    sql.push_str(") ORDER BY id");
                    let params: Vec<rusqlite::types::Value> =
                        chunk.iter().map(|id| (*id).into()).collect();
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(params), variant_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    variants.extend(rows);
                }
                Ok(variants)
            })
            .await
            .context("Unable to fetch product variants")
    }
}
