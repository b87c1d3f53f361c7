use anyhow::Context;
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;

use crate::split_list;

#[derive(Clone, Debug)]
pub struct Product {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub price: i64,
    pub discount_price: Option<i64>,
    pub stock: Option<i64>,
    pub category_id: Option<i64>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub image: Option<String>,
    pub images: Vec<String>,
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Active product ids, most recently created first, skipping `exclude`.
    async fn recent_active(&self, limit: usize, exclude: &[i64]) -> anyhow::Result<Vec<i64>>;
    async fn active_by_category(&self, category_id: i64, limit: usize)
        -> anyhow::Result<Vec<i64>>;
    /// Resolves slugs to ids of active products, keeping the declared slug
    /// order. Unknown slugs are skipped.
    async fn ids_by_slugs(&self, slugs: &[String]) -> anyhow::Result<Vec<i64>>;
    async fn by_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<Product>>;
}

pub struct SqliteProductRepository {
    conn: Connection,
}

impl SqliteProductRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", &"WAL");
            let _ = conn.pragma_update(None, "synchronous", &"NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", &5000i64);
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product (
                    id INTEGER PRIMARY KEY,
                    slug TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    price INTEGER NOT NULL DEFAULT 0,
                    discount_price INTEGER,
                    stock INTEGER,
                    category_id INTEGER,
                    is_active INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    image TEXT,
                    images TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_active_created_idx
                 ON product(is_active, created_at)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_category_idx ON product(category_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn product_from_row(row: &rusqlite::Row) -> rusqlite::Result<Product> {
    let id: i64 = row.get(0)?;
    let slug: String = row.get(1)?;
    let name: String = row.get(2)?;
    let price: i64 = row.get(3)?;
    let discount_price: Option<i64> = row.get(4)?;
    let stock: Option<i64> = row.get(5)?;
    let category_id: Option<i64> = row.get(6)?;
    let is_active: i64 = row.get(7)?;
    let created_at: i64 = row.get(8)?;
    let image: Option<String> = row.get(9)?;
    let images: Option<String> = row.get(10)?;
    Ok(Product {
        id,
        slug,
        name,
        price,
        discount_price,
        stock,
        category_id,
        is_active: is_active != 0,
        created_at: OffsetDateTime::from_unix_timestamp(created_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        image,
        images: split_list(images),
    })
}

const SELECT_COLUMNS: &str = "id, slug, name, price, discount_price, stock, category_id, \
                              is_active, created_at, image, images";

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn recent_active(&self, limit: usize, exclude: &[i64]) -> anyhow::Result<Vec<i64>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        // Вибираємо з запасом і відкидаємо виключені вже на нашому боці.
        let fetch = limit + exclude.len();
        let exclude = exclude.to_vec();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM product WHERE is_active = 1
                     ORDER BY created_at DESC, id DESC LIMIT ?1",
                )?;
                let ids = stmt
                    .query_map([fetch as i64], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids
                    .into_iter()
                    .filter(|id| !exclude.contains(id))
                    .take(limit)
                    .collect())
            })
            .await
            .context("Unable to list recent active products")
    }

    async fn active_by_category(
        &self,
        category_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<i64>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM product WHERE is_active = 1 AND category_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(
                        rusqlite::params![category_id, limit as i64],
                        |row| row.get::<_, i64>(0),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await
            .context("Unable to list category products")
    }

    async fn ids_by_slugs(&self, slugs: &[String]) -> anyhow::Result<Vec<i64>> {
        if slugs.is_empty() {
            return Ok(vec![]);
        }
        let slugs = slugs.to_vec();
        self.conn
            .call(move |conn| {
                let mut found = std::collections::HashMap::new();
                for chunk in slugs.chunks(400) {
                    let mut sql = String::from(
                        "SELECT slug, id FROM product WHERE is_active = 1 AND slug IN (",
                    );
                    for (idx, _) in chunk.iter().enumerate() {
                        if idx > 0 {
                            sql.push_str(", ");
                        }
                        sql.push('?');
                    }
                    sql.push(')');
                    let params: Vec<rusqlite::types::Value> =
                        chunk.iter().map(|s| s.clone().into()).collect();
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(params), |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    found.extend(rows);
                }
                Ok(slugs.iter().filter_map(|slug| found.get(slug).copied()).collect())
            })
            .await
            .context("Unable to resolve product slugs")
    }

    async fn by_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<Product>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids = ids.to_vec();
        self.conn
            .call(move |conn| {
                let mut products = Vec::with_capacity(ids.len());
                for chunk in ids.chunks(400) {
                    let mut sql =
                        format!("SELECT {SELECT_COLUMNS} FROM product WHERE id IN (");
                    for (idx, _) in chunk.iter().enumerate() {
                        if idx > 0 {
                            sql.push_str(", ");
                        }
                        sql.push('?');
                    }
                    sql.push(')');
                    let params: Vec<rusqlite::types::Value> =
                        chunk.iter().map(|id| (*id).into()).collect();
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(params), product_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    products.extend(rows);
                }
                Ok(products)
            })
            .await
            .context("Unable to fetch products by ids")
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub async fn seed_product(
        conn: &Connection,
        id: i64,
        slug: &str,
        active: bool,
        created_at: i64,
    ) {
        seed_product_full(conn, id, slug, active, created_at, None, None).await;
    }

    pub async fn seed_product_full(
        conn: &Connection,
        id: i64,
        slug: &str,
        active: bool,
        created_at: i64,
        category_id: Option<i64>,
        stock: Option<i64>,
    ) {
        let slug = slug.to_string();
        let name = format!("Product {slug}");
        conn.call(move |conn| {
            conn.execute(
                "INSERT INTO product
                    (id, slug, name, price, stock, category_id, is_active, created_at)
                 VALUES (?1, ?2, ?3, 1000, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    slug,
                    name,
                    stock,
                    category_id,
                    if active { 1i64 } else { 0i64 },
                    created_at
                ],
            )?;
            Ok(())
        })
        .await
        .expect("seed product");
    }

    async fn repo() -> (Connection, SqliteProductRepository) {
        let conn = Connection::open_in_memory().await.expect("open sqlite");
        let repo = SqliteProductRepository::init(conn.clone())
            .await
            .expect("init repo");
        (conn, repo)
    }

    #[tokio::test]
    async fn recent_active_orders_by_creation_and_skips_excluded() {
        let (conn, repo) = repo().await;
        seed_product(&conn, 1, "first", true, 100).await;
        seed_product(&conn, 2, "second", true, 300).await;
        seed_product(&conn, 3, "third", true, 200).await;
        seed_product(&conn, 4, "hidden", false, 400).await;

        let ids = repo.recent_active(10, &[]).await.expect("query");
        assert_eq!(vec![2, 3, 1], ids);

        let ids = repo.recent_active(2, &[2]).await.expect("query");
        assert_eq!(vec![3, 1], ids);

        assert!(repo.recent_active(0, &[]).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn resolves_slugs_in_declared_order() {
        let (conn, repo) = repo().await;
        seed_product(&conn, 1, "alpha", true, 100).await;
        seed_product(&conn, 2, "beta", true, 200).await;
        seed_product(&conn, 3, "gamma", false, 300).await;

        let slugs = vec![
            "beta".to_string(),
            "missing".to_string(),
            "gamma".to_string(),
            "alpha".to_string(),
        ];
        let ids = repo.ids_by_slugs(&slugs).await.expect("query");
        // інактивні та невідомі slug просто пропускаються
        assert_eq!(vec![2, 1], ids);
    }

    #[tokio::test]
    async fn category_scope_is_ordered_and_capped() {
        let (conn, repo) = repo().await;
        seed_product_full(&conn, 1, "a", true, 100, Some(5), None).await;
        seed_product_full(&conn, 2, "b", true, 300, Some(5), None).await;
        seed_product_full(&conn, 3, "c", true, 200, Some(5), None).await;
        seed_product_full(&conn, 4, "d", true, 400, Some(6), None).await;

        let ids = repo.active_by_category(5, 2).await.expect("query");
        assert_eq!(vec![2, 3], ids);
    }

    #[tokio::test]
    async fn fetches_products_by_ids() {
        let (conn, repo) = repo().await;
        seed_product_full(&conn, 7, "seven", true, 100, None, Some(4)).await;

        let products = repo.by_ids(&[7, 8]).await.expect("query");
        assert_eq!(1, products.len());
        assert_eq!("seven", products[0].slug);
        assert_eq!(Some(4), products[0].stock);
        assert!(repo.by_ids(&[]).await.expect("query").is_empty());
    }
}
