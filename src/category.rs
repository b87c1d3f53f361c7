use anyhow::Context;
use async_trait::async_trait;
use tokio_rusqlite::Connection;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> anyhow::Result<Option<Category>>;
    async fn by_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<Category>>;
}

pub struct SqliteCategoryRepository {
    conn: Connection,
}

impl SqliteCategoryRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS category (
                    id INTEGER PRIMARY KEY,
                    slug TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CategoryRepository for SqliteCategoryRepository {
    async fn find_by_slug(&self, slug: &str) -> anyhow::Result<Option<Category>> {
        let slug = slug.trim().to_string();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, slug, name FROM category WHERE slug = ?1")?;
                let mut rows = stmt.query([slug])?;
                let row = match rows.next()? {
                    Some(r) => r,
                    None => return Ok(None),
                };
                Ok(Some(Category {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    name: row.get(2)?,
                }))
            })
            .await
            .context("Unable to find category by slug")
    }

    async fn by_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<Category>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids = ids.to_vec();
        self.conn
            .call(move |conn| {
                let mut categories = Vec::with_capacity(ids.len());
                for chunk in ids.chunks(400) {
                    let mut sql = String::from("SELECT id, slug, name FROM category WHERE id IN (");
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
                        .query_map(rusqlite::params_from_iter(params), |row| {
                            Ok(Category {
                                id: row.get(0)?,
                                slug: row.get(1)?,
                                name: row.get(2)?,
                            })
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    categories.extend(rows);
                }
                Ok(categories)
            })
            .await
            .context("Unable to fetch categories by ids")
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub async fn seed_category(conn: &Connection, id: i64, slug: &str, name: &str) {
        let slug = slug.to_string();
        let name = name.to_string();
        conn.call(move |conn| {
            conn.execute(
                "INSERT INTO category (id, slug, name) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, slug, name],
            )?;
            Ok(())
        })
        .await
        .expect("seed category");
    }

    #[tokio::test]
    async fn finds_category_by_slug() {
        let conn = Connection::open_in_memory().await.expect("open sqlite");
        let repo = SqliteCategoryRepository::init(conn.clone())
            .await
            .expect("init repo");
        seed_category(&conn, 5, "speakers", "Speakers").await;

        let found = repo.find_by_slug(" speakers ").await.expect("query");
        assert_eq!(
            Some(Category {
                id: 5,
                slug: "speakers".to_string(),
                name: "Speakers".to_string()
            }),
            found
        );
        assert_eq!(None, repo.find_by_slug("missing").await.expect("query"));

        let by_ids = repo.by_ids(&[5, 6]).await.expect("query");
        assert_eq!(1, by_ids.len());
    }
}
