use std::sync::Arc;

use anyhow::Context;
use tokio_rusqlite::Connection;

use rt_bestsellers::activity::SqliteActivityLogRepository;
use rt_bestsellers::bestsellers::{BestsellerService, FeaturedList, PipelineConfig};
use rt_bestsellers::category::SqliteCategoryRepository;
use rt_bestsellers::image::SqliteImageRepository;
use rt_bestsellers::product::SqliteProductRepository;
use rt_bestsellers::variant::SqliteVariantRepository;

/// Runs the bestseller pipeline against the catalog database and prints
/// the resulting list as JSON. Optional first argument scopes the list to
/// one category slug.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let db_path = envmnt::get_or("DATABASE_PATH", "catalog.db");
    let category = std::env::args().nth(1);

    let conn = Connection::open(&db_path)
        .await
        .with_context(|| format!("Unable to open catalog database at {db_path}"))?;

    let products = Arc::new(SqliteProductRepository::init(conn.clone()).await?);
    let categories = Arc::new(SqliteCategoryRepository::init(conn.clone()).await?);
    let variants = Arc::new(SqliteVariantRepository::init(conn.clone()).await?);
    let images = Arc::new(SqliteImageRepository::init(conn.clone()).await?);
    let activity = Arc::new(SqliteActivityLogRepository::init(conn.clone()).await?);

    let featured = if envmnt::exists("FEATURED_SLUGS") {
        FeaturedList::from_env("FEATURED_SLUGS")
    } else {
        FeaturedList::load(&envmnt::get_or("FEATURED_LIST_PATH", "featured.yaml"))
            .context("Unable to load featured list")?
    };

    let service = BestsellerService::new(
        products,
        categories,
        variants,
        images,
        activity,
        featured,
        PipelineConfig::from_env(),
    );

    let items = service.bestsellers(category.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
