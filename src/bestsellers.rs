use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use itertools::Itertools;
use serde::Serialize;

use crate::activity::ActivityLogRepository;
use crate::category::{Category, CategoryRepository};
use crate::enrich::{enrich, EnrichedProduct};
use crate::image::ImageRepository;
use crate::popularity::popular_product_ids;
use crate::product::ProductRepository;
use crate::variant::VariantRepository;

/// Curated slug list shown ahead of anything analytics-driven. Managed by
/// hand, versioned next to the deployment, loaded from a YAML side file or
/// an env override.
#[derive(Clone, Debug, Default)]
pub struct FeaturedList {
    slugs: Vec<String>,
}

impl FeaturedList {
    pub fn new(slugs: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let slugs = slugs
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(s.clone()))
            .collect();
        Self { slugs }
    }

    /// Missing file is a valid state — a fresh deployment has no curated
    /// list yet and the chain falls through to popularity and recency.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let input = match std::fs::read_to_string(path) {
            Ok(input) => input,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        let slugs: Vec<String> = serde_yaml::from_str(&input)?;
        Ok(Self::new(slugs))
    }

    pub fn from_env(key: &str) -> Self {
        let raw = envmnt::get_or(key, "");
        Self::new(raw.split(',').map(str::to_string).collect())
    }

    pub fn slugs(&self) -> &[String] {
        &self.slugs
    }

    pub fn len(&self) -> usize {
        self.slugs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slugs.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Target size of the final list.
    pub total: usize,
    /// How many slots popularity plus its recency top-up fill together.
    pub core_target: usize,
    /// How many recent events the popularity tier reads.
    pub event_batch: usize,
    /// Per-query deadline; a slow store degrades the same way a broken
    /// one does.
    pub query_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total: 10,
            core_target: 7,
            event_batch: 1000,
            query_timeout: Duration::from_secs(3),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            total: envmnt::get_parse("BESTSELLER_TOTAL")
                .unwrap_or(defaults.total)
                .max(1),
            core_target: envmnt::get_parse("BESTSELLER_CORE").unwrap_or(defaults.core_target),
            event_batch: envmnt::get_parse("BESTSELLER_EVENT_BATCH")
                .unwrap_or(defaults.event_batch),
            query_timeout: Duration::from_millis(
                envmnt::get_parse("BESTSELLER_QUERY_TIMEOUT_MS")
                    .unwrap_or(defaults.query_timeout.as_millis() as u64),
            ),
        }
    }
}

/// External product representation handed to presentation code.
#[derive(Clone, Debug, Serialize)]
pub struct CatalogItem {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub price: i64,
    pub discount_price: Option<i64>,
    pub stock: i64,
    pub category: Option<CatalogCategory>,
    pub image: Option<String>,
    pub color: Option<String>,
    pub measure: Option<String>,
    pub article: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CatalogCategory {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

pub struct BestsellerService {
    products: Arc<dyn ProductRepository>,
    categories: Arc<dyn CategoryRepository>,
    variants: Arc<dyn VariantRepository>,
    images: Arc<dyn ImageRepository>,
    activity: Arc<dyn ActivityLogRepository>,
    featured: FeaturedList,
    config: PipelineConfig,
}

impl BestsellerService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        categories: Arc<dyn CategoryRepository>,
        variants: Arc<dyn VariantRepository>,
        images: Arc<dyn ImageRepository>,
        activity: Arc<dyn ActivityLogRepository>,
        featured: FeaturedList,
        config: PipelineConfig,
    ) -> Self {
        Self {
            products,
            categories,
            variants,
            images,
            activity,
            featured,
            config,
        }
    }

    /// Assembles the bestseller list: with a category slug, recent active
    /// products of that category; without one, the full fallback chain.
    /// Identifier order from selection is preserved in the output.
    pub async fn bestsellers(
        &self,
        category_slug: Option<&str>,
    ) -> anyhow::Result<Vec<CatalogItem>> {
        let ids = match category_slug {
            Some(slug) => self.category_scoped_ids(slug).await?,
            None => self.fallback_chain_ids().await,
        };
        Ok(self.assemble(&ids).await)
    }

    /// Category mode has no fallback tier, so a store failure here is the
    /// one error this pipeline surfaces. An unknown slug is not an error.
    async fn category_scoped_ids(&self, slug: &str) -> anyhow::Result<Vec<i64>> {
        let category = tokio::time::timeout(
            self.config.query_timeout,
            self.categories.find_by_slug(slug),
        )
        .await
        .map_err(|_| anyhow!("Category lookup timed out"))??;
        let Some(category) = category else {
            return Ok(vec![]);
        };
        let ids = tokio::time::timeout(
            self.config.query_timeout,
            self.products.active_by_category(category.id, self.config.total),
        )
        .await
        .map_err(|_| anyhow!("Category products query timed out"))??;
        let mut chosen = Vec::with_capacity(self.config.total);
        extend_unique(&mut chosen, ids, self.config.total);
        Ok(chosen)
    }

    /// The four-tier chain. Every tier sees what earlier tiers picked and
    /// only adds new identifiers, so the result is duplicate-free by
    /// construction. Analytics may be empty or broken; tiers 3 and 4 then
    /// degrade the whole list to pure recency.
    async fn fallback_chain_ids(&self) -> Vec<i64> {
        let total = self.config.total;
        let mut chosen: Vec<i64> = Vec::with_capacity(total);

        // 1. Кураторський список — завжди попереду.
        let featured = self
            .run_soft(
                "featured products",
                self.products.ids_by_slugs(self.featured.slugs()),
            )
            .await;
        extend_unique(&mut chosen, featured, total);

        // 2. Popularity over the recent view batch.
        let exclude: HashSet<i64> = chosen.iter().copied().collect();
        let popular = popular_product_ids(
            self.activity.as_ref(),
            self.config.event_batch,
            &exclude,
            self.config.core_target,
            self.config.query_timeout,
        )
        .await;
        let core_start = chosen.len();
        extend_unique(&mut chosen, popular, total);

        // 3. Recency top-up so tiers 2+3 together reach the core target.
        let core_len = chosen.len() - core_start;
        if core_len < self.config.core_target && chosen.len() < total {
            let missing = (self.config.core_target - core_len).min(total - chosen.len());
            let recent = self
                .run_soft(
                    "recent products",
                    self.products.recent_active(missing, &chosen),
                )
                .await;
            extend_unique(&mut chosen, recent, total);
        }

        // 4. Recency padding up to the full list size.
        if chosen.len() < total {
            let missing = total - chosen.len();
            let recent = self
                .run_soft(
                    "recent products",
                    self.products.recent_active(missing, &chosen),
                )
                .await;
            extend_unique(&mut chosen, recent, total);
        }

        chosen.truncate(total);
        chosen
    }

    async fn assemble(&self, ids: &[i64]) -> Vec<CatalogItem> {
        if ids.is_empty() {
            return vec![];
        }
        let products = self.run_soft("products", self.products.by_ids(ids)).await;
        let mut by_id: HashMap<i64, _> = products.into_iter().map(|p| (p.id, p)).collect();
        let ordered: Vec<_> = ids.iter().filter_map(|id| by_id.remove(id)).collect();

        let enriched = enrich(
            ordered,
            self.variants.as_ref(),
            self.images.as_ref(),
            self.config.query_timeout,
        )
        .await;

        let category_ids: Vec<i64> = enriched
            .iter()
            .filter_map(|e| e.product.category_id)
            .unique()
            .collect();
        let categories: HashMap<i64, Category> = self
            .run_soft("categories", self.categories.by_ids(&category_ids))
            .await
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        enriched
            .into_iter()
            .map(|e| adapt(e, &categories))
            .collect()
    }

    async fn run_soft<T, F>(&self, what: &str, fut: F) -> T
    where
        T: Default,
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.config.query_timeout, fut).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                log::warn!("Unable to load {what}: {err:#}");
                T::default()
            }
            Err(_) => {
                log::warn!("Query for {what} timed out");
                T::default()
            }
        }
    }
}

fn adapt(enriched: EnrichedProduct, categories: &HashMap<i64, Category>) -> CatalogItem {
    let EnrichedProduct {
        product,
        default_variant,
        stock,
        image,
        ..
    } = enriched;
    let category = product
        .category_id
        .and_then(|id| categories.get(&id))
        .map(|c| CatalogCategory {
            id: c.id,
            slug: c.slug.clone(),
            name: c.name.clone(),
        });
    let variant = default_variant.as_ref();
    CatalogItem {
        id: product.id,
        slug: product.slug,
        title: normalize_title(&product.name),
        price: product.price,
        discount_price: product.discount_price,
        stock,
        category,
        image,
        color: variant.and_then(|v| v.color_name.clone()),
        measure: variant.and_then(|v| v.measure.clone()),
        article: variant.and_then(|v| v.article.clone()),
    }
}

fn normalize_title(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extend_unique(chosen: &mut Vec<i64>, candidates: Vec<i64>, cap: usize) {
    for id in candidates {
        if chosen.len() >= cap {
            break;
        }
        if !chosen.contains(&id) {
            chosen.push(id);
        }
    }
}
