use std::collections::HashMap;
use std::time::Duration;

use crate::image::{ImageRepository, ProductImage};
use crate::product::Product;
use crate::variant::{Variant, VariantRepository};

/// A product joined with its variants and resolved display fields. Lives
/// only for the duration of one pipeline run.
#[derive(Clone, Debug)]
pub struct EnrichedProduct {
    pub product: Product,
    pub variants: Vec<Variant>,
    pub default_variant: Option<Variant>,
    pub stock: i64,
    pub image: Option<String>,
}

pub fn variants_by_product(variants: Vec<Variant>) -> HashMap<i64, Vec<Variant>> {
    let mut grouped: HashMap<i64, Vec<Variant>> = HashMap::new();
    for variant in variants {
        grouped.entry(variant.product_id).or_default().push(variant);
    }
    grouped
}

/// Keeps the repository's priority order (primary first) inside each group.
pub fn images_by_product(images: Vec<ProductImage>) -> HashMap<i64, Vec<ProductImage>> {
    let mut grouped: HashMap<i64, Vec<ProductImage>> = HashMap::new();
    for image in images {
        grouped.entry(image.product_id).or_default().push(image);
    }
    grouped
}

/// First variant flagged as default wins; with no flag the first variant in
/// fetch order stands in. More than one default should not happen upstream,
/// but when it does the first one in fetch order is kept.
pub fn default_variant(variants: &[Variant]) -> Option<&Variant> {
    variants
        .iter()
        .find(|v| v.is_default)
        .or_else(|| variants.first())
}

/// Stock shown for the product: summed across variants when any exist,
/// otherwise the product's own counter.
pub fn effective_stock(product: &Product, variants: &[Variant]) -> i64 {
    if variants.is_empty() {
        product.stock.unwrap_or(0)
    } else {
        variants.iter().map(|v| v.stock).sum()
    }
}

/// Display image priority: image table, then the product's own references,
/// then the default variant's image.
pub fn resolve_image(
    product: &Product,
    images: &[ProductImage],
    default_variant: Option<&Variant>,
) -> Option<String> {
    images
        .first()
        .map(|i| i.url.clone())
        .or_else(|| product.image.clone())
        .or_else(|| product.images.first().cloned())
        .or_else(|| default_variant.and_then(|v| v.image.clone()))
}

/// Joins variant and image records into each product with two batched
/// queries. A failed or timed out batch degrades to "no data for that
/// dimension"; products missing from either join are still returned.
pub async fn enrich(
    products: Vec<Product>,
    variants: &dyn VariantRepository,
    images: &dyn ImageRepository,
    timeout: Duration,
) -> Vec<EnrichedProduct> {
    let ids: Vec<i64> = products.iter().map(|p| p.id).collect();

    let fetched_variants = match tokio::time::timeout(timeout, variants.active_by_products(&ids))
        .await
    {
        Ok(Ok(variants)) => variants,
        Ok(Err(err)) => {
            log::warn!("Unable to load variants, products stay unenriched: {err:#}");
            vec![]
        }
        Err(_) => {
            log::warn!("Variant query timed out, products stay unenriched");
            vec![]
        }
    };
    let fetched_images = match tokio::time::timeout(timeout, images.by_products(&ids)).await {
        Ok(Ok(images)) => images,
        Ok(Err(err)) => {
            log::warn!("Unable to load product images: {err:#}");
            vec![]
        }
        Err(_) => {
            log::warn!("Product image query timed out");
            vec![]
        }
    };

    let mut variant_groups = variants_by_product(fetched_variants);
    let mut image_groups = images_by_product(fetched_images);

    products
        .into_iter()
        .map(|product| {
            let variants = variant_groups.remove(&product.id).unwrap_or_default();
            let images = image_groups.remove(&product.id).unwrap_or_default();
            let default = default_variant(&variants).cloned();
            let stock = effective_stock(&product, &variants);
            let image = resolve_image(&product, &images, default.as_ref());
            EnrichedProduct {
                product,
                variants,
                default_variant: default,
                stock,
                image,
            }
        })
        .collect()
}
