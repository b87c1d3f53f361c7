#![deny(clippy::unwrap_used)]

pub mod activity;
pub mod bestsellers;
pub mod category;
pub mod enrich;
pub mod image;
pub mod popularity;
pub mod product;
pub mod variant;

/// Comma-joined lists as the catalog store writes them for image columns.
pub(crate) fn split_list(s: Option<String>) -> Vec<String> {
    s.unwrap_or_default()
        .split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn splits_image_lists() {
        assert_eq!(
            vec!["a.jpg".to_string(), "b.jpg".to_string()],
            split_list(Some("a.jpg, b.jpg,".to_string()))
        );
        assert!(split_list(None).is_empty());
        assert!(split_list(Some("  ".to_string())).is_empty());
    }
}
