use std::collections::{HashMap, HashSet};
use std::time::Duration;

use itertools::Itertools;

use crate::activity::{product_id_from_event, ActivityEvent, ActivityLogRepository};

/// Orders product ids by view count over one event batch, most viewed
/// first. Ties keep first-seen order, so repeated runs over the same batch
/// are stable. Excluded and undecodable events are skipped.
pub fn rank_by_views(events: &[ActivityEvent], exclude: &HashSet<i64>, k: usize) -> Vec<i64> {
    if k == 0 {
        return vec![];
    }
    let mut counts: HashMap<i64, (usize, usize)> = HashMap::new();
    for event in events {
        let Some(id) = product_id_from_event(event) else {
            continue;
        };
        if exclude.contains(&id) {
            continue;
        }
        let first_seen = counts.len();
        let entry = counts.entry(id).or_insert((0, first_seen));
        entry.0 += 1;
    }
    counts
        .into_iter()
        .sorted_by(|(_, (count_a, seen_a)), (_, (count_b, seen_b))| {
            count_b.cmp(count_a).then(seen_a.cmp(seen_b))
        })
        .map(|(id, _)| id)
        .take(k)
        .collect()
}

/// Popularity tier entry point: fetches the most recent view batch and
/// ranks it. Any event-log failure means "no popularity signal", not an
/// error — the caller falls through to the recency tiers.
pub async fn popular_product_ids(
    log: &dyn ActivityLogRepository,
    batch: usize,
    exclude: &HashSet<i64>,
    k: usize,
    timeout: Duration,
) -> Vec<i64> {
    let events = match tokio::time::timeout(timeout, log.recent_views(batch)).await {
        Ok(Ok(events)) => events,
        Ok(Err(err)) => {
            log::warn!("Activity log unavailable, skipping popularity tier: {err:#}");
            return vec![];
        }
        Err(_) => {
            log::warn!("Activity log query timed out, skipping popularity tier");
            return vec![];
        }
    };
    rank_by_views(&events, exclude, k)
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::activity::test::view_event;

    fn views(ids: &[i64]) -> Vec<ActivityEvent> {
        ids.iter()
            .map(|id| view_event(Some(&format!(r#"{{"item_id": {id}}}"#)), None))
            .collect()
    }

    #[test]
    fn orders_by_count_then_first_seen() {
        let events = views(&[5, 3, 3, 9, 5, 3]);
        assert_eq!(vec![3, 5, 9], rank_by_views(&events, &HashSet::new(), 10));
        // 5 і 9 мають різну кількість, 9 відпадає при k=2
        assert_eq!(vec![3, 5], rank_by_views(&events, &HashSet::new(), 2));
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let events = views(&[8, 2, 4]);
        assert_eq!(vec![8, 2, 4], rank_by_views(&events, &HashSet::new(), 10));
    }

    #[test]
    fn counts_structured_and_encoded_payloads_alike() {
        let events = vec![
            view_event(Some(r#"{"item_id": 42}"#), None),
            view_event(Some(r#""{\"item_id\": 42}""#), None),
            view_event(Some(r#"{"item_id": 7}"#), None),
        ];
        assert_eq!(vec![42, 7], rank_by_views(&events, &HashSet::new(), 10));
    }

    #[test]
    fn skips_excluded_and_undecodable() {
        let mut events = views(&[1, 2, 2]);
        events.push(view_event(Some("garbage"), None));
        let exclude: HashSet<i64> = [2].into_iter().collect();
        assert_eq!(vec![1], rank_by_views(&events, &exclude, 10));
        assert!(rank_by_views(&events, &exclude, 0).is_empty());
    }

    #[tokio::test]
    async fn event_log_failure_degrades_to_empty() {
        struct Broken;
        #[async_trait::async_trait]
        impl ActivityLogRepository for Broken {
            async fn recent_views(&self, _limit: usize) -> anyhow::Result<Vec<ActivityEvent>> {
                Err(anyhow::anyhow!("no such table: activity_event"))
            }
            async fn record(
                &self,
                _action: &str,
                _metadata: Option<&str>,
                _page_path: Option<&str>,
            ) -> anyhow::Result<()> {
                Ok(())
            }
        }
        let ids = popular_product_ids(
            &Broken,
            1000,
            &HashSet::new(),
            7,
            Duration::from_millis(100),
        )
        .await;
        assert!(ids.is_empty());
    }
}
