// src/sync/merge.rs
//! Pure batch policy: dedupe, cursor filter, recency order, cap.

use std::collections::HashSet;

use crate::post::{Post, PostKey};

/// Drop repeated `(source, id)` identities, keeping the first occurrence.
/// Returns the kept posts and how many were removed.
pub fn dedupe(posts: Vec<Post>) -> (Vec<Post>, usize) {
    let mut seen: HashSet<PostKey> = HashSet::with_capacity(posts.len());
    let mut keep = Vec::with_capacity(posts.len());
    let mut removed = 0usize;
    for p in posts {
        if seen.insert(p.key()) {
            keep.push(p);
        } else {
            removed += 1;
        }
    }
    (keep, removed)
}

/// Keep only posts strictly newer than the cursor.
pub fn newer_than(posts: Vec<Post>, cursor: u64) -> Vec<Post> {
    posts
        .into_iter()
        .filter(|p| p.published_at > cursor)
        .collect()
}

/// Newest first. Stable, so equal timestamps keep merge order.
pub fn order_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

/// Truncate to the `max` most recent entries; `0` means unlimited.
/// Returns how many posts were dropped.
pub fn cap_batch(posts: &mut Vec<Post>, max: usize) -> usize {
    if max == 0 || posts.len() <= max {
        return 0;
    }
    let dropped = posts.len() - max;
    posts.truncate(max);
    dropped
}

pub fn newest_timestamp(posts: &[Post]) -> Option<u64> {
    posts.iter().map(|p| p.published_at).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(source: &str, id: &str, ts: u64) -> Post {
        Post::new(source, id, format!("{source}-{id}"), ts)
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut second = post("s1", "1", 999);
        second.title = "later copy".into();
        let (kept, removed) = dedupe(vec![post("s1", "1", 100), second, post("s2", "1", 100)]);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].published_at, 100);
        assert_eq!(kept[0].title, "s1-1");
    }

    #[test]
    fn same_id_in_different_sources_is_distinct() {
        let (kept, removed) = dedupe(vec![post("a", "x", 1), post("b", "x", 1)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 0);
    }

    #[test]
    fn filter_is_strictly_greater() {
        let out = newer_than(vec![post("s", "1", 50), post("s", "2", 51), post("s", "3", 10)], 50);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "2");
    }

    #[test]
    fn order_is_descending_and_stable() {
        let mut v = vec![
            post("a", "1", 100),
            post("b", "1", 300),
            post("c", "1", 100),
            post("d", "1", 200),
        ];
        order_newest_first(&mut v);
        let ids: Vec<_> = v.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
        assert!(v.windows(2).all(|w| w[0].published_at >= w[1].published_at));
    }

    #[test]
    fn cap_zero_is_unlimited() {
        let mut v = vec![post("a", "1", 3), post("a", "2", 2)];
        assert_eq!(cap_batch(&mut v, 0), 0);
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn cap_keeps_head() {
        let mut v = vec![post("a", "1", 3), post("a", "2", 2), post("a", "3", 1)];
        assert_eq!(cap_batch(&mut v, 2), 1);
        assert_eq!(v.iter().map(|p| p.published_at).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn newest_of_empty_is_none() {
        assert_eq!(newest_timestamp(&[]), None);
        assert_eq!(newest_timestamp(&[post("a", "1", 5), post("a", "2", 9)]), Some(9));
    }
}
