// tests/providers_rss.rs
use feed_relay::providers::RssProvider;
use feed_relay::{PictureRef, Provider};

const FIXTURE: &str = include_str!("fixtures/sample_rss.xml");

#[tokio::test]
async fn fixture_items_map_to_posts() {
    let provider = RssProvider::from_fixture("blog", FIXTURE);
    let posts = provider.collect().await.expect("rss parse ok");

    // the repost shares guid post-2001 and is dropped
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.source == "blog"));

    let release = &posts[0];
    assert_eq!(release.id, "post-2001");
    assert_eq!(release.title, "Release 2.0 is out today");
    assert_eq!(release.description, "Highlights of the 2.0 release.");
    assert_eq!(release.published_at, 1_700_000_000);
    assert_eq!(release.tags, vec!["release", "changelog"]);
    assert_eq!(release.url, "https://blog.example.test/posts/release-2-0");
    assert_eq!(release.author, "ops@example.test (Ops Team)");
    assert_eq!(release.author_url, "https://blog.example.test/");
    assert_eq!(
        release.picture_ref,
        Some(PictureRef::Url(
            "https://blog.example.test/img/release.png".into()
        ))
    );
}

#[tokio::test]
async fn guidless_item_falls_back_to_link_and_feed_author() {
    let provider = RssProvider::from_fixture("blog", FIXTURE);
    let posts = provider.collect().await.unwrap();

    let maint = &posts[1];
    assert_eq!(maint.id, "https://blog.example.test/posts/maintenance");
    assert_eq!(maint.author, "Example Dev Blog");
    assert_eq!(maint.description, "Planned downtime & upgrades.");
    // audio enclosures are not pictures
    assert_eq!(maint.picture_ref, None);
}

#[tokio::test]
async fn provider_reports_its_configured_name() {
    let provider = RssProvider::from_fixture("changelog", FIXTURE);
    assert_eq!(provider.name(), "changelog");
    let posts = provider.collect().await.unwrap();
    assert!(posts.iter().all(|p| p.source == "changelog"));
}
