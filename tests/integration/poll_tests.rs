use super::*;
use listing_watcher::SeenStore;
use listing_watcher::models::listing::{NO_MILEAGE, NO_YEAR};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_second_pass_only_notifies_new_listing() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    Mock::given(method("GET"))
        .and(path("/gol_PublishedToday_YES"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-A", "MLA-B"])))
        .up_to_n_times(1)
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gol_PublishedToday_YES"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-A", "MLA-B", "MLA-C"])),
        )
        .mount(&env.server)
        .await;
    mount_listing(&env.server, "MLA-A", "Volkswagen Gol 1.4").await;
    mount_listing(&env.server, "MLA-B", "Volkswagen Gol Trend").await;
    mount_listing(&env.server, "MLA-C", "Volkswagen Gol Power").await;

    let watch = env.watch("100", "/gol_PublishedToday_YES").await;
    let shutdown = CancellationToken::new();

    let first = env.engine.run_pass(&shutdown).await;
    assert_eq!(first.new_listings, 2);
    assert_eq!(first.notifications_sent, 2);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(chat, _)| chat == "100"));
    assert!(sent[0].1.contains("Volkswagen Gol 1.4"));
    assert!(sent[1].1.contains("Volkswagen Gol Trend"));
    assert_eq!(env.store.seen_count("100", &watch.query_url).await?, 2);

    let second = env.engine.run_pass(&shutdown).await;
    assert_eq!(second.listings_found, 3);
    assert_eq!(second.new_listings, 1);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 3);
    let (chat, message) = &sent[2];
    assert_eq!(chat, "100");
    assert!(message.contains("Volkswagen Gol Power"));
    assert!(message.ends_with(&format!("🔗 {}/MLA-C", base)));

    Ok(())
}

#[tokio::test]
async fn test_notification_message_layout() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-1"])))
        .mount(&env.server)
        .await;
    mount_listing(&env.server, "MLA-1", "Ford Ka SE").await;

    env.watch("100", "/search").await;
    env.engine.run_pass(&CancellationToken::new()).await;

    let sent = env.notifier.sent();
    assert_eq!(
        sent[0].1,
        format!(
            "🚗 Ford Ka SE\n💰 $ 12.500.000\n📅 2018 | 85.000km\n📍 Rosario, Santa Fe\n🔗 {}/MLA-1",
            base
        )
    );

    Ok(())
}

#[tokio::test]
async fn test_paused_subscriber_is_never_fetched() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    Mock::given(method("GET"))
        .and(path("/paused"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-9"])))
        .expect(0)
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/active"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-1"])))
        .expect(1)
        .mount(&env.server)
        .await;
    mount_listing(&env.server, "MLA-1", "Fiat Palio").await;

    let paused = env.watch("200", "/paused").await;
    env.watch("300", "/active").await;
    env.manager().pause("200").await?;

    let stats = env.engine.run_pass(&CancellationToken::new()).await;
    assert_eq!(stats.watches_total, 2);
    assert_eq!(stats.watches_skipped, 1);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "300");
    assert_eq!(env.store.seen_count("200", &paused.query_url).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_resumed_subscriber_catches_up() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-1"])))
        .mount(&env.server)
        .await;
    mount_listing(&env.server, "MLA-1", "Renault Clio").await;

    env.watch("200", "/search").await;
    let manager = env.manager();
    let shutdown = CancellationToken::new();

    manager.pause("200").await?;
    env.engine.run_pass(&shutdown).await;
    assert!(env.notifier.sent().is_empty());

    manager.resume("200").await?;
    env.engine.run_pass(&shutdown).await;
    assert_eq!(env.notifier.sent().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_listing_without_year_mileage_still_notifies() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-7"])))
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/MLA-7"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page("Peugeot 208", "Nuevo")))
        .mount(&env.server)
        .await;

    env.watch("100", "/search").await;
    env.engine.run_pass(&CancellationToken::new()).await;

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    let message = &sent[0].1;
    assert!(message.contains("🚗 Peugeot 208"));
    assert!(message.contains("💰 $ 12.500.000"));
    assert!(message.contains(&format!("📅 {} | {}km", NO_YEAR, NO_MILEAGE)));
    assert!(message.contains("📍 Rosario, Santa Fe"));

    Ok(())
}

#[tokio::test]
async fn test_stale_results_page_sends_nothing() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    let stale = results_page(&base, &["MLA-1", "MLA-2"]).replace("Publicados hoy", "Publicados esta semana");
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(stale))
        .mount(&env.server)
        .await;

    let watch = env.watch("100", "/search").await;
    let stats = env.engine.run_pass(&CancellationToken::new()).await;

    assert_eq!(stats.listings_found, 0);
    assert!(env.notifier.sent().is_empty());
    assert_eq!(env.store.seen_count("100", &watch.query_url).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_same_listing_under_two_watches_notifies_both() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    for search in ["/gol", "/gol-trend"] {
        Mock::given(method("GET"))
            .and(path(search))
            .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-1"])))
            .mount(&env.server)
            .await;
    }
    mount_listing(&env.server, "MLA-1", "Volkswagen Gol").await;

    env.watch("100", "/gol").await;
    env.watch("100", "/gol-trend").await;
    env.watch("200", "/gol").await;

    let stats = env.engine.run_pass(&CancellationToken::new()).await;
    assert_eq!(stats.notifications_sent, 3);

    Ok(())
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let base = env.server.uri();

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&base, &["MLA-1"])))
        .mount(&env.server)
        .await;
    mount_listing(&env.server, "MLA-1", "Chevrolet Onix").await;
    env.watch("100", "/search").await;

    let shutdown = CancellationToken::new();
    let engine = Arc::new(env.engine);
    let handle = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while env.notifier.sent().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await?;
    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle).await??;

    assert_eq!(env.notifier.sent().len(), 1);
    assert!(engine.stats().await.passes_completed >= 1);

    Ok(())
}
