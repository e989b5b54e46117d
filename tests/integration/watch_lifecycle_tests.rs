use super::*;
use listing_watcher::SeenStore;
use listing_watcher::models::{AddOutcome, RemoveOutcome};
use listing_watcher::query::FRESHNESS_SEGMENT;

const GOL: &str = "https://listado.mercadolibre.com.ar/volkswagen-gol";
const KA: &str = "https://autos.mercadolibre.com.ar/ford-ka_OrderId_PRICE";

#[tokio::test]
async fn test_watch_lifecycle() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let manager = env.manager();

    // 1. Add two searches in one message
    let outcomes = manager.add_many("100", &format!("{}\n{}\n", GOL, KA)).await?;
    assert_eq!(outcomes.len(), 2);
    let watches = manager.list("100").await?;
    assert_eq!(watches.len(), 2);
    assert!(watches.iter().all(|w| w.query_url.contains(FRESHNESS_SEGMENT)));
    assert_eq!(watches[1].query_url, "https://autos.mercadolibre.com.ar/ford-ka_PublishedToday_YES_OrderId_PRICE");

    // 2. Re-adding either form is reported, not duplicated
    assert_eq!(manager.add("100", &watches[0].query_url).await?, AddOutcome::AlreadyExists);
    assert_eq!(manager.list("100").await?.len(), 2);

    // 3. Seen entries accumulate per watch
    for listing in ["MLA-1", "MLA-2"] {
        env.store.mark_seen("100", &watches[0].query_url, listing).await?;
    }
    env.store.mark_seen("100", &watches[1].query_url, "MLA-3").await?;

    // 4. Removing one watch leaves the other's history alone
    assert_eq!(manager.remove("100", GOL).await?, RemoveOutcome::Removed);
    assert_eq!(env.store.seen_count("100", &watches[0].query_url).await?, 0);
    assert_eq!(env.store.seen_count("100", &watches[1].query_url).await?, 1);
    assert_eq!(manager.list("100").await?.len(), 1);

    // 5. Clearing seen wipes what is left
    assert_eq!(manager.clear_seen("100").await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_mark_seen_is_idempotent() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let url = "https://autos.mercadolibre.com.ar/gol_PublishedToday_YES";

    assert!(env.store.mark_seen("100", url, "MLA-1").await?);
    assert!(!env.store.mark_seen("100", url, "MLA-1").await?);
    assert_eq!(env.store.seen_count("100", url).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_adds_keep_one_watch() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let manager = Arc::new(env.manager());

    let adds = (0..5).map(|_| {
        let manager = manager.clone();
        async move { manager.add("100", GOL).await }
    });
    let outcomes = futures::future::try_join_all(adds).await?;

    let added = outcomes.iter().filter(|o| matches!(o, AddOutcome::Added(_))).count();
    assert_eq!(added, 1);
    assert_eq!(manager.list("100").await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_pause_state_survives_across_managers() -> anyhow::Result<()> {
    let env = create_test_env().await?;

    env.manager().add("100", KA).await?;
    env.manager().pause("100").await?;
    assert!(!env.manager().is_running("100").await?);

    // Unknown subscribers default to running
    assert!(env.manager().is_running("999").await?);

    Ok(())
}
