use std::time::Duration;

use anyhow::{Context, Result};
use shopquery_service::caching::QueryState;
use shopquery_service::config::Config;
use shopquery_service::rest::{Entity, ListFilters, Listing, ShopClient, ShopQueries};

fn shop_queries(config: &Config) -> Result<ShopQueries> {
    let client = ShopClient::new(&config.api)?;
    Ok(ShopQueries::new(client, config.queries.clone()))
}

/// Fetches one page and prints it as JSON.
pub async fn list(config: &Config, entity: Entity, filters: ListFilters) -> Result<()> {
    let queries = shop_queries(config)?;
    let mut query = queries.query(entity, filters);
    query.settled().await;

    let state = query.state();
    if let Some(error) = state.error {
        return Err(error).with_context(|| format!("failed to list {entity}"));
    }

    let page = state.data.context("listing query finished without data")?;
    let json = serde_json::to_string_pretty(&*page).context("failed to serialize listing")?;
    println!("{json}");
    Ok(())
}

/// Keeps a query open, simulating a window focus every `interval`, and prints every state
/// change until `count` focus events have passed.
pub async fn watch(
    config: &Config,
    entity: Entity,
    filters: ListFilters,
    interval: Duration,
    count: usize,
) -> Result<()> {
    let queries = shop_queries(config)?;
    let mut query = queries.query(entity, filters);
    let mut states = query.subscribe();
    println!("{entity}: {}", describe(&states.borrow_and_update()));

    let printer = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            println!("{entity}: {}", describe(&states.borrow_and_update()));
        }
    });

    for _ in 0..count {
        tokio::time::sleep(interval).await;
        if query.window_focused() {
            tracing::debug!("Refreshing {entity} after focus");
        }
    }
    query.settled().await;

    // the printer stops once the query and its state are gone
    drop(query);
    printer.await.context("state printer failed")?;
    Ok(())
}

/// Prints the effective timings of all entities.
pub fn print_config(config: &Config) {
    println!("api: {}", config.api.base_url);
    for entity in Entity::ALL {
        let options = config.queries.options(entity);
        println!(
            "{entity:<12} stale after {:<8} evicted after {:<8} refetch on focus: {}",
            humantime::format_duration(options.stale_time).to_string(),
            humantime::format_duration(options.cache_time).to_string(),
            options.refetch_on_window_focus,
        );
    }
}

/// A one-line summary of a query state.
fn describe(state: &QueryState<Listing>) -> String {
    let mut line = match &state.data {
        Some(page) => format!(
            "{} of {} items, page {}/{}",
            page.items.len(),
            page.total,
            page.page,
            page.total_pages
        ),
        None => "no data".to_owned(),
    };
    if state.loading {
        line.push_str(" (loading)");
    }
    if state.is_stale {
        line.push_str(" (stale)");
    }
    if let Some(ref error) = state.error {
        line.push_str(&format!(", error: {error}"));
    }
    line
}
