//! Analytics demo
//!
//! Seeds an in-memory directory, serves the three aggregates through the
//! cache, mutates a record and shows the change feed invalidating it.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | ORGDIR_CONFIG | - | TOML config file |
//! | ORGDIR_LOG_JSON | 0 | JSON log output when 1 |
//! | RUST_LOG | info | Log filter |
//! | ORGDIR_* | - | Overrides, see `config` |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use orgdir_analytics::feed::InMemoryChangeFeed;
use orgdir_analytics::model::{
    CohortMembership, MembershipStatus, OrganizationRecord, PrecomputedAggregate, Profile,
    SystemField,
};
use orgdir_analytics::{AggregateView, AnalyticsConfig, AnalyticsService, InMemoryRecordStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_ORGANIZATIONS: usize = 30;
const DEMO_VENDORS: [&str; 4] = ["Workday", "Oracle", "Ellucian", "Jenzabar"];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ORGDIR_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config() -> Result<AnalyticsConfig, Box<dyn std::error::Error>> {
    let mut config = match std::env::var("ORGDIR_CONFIG") {
        Ok(path) => AnalyticsConfig::from_file(path)?,
        Err(_) => AnalyticsConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn seed_directory(store: &InMemoryRecordStore, config: &AnalyticsConfig) {
    for i in 0..DEMO_ORGANIZATIONS {
        // Skewed so the first vendor clears the bucketing threshold
        let vendor = DEMO_VENDORS[(i * i) % DEMO_VENDORS.len()];
        let status = if i % 7 == 6 {
            MembershipStatus::Inactive
        } else {
            MembershipStatus::Active
        };
        store.upsert_organization(
            OrganizationRecord::new(format!("o{}", i), format!("College {}", i), status)
                .with_system(SystemField::Payroll, vendor)
                .with_system(SystemField::StudentInformation, DEMO_VENDORS[i % 2]),
        );
    }

    for (i, cohort) in config.cohorts.iter().enumerate() {
        for j in 0..=i {
            let user = format!("u{}-{}", i, j);
            let org = format!("College {}", (i + j) % DEMO_ORGANIZATIONS);
            store.upsert_profile(Profile::new(user.clone(), user.clone(), Some(org.as_str())));
            store.add_membership(CohortMembership::new(user, cohort.clone()));
        }
    }

    store.set_aggregate(PrecomputedAggregate::new(
        &config.totals_family,
        "total_organizations",
        DEMO_ORGANIZATIONS as i64,
    ));
}

fn events_received(service: &AnalyticsService) -> u64 {
    service
        .subscriber_status()
        .map(|s| s.events_received)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = load_config()?;

    let feed = InMemoryChangeFeed::new();
    let store = InMemoryRecordStore::with_feed(feed.clone());
    seed_directory(&store, &config);

    let mut service =
        AnalyticsService::with_change_feed(Arc::new(store.clone()), config, Arc::new(feed)).await;
    service.start_sweeper();

    let payroll = AggregateView::distribution(
        SystemField::Payroll,
        service.distribution(SystemField::Payroll).await,
    );
    let totals = AggregateView::totals(service.totals().await);
    let cohorts = AggregateView::cohorts(service.cohort_statistics().await);

    println!("{}", serde_json::to_string_pretty(&payroll)?);
    println!("{}", serde_json::to_string_pretty(&totals)?);
    println!("{}", serde_json::to_string_pretty(&cohorts)?);

    // A record change reaches the cache through the feed
    let seen = events_received(&service);
    store.upsert_organization(
        OrganizationRecord::new("o0", "College 0", MembershipStatus::Active)
            .with_system(SystemField::Payroll, "Banner"),
    );
    while events_received(&service) == seen {
        tokio::task::yield_now().await;
    }
    let payroll = AggregateView::distribution(
        SystemField::Payroll,
        service.distribution(SystemField::Payroll).await,
    );
    println!("{}", serde_json::to_string_pretty(&payroll)?);

    let unknown = service.distribution_by_name("favorite_color").await;
    if let Err(e) = unknown {
        info!(error = %e, "Rejected unknown field");
    }

    let stats = service.cache_stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        invalidations = stats.invalidations,
        hit_rate = stats.hit_rate(),
        "Cache statistics"
    );

    service.shutdown().await;
    Ok(())
}
