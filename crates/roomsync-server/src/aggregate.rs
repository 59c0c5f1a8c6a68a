//! Builds the merged, tagged list of unavailable intervals.
//!
//! Three record kinds feed the list: blocked ranges (manual and synced),
//! guest bookings, and, when background sync is off, live feed events.
//! Overlapping intervals are not merged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use roomsync_core::{
    AggregatedInterval, CalendarSource, DayRange, DisplayZone, ParsedEvent,
};
use roomsync_providers::FeedFetcher;
use tracing::{debug, warn};

use crate::cache::{CachedFeedFetcher, DEFAULT_CACHE_TTL};
use crate::store::{Store, StoreResult};

/// Aggregator settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Read feeds on demand instead of relying on synced ranges.
    pub live_feeds: bool,
    /// How long a live feed body is reused.
    pub feed_ttl: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            live_feeds: false,
            feed_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl AggregatorConfig {
    /// Builder: enable or disable the live read path.
    pub fn with_live_feeds(mut self, live: bool) -> Self {
        self.live_feeds = live;
        self
    }

    /// Builder: set the live feed TTL.
    pub fn with_feed_ttl(mut self, ttl: Duration) -> Self {
        self.feed_ttl = ttl;
        self
    }
}

/// Produces the availability list from the store.
pub struct Aggregator {
    store: Arc<dyn Store>,
    zone: DisplayZone,
    live: Option<CachedFeedFetcher>,
}

impl Aggregator {
    /// An aggregator that reads synced ranges only.
    pub fn new(store: Arc<dyn Store>, zone: DisplayZone) -> Self {
        Self {
            store,
            zone,
            live: None,
        }
    }

    /// Builds an aggregator from `config`, caching live feeds per URL.
    pub fn from_config(
        store: Arc<dyn Store>,
        zone: DisplayZone,
        config: &AggregatorConfig,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        let live = config
            .live_feeds
            .then(|| CachedFeedFetcher::new(fetcher, config.feed_ttl));
        Self { store, zone, live }
    }

    /// Returns true if feeds are read on demand.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn zone(&self) -> &DisplayZone {
        &self.zone
    }

    /// Every interval that is still relevant at `now`, sorted.
    ///
    /// Synced ranges count only while their source exists and is active.
    /// In live mode they are ignored and each active feed is read instead;
    /// a feed that fails to load contributes nothing. Cached bodies of feeds
    /// that are no longer active are dropped.
    pub async fn aggregate(&self, now: DateTime<Utc>) -> StoreResult<Vec<AggregatedInterval>> {
        let today = self.zone.today(now);
        let (sources, blocks, bookings) = tokio::try_join!(
            self.store.list_sources(),
            self.store.list_blocks(Some(today)),
            self.store.list_bookings(self.zone.day_start(today)),
        )?;
        let active: Vec<&CalendarSource> = sources.iter().filter(|s| s.active).collect();

        let mut intervals = Vec::with_capacity(blocks.len() + bookings.len());
        for block in &blocks {
            match block.source.as_deref() {
                None => intervals.push(AggregatedInterval::manual(block.days(), &block.reason)),
                Some(name) if self.live.is_none() && active.iter().any(|s| s.name == name) => {
                    intervals.push(AggregatedInterval::external(block.days(), name));
                }
                Some(_) => {}
            }
        }

        intervals.extend(bookings.iter().map(|booking| {
            AggregatedInterval::booking(
                booking.days(&self.zone),
                &booking.first_name,
                &booking.last_name,
            )
        }));

        if let Some(live) = &self.live {
            live.retain_urls(active.iter().map(|s| s.url.as_str()));
            let fetches = active.iter().map(|source| async move {
                match live.fetch(&source.url).await {
                    Ok(events) => self.live_intervals(source, &events, today),
                    Err(e) => {
                        warn!(source = %source.name, error = %e, "Live feed unavailable");
                        Vec::new()
                    }
                }
            });
            for batch in join_all(fetches).await {
                intervals.extend(batch);
            }
        }

        intervals.sort();
        debug!(
            intervals = intervals.len(),
            live = self.live.is_some(),
            "Aggregated availability"
        );
        Ok(intervals)
    }

    fn live_intervals(
        &self,
        source: &CalendarSource,
        events: &[ParsedEvent],
        today: NaiveDate,
    ) -> Vec<AggregatedInterval> {
        events
            .iter()
            .filter_map(|event| {
                let start = self.zone.event_day(&event.start);
                let last = self.zone.event_day(&event.end).max(start);
                (last >= today).then(|| {
                    AggregatedInterval::external(DayRange::from_inclusive(start, last), &source.name)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use roomsync_core::{BlockDraft, Booking, BookingStatus, IntervalKind, conflicts};
    use roomsync_providers::StaticFeedFetcher;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 15, 4, 0, 0).unwrap()
    }

    fn synced(source: &str, id: &str, start: NaiveDate, end: NaiveDate) -> BlockDraft {
        BlockDraft {
            start_date: start,
            end_date: end,
            reason: format!("{source} - External Booking"),
            external_id: Some(id.into()),
            source: Some(source.into()),
        }
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_source("Airbnb", "https://a.example/feed.ics")
            .await
            .unwrap();
        let disabled = store
            .insert_source("Vrbo", "https://v.example/feed.ics")
            .await
            .unwrap();
        store.set_source_active(disabled.id, false).await.unwrap();

        store
            .insert_block(synced("Airbnb", "a", date(2024, 3, 1), date(2024, 3, 4)), now())
            .await
            .unwrap();
        store
            .insert_block(synced("Vrbo", "v", date(2024, 3, 10), date(2024, 3, 12)), now())
            .await
            .unwrap();
        store
            .insert_block(synced("Gone", "g", date(2024, 3, 20), date(2024, 3, 22)), now())
            .await
            .unwrap();
        store
            .insert_block(
                BlockDraft::manual(date(2024, 2, 20), date(2024, 2, 21), "Repairs"),
                now(),
            )
            .await
            .unwrap();
        store
            .insert_block(
                BlockDraft::manual(date(2024, 1, 2), date(2024, 1, 3), "Long gone"),
                now(),
            )
            .await
            .unwrap();
        store
            .insert_booking(Booking {
                id: 0,
                first_name: "Ana".into(),
                last_name: "Reyes".into(),
                check_in: Utc.with_ymd_and_hms(2024, 3, 8, 6, 0, 0).unwrap(),
                check_out: Utc.with_ymd_and_hms(2024, 3, 9, 4, 0, 0).unwrap(),
                status: BookingStatus::Confirmed,
            })
            .await
            .unwrap();
        store
            .insert_booking(Booking {
                id: 0,
                first_name: "Ben".into(),
                last_name: "Cruz".into(),
                check_in: Utc.with_ymd_and_hms(2024, 3, 5, 6, 0, 0).unwrap(),
                check_out: Utc.with_ymd_and_hms(2024, 3, 7, 4, 0, 0).unwrap(),
                status: BookingStatus::Cancelled,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn merges_blocks_and_bookings() {
        let store = seeded().await;
        let aggregator = Aggregator::new(store, DisplayZone::default());
        let intervals = aggregator.aggregate(now()).await.unwrap();

        let summary: Vec<_> = intervals
            .iter()
            .map(|i| (i.start, i.end, i.kind, i.label.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    date(2024, 2, 20),
                    date(2024, 2, 22),
                    IntervalKind::Manual,
                    "Manual Block: Repairs"
                ),
                (
                    date(2024, 3, 1),
                    date(2024, 3, 5),
                    IntervalKind::External,
                    "Airbnb - External Booking"
                ),
                (
                    date(2024, 3, 8),
                    date(2024, 3, 9),
                    IntervalKind::Booking,
                    "Booking: Ana Reyes"
                ),
            ]
        );
    }

    #[tokio::test]
    async fn candidate_stays_are_checked_against_intervals() {
        let store = seeded().await;
        let intervals = Aggregator::new(store, DisplayZone::default())
            .aggregate(now())
            .await
            .unwrap();

        let inside = DayRange::new(date(2024, 3, 2), date(2024, 3, 3));
        assert_eq!(conflicts(&intervals, &inside).len(), 1);

        let after = DayRange::new(date(2024, 3, 5), date(2024, 3, 6));
        assert!(conflicts(&intervals, &after).is_empty());
    }

    #[tokio::test]
    async fn live_mode_reads_feeds_instead_of_synced_ranges() {
        let store = seeded().await;
        let fetcher = Arc::new(
            StaticFeedFetcher::new()
                .with_feed(
                    "https://a.example/feed.ics",
                    "BEGIN:VEVENT\nDTSTART:20240401\nDTEND:20240403\nEND:VEVENT\n\
                     BEGIN:VEVENT\nDTSTART:20240101\nDTEND:20240103\nEND:VEVENT",
                )
                .with_feed(
                    "https://v.example/feed.ics",
                    "BEGIN:VEVENT\nDTSTART:20240501\nDTEND:20240503\nEND:VEVENT",
                ),
        );
        let config = AggregatorConfig::default().with_live_feeds(true);
        let aggregator =
            Aggregator::from_config(store, DisplayZone::default(), &config, fetcher);
        assert!(aggregator.is_live());

        let intervals = aggregator.aggregate(now()).await.unwrap();
        let external: Vec<_> = intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::External)
            .map(|i| (i.start, i.end))
            .collect();
        assert_eq!(external, vec![(date(2024, 4, 1), date(2024, 4, 3))]);
        assert!(intervals.iter().any(|i| i.kind == IntervalKind::Manual));
    }

    #[tokio::test]
    async fn live_mode_forgets_feeds_of_inactive_sources() {
        let store = seeded().await;
        let url = "https://a.example/feed.ics";
        let fetcher = Arc::new(StaticFeedFetcher::new().with_feed(
            url,
            "BEGIN:VEVENT\nDTSTART:20240401\nDTEND:20240403\nEND:VEVENT",
        ));
        let config = AggregatorConfig::default().with_live_feeds(true);
        let aggregator =
            Aggregator::from_config(store.clone(), DisplayZone::default(), &config, fetcher.clone());
        let external = |intervals: &[AggregatedInterval]| -> Vec<(NaiveDate, NaiveDate)> {
            intervals
                .iter()
                .filter(|i| i.kind == IntervalKind::External)
                .map(|i| (i.start, i.end))
                .collect()
        };

        let first = aggregator.aggregate(now()).await.unwrap();
        assert_eq!(external(&first), vec![(date(2024, 4, 1), date(2024, 4, 3))]);

        fetcher.set_feed(url, "BEGIN:VEVENT\nDTSTART:20240601\nDTEND:20240602\nEND:VEVENT");
        let airbnb = store
            .list_sources()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.name == "Airbnb")
            .unwrap();
        store.set_source_active(airbnb.id, false).await.unwrap();
        assert!(external(&aggregator.aggregate(now()).await.unwrap()).is_empty());

        // Within the TTL, but the old body was dropped while the source was off.
        store.set_source_active(airbnb.id, true).await.unwrap();
        let again = aggregator.aggregate(now()).await.unwrap();
        assert_eq!(external(&again), vec![(date(2024, 6, 1), date(2024, 6, 2))]);
    }

    #[tokio::test]
    async fn live_mode_skips_failing_feed() {
        let store = seeded().await;
        let fetcher = Arc::new(
            StaticFeedFetcher::new().with_failure("https://a.example/feed.ics", "refused"),
        );
        let config = AggregatorConfig::default().with_live_feeds(true);
        let intervals = Aggregator::from_config(store, DisplayZone::default(), &config, fetcher)
            .aggregate(now())
            .await
            .unwrap();
        assert!(intervals.iter().all(|i| i.kind != IntervalKind::External));
        assert_eq!(intervals.len(), 2);
    }
}
