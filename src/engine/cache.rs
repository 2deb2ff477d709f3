//! Market universe cache.
//!
//! Holds the tournaments of interest and their sport events. Each event is
//! stored behind an `Arc` and replaced as a unit, so the betting job can
//! iterate a snapshot while seeding or realtime updates swap entries.

use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::exchange::{ApiError, ExchangeApi};
use crate::realtime::MarketUpdate;
use crate::types::{AuthHeader, SeedResult, SportEvent, Tournament};

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("cannot seed: tournament listing failed: {0}")]
    TournamentFetch(#[source] ApiError),
}

#[derive(Default)]
pub struct MarketCache {
    tournaments: RwLock<BTreeMap<i64, Tournament>>,
    events: RwLock<HashMap<i64, Arc<SportEvent>>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the cache with the tournaments named in `interest`, their
    /// sport events, and each event's markets.
    ///
    /// Only the top-level tournament listing is fatal. A failed event
    /// listing skips that tournament; a failed market fetch skips that
    /// event. Neither touches entries already ingested.
    pub async fn seed(
        &self,
        api: &dyn ExchangeApi,
        auth: &AuthHeader,
        interest: &HashSet<String>,
    ) -> Result<SeedResult, SeedError> {
        info!(interested = interest.len(), "Seeding tournaments/events/markets");

        let all = api
            .get_tournaments(auth)
            .await
            .map_err(SeedError::TournamentFetch)?;

        let mine: Vec<Tournament> = all
            .into_iter()
            .filter(|t| interest.contains(&t.name))
            .collect();

        let mut result = SeedResult {
            tournaments_found: mine.len(),
            ..SeedResult::default()
        };

        for tournament in mine {
            self.tournaments
                .write()
                .insert(tournament.id, tournament.clone());

            let events = match api.get_sport_events(auth, tournament.id).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(
                        tournament_id = tournament.id,
                        tournament = %tournament.name,
                        error = %e,
                        "Skipping tournament, event listing failed"
                    );
                    result.tournaments_skipped += 1;
                    continue;
                }
            };

            let fetches = events.iter().map(|e| api.get_markets(auth, e.event_id));
            let markets = join_all(fetches).await;

            for (mut event, fetched) in events.into_iter().zip(markets) {
                match fetched {
                    Ok(markets) => {
                        event.markets = markets;
                        event.tournament_id.get_or_insert(tournament.id);
                        debug!(
                            event_id = event.event_id,
                            event = %event.name,
                            markets = event.markets.len(),
                            "Ingested sport event"
                        );
                        self.events.write().insert(event.event_id, Arc::new(event));
                        result.events_ingested += 1;
                    }
                    Err(e) => {
                        warn!(
                            event_id = event.event_id,
                            event = %event.name,
                            error = %e,
                            "Skipping event, market fetch failed"
                        );
                        result.events_skipped += 1;
                    }
                }
            }
        }

        info!(
            tournaments = result.tournaments_found,
            events = result.events_ingested,
            skipped_tournaments = result.tournaments_skipped,
            skipped_events = result.events_skipped,
            "Seeding done"
        );
        Ok(result)
    }

    /// Replace the addressed event's market list wholesale.
    ///
    /// Returns `false` when the event is not one we track; the update is
    /// ignored in that case. Applying the same update twice is a no-op.
    pub fn apply_realtime_update(&self, update: MarketUpdate) -> bool {
        let mut events = self.events.write();
        let Some(existing) = events.get(&update.event_id) else {
            debug!(event_id = update.event_id, "Update for untracked event ignored");
            return false;
        };

        let replaced = SportEvent {
            markets: update.markets,
            ..SportEvent::clone(existing)
        };
        events.insert(update.event_id, Arc::new(replaced));
        true
    }

    /// Point-in-time copy of every cached event, ordered by event id.
    pub fn events_snapshot(&self) -> Vec<Arc<SportEvent>> {
        let mut events: Vec<_> = self.events.read().values().cloned().collect();
        events.sort_by_key(|e| e.event_id);
        events
    }

    pub fn event(&self, event_id: i64) -> Option<Arc<SportEvent>> {
        self.events.read().get(&event_id).cloned()
    }

    pub fn tournaments(&self) -> Vec<Tournament> {
        self.tournaments.read().values().cloned().collect()
    }

    pub fn tournament_ids(&self) -> Vec<i64> {
        self.tournaments.read().keys().copied().collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeApi;
    use crate::types::{Market, Selection};

    fn auth() -> AuthHeader {
        AuthHeader::new("tok", "p")
    }

    fn tournament(id: i64, name: &str) -> Tournament {
        Tournament {
            id,
            name: name.to_string(),
        }
    }

    fn event(id: i64) -> SportEvent {
        SportEvent {
            event_id: id,
            name: format!("event {id}"),
            tournament_id: None,
            markets: Vec::new(),
        }
    }

    fn moneyline(lines: &[&str]) -> Market {
        Market {
            market_type: "moneyline".into(),
            name: None,
            selections: lines
                .iter()
                .map(|l| Selection {
                    name: format!("side {l}"),
                    line_id: l.to_string(),
                })
                .collect(),
        }
    }

    fn interest(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_seed_keeps_only_tournaments_of_interest() {
        let mut api = MockExchangeApi::new();
        api.expect_get_tournaments().returning(|_| {
            Ok(vec![
                tournament(3, "C"),
                tournament(2, "B"),
                tournament(1, "A"),
            ])
        });
        api.expect_get_sport_events()
            .withf(|_, id| *id != 3)
            .returning(|_, id| Ok(vec![event(id * 10)]));
        api.expect_get_markets()
            .returning(|_, _| Ok(vec![moneyline(&["x", "y"])]));

        let cache = MarketCache::new();
        let result = cache.seed(&api, &auth(), &interest(&["A", "B"])).await.unwrap();

        assert_eq!(result.tournaments_found, 2);
        assert_eq!(result.events_ingested, 2);
        let names: Vec<_> = cache.tournaments().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(cache.tournament_ids(), vec![1, 2]);
        assert_eq!(cache.event(10).unwrap().tournament_id, Some(1));
        assert_eq!(cache.event(20).unwrap().markets.len(), 1);
    }

    #[tokio::test]
    async fn test_seed_market_failure_skips_only_that_event() {
        let mut api = MockExchangeApi::new();
        api.expect_get_tournaments()
            .returning(|_| Ok(vec![tournament(1, "A")]));
        api.expect_get_sport_events()
            .returning(|_, _| Ok(vec![event(10), event(11), event(12)]));
        api.expect_get_markets().returning(|_, id| {
            if id == 11 {
                Err(ApiError::Status {
                    endpoint: "get_markets",
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(vec![moneyline(&["x"])])
            }
        });

        let cache = MarketCache::new();
        let result = cache.seed(&api, &auth(), &interest(&["A"])).await.unwrap();

        assert_eq!(result.events_ingested, 2);
        assert_eq!(result.events_skipped, 1);
        assert_eq!(cache.event_count(), 2);
        assert!(cache.event(11).is_none());
        assert_eq!(cache.event(10).unwrap().markets, vec![moneyline(&["x"])]);
        assert_eq!(cache.event(12).unwrap().markets, vec![moneyline(&["x"])]);
    }

    #[tokio::test]
    async fn test_seed_event_listing_failure_skips_tournament() {
        let mut api = MockExchangeApi::new();
        api.expect_get_tournaments()
            .returning(|_| Ok(vec![tournament(1, "A"), tournament(2, "B")]));
        api.expect_get_sport_events().returning(|_, id| {
            if id == 1 {
                Err(ApiError::Transport {
                    endpoint: "get_sport_events",
                    message: "timeout".into(),
                })
            } else {
                Ok(vec![event(20)])
            }
        });
        api.expect_get_markets().returning(|_, _| Ok(Vec::new()));

        let cache = MarketCache::new();
        let result = cache.seed(&api, &auth(), &interest(&["A", "B"])).await.unwrap();

        assert_eq!(result.tournaments_found, 2);
        assert_eq!(result.tournaments_skipped, 1);
        assert_eq!(result.events_ingested, 1);
        assert!(cache.event(20).is_some());
    }

    #[tokio::test]
    async fn test_seed_fails_when_tournament_listing_fails() {
        let mut api = MockExchangeApi::new();
        api.expect_get_tournaments().returning(|_| {
            Err(ApiError::Status {
                endpoint: "get_tournaments",
                status: 503,
                body: "down".into(),
            })
        });
        api.expect_get_sport_events().never();

        let cache = MarketCache::new();
        let err = cache.seed(&api, &auth(), &interest(&["A"])).await.unwrap_err();
        assert!(matches!(err, SeedError::TournamentFetch(_)));
        assert_eq!(cache.event_count(), 0);
    }

    #[tokio::test]
    async fn test_successive_updates_keep_only_latest_markets() {
        let mut api = MockExchangeApi::new();
        api.expect_get_tournaments()
            .returning(|_| Ok(vec![tournament(1, "A")]));
        api.expect_get_sport_events()
            .returning(|_, _| Ok(vec![event(10)]));
        api.expect_get_markets()
            .returning(|_, _| Ok(vec![moneyline(&["old"])]));

        let cache = MarketCache::new();
        cache.seed(&api, &auth(), &interest(&["A"])).await.unwrap();
        let before = cache.event(10).unwrap();

        assert!(cache.apply_realtime_update(MarketUpdate {
            event_id: 10,
            markets: vec![moneyline(&["first-a", "first-b"])],
        }));
        assert!(cache.apply_realtime_update(MarketUpdate {
            event_id: 10,
            markets: vec![moneyline(&["second"])],
        }));

        let after = cache.event(10).unwrap();
        assert_eq!(after.markets, vec![moneyline(&["second"])]);
        assert_eq!(after.name, "event 10");
        // A snapshot taken earlier still sees its own complete list.
        assert_eq!(before.markets, vec![moneyline(&["old"])]);
    }

    #[test]
    fn test_update_for_untracked_event_is_ignored() {
        let cache = MarketCache::new();
        assert!(!cache.apply_realtime_update(MarketUpdate {
            event_id: 99,
            markets: vec![moneyline(&["x"])],
        }));
        assert_eq!(cache.event_count(), 0);
    }
}
