//! Logical resource categories ("entities") of the upstream API.
//!
//! Every request path maps to one entity, and each entity shares one quota
//! bucket and one cache TTL tier. The set is closed: unknown paths fall back
//! to [`Entity::Fixtures`], the busiest category, so they are rate limited at
//! least as strictly as anything known.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A logical resource category of the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    /// Match fixtures (upcoming and historical)
    Fixtures,
    /// In-play live scores
    Livescores,
    /// Betting odds
    Odds,
    /// Team lineups for a fixture
    Lineups,
    /// In-play match events (goals, cards, substitutions)
    Events,
    /// In-play match statistics
    Statistics,
    /// League standings
    Standings,
    /// Sidelined/injured players
    Sidelined,
    /// Player profiles
    Players,
    /// Seasons
    Seasons,
    /// Venues
    Venues,
    /// Teams
    Teams,
    /// Leagues
    Leagues,
    /// Betting markets
    Markets,
    /// Fixture states
    States,
    /// Event/odds types
    Types,
    /// Countries
    Countries,
}

impl Entity {
    /// All known entities.
    pub const ALL: [Entity; 17] = [
        Entity::Fixtures,
        Entity::Livescores,
        Entity::Odds,
        Entity::Lineups,
        Entity::Events,
        Entity::Statistics,
        Entity::Standings,
        Entity::Sidelined,
        Entity::Players,
        Entity::Seasons,
        Entity::Venues,
        Entity::Teams,
        Entity::Leagues,
        Entity::Markets,
        Entity::States,
        Entity::Types,
        Entity::Countries,
    ];

    /// Look up an entity by its lowercase name.
    pub fn from_name(name: &str) -> Option<Entity> {
        Entity::ALL.iter().copied().find(|e| e.as_str() == name)
    }

    /// Resolve an entity from a request path.
    ///
    /// The first path segment, lowercased, selects the entity. Unknown
    /// segments fall back to [`Entity::Fixtures`].
    pub fn resolve(path: &str) -> Entity {
        let segment = path
            .trim_start_matches('/')
            .split(['/', '?'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        Entity::from_name(&segment).unwrap_or_else(|| {
            tracing::debug!("unknown path segment {segment:?}, treating as fixtures");
            Entity::Fixtures
        })
    }

    /// The entity name as used in paths and cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Fixtures => "fixtures",
            Entity::Livescores => "livescores",
            Entity::Odds => "odds",
            Entity::Lineups => "lineups",
            Entity::Events => "events",
            Entity::Statistics => "statistics",
            Entity::Standings => "standings",
            Entity::Sidelined => "sidelined",
            Entity::Players => "players",
            Entity::Seasons => "seasons",
            Entity::Venues => "venues",
            Entity::Teams => "teams",
            Entity::Leagues => "leagues",
            Entity::Markets => "markets",
            Entity::States => "states",
            Entity::Types => "types",
            Entity::Countries => "countries",
        }
    }

    /// Cache TTL for payloads of this entity.
    ///
    /// Static reference data lives for hours, semi-static data for minutes,
    /// live data for seconds.
    pub fn cache_ttl(&self) -> Duration {
        let seconds = match self {
            Entity::Teams | Entity::Leagues | Entity::Markets => 86_400,
            Entity::States | Entity::Types | Entity::Countries => 43_200,
            Entity::Seasons | Entity::Venues => 43_200,
            Entity::Players => 21_600,
            Entity::Sidelined => 600,
            Entity::Standings => 300,
            Entity::Fixtures => 180,
            Entity::Lineups => 60,
            Entity::Livescores | Entity::Odds | Entity::Events | Entity::Statistics => 4,
        };
        Duration::from_secs(seconds)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_first_segment() {
        assert_eq!(Entity::resolve("/livescores/inplay"), Entity::Livescores);
        assert_eq!(Entity::resolve("odds/fixture/1234"), Entity::Odds);
        assert_eq!(Entity::resolve("/teams"), Entity::Teams);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        assert_eq!(Entity::resolve("/Livescores/inplay"), Entity::Livescores);
        assert_eq!(Entity::resolve("/TEAMS/42"), Entity::Teams);
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_fixtures() {
        assert_eq!(Entity::resolve("/scoreboard/today"), Entity::Fixtures);
        assert_eq!(Entity::resolve(""), Entity::Fixtures);
    }

    #[test]
    fn test_resolve_ignores_query() {
        assert_eq!(Entity::resolve("/standings?season=2025"), Entity::Standings);
    }

    #[test]
    fn test_ttl_tiers() {
        assert_eq!(Entity::Teams.cache_ttl(), Duration::from_secs(86_400));
        assert_eq!(Entity::Countries.cache_ttl(), Duration::from_secs(43_200));
        assert_eq!(Entity::Players.cache_ttl(), Duration::from_secs(21_600));
        assert_eq!(Entity::Standings.cache_ttl(), Duration::from_secs(300));
        assert_eq!(Entity::Fixtures.cache_ttl(), Duration::from_secs(180));
        assert_eq!(Entity::Lineups.cache_ttl(), Duration::from_secs(60));
        assert_eq!(Entity::Livescores.cache_ttl(), Duration::from_secs(4));
        assert_eq!(Entity::Odds.cache_ttl(), Duration::from_secs(4));
    }

    #[test]
    fn test_all_names_round_trip() {
        for entity in Entity::ALL {
            assert_eq!(Entity::from_name(entity.as_str()), Some(entity));
        }
    }
}
