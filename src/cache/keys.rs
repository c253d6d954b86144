//! Cache key-space layout.
//!
//! Keys have the shape `{prefix}:{tenant}[:{qualifier}]`. Entity keys carry
//! the record id as qualifier, list keys carry the view filter, and every
//! list family shares the `{prefix}:{tenant}:` prefix so one range scan
//! removes all of its views.

use std::fmt::{Display, Formatter};

/// A family of cache entries sharing one key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    /// The tenant's profile (singleton).
    Profile,
    /// One company record.
    Company,
    /// One job record.
    Job,
    /// One match result record.
    MatchResult,
    /// Company list views.
    Companies,
    /// Job list views, per company filter.
    Jobs,
    /// Match history views, per limit.
    MatchHistory,
    /// Pending relational deletes.
    Tombstone,
    /// Engine bookkeeping (dirty marker, id high-water mark).
    Meta,
}

impl Keyspace {
    /// Fixed textual prefix of the family.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Company => "company",
            Self::Job => "job",
            Self::MatchResult => "match",
            Self::Companies => "companies",
            Self::Jobs => "jobs",
            Self::MatchHistory => "match_history",
            Self::Tombstone => "tomb",
            Self::Meta => "meta",
        }
    }

    /// Parse an entity keyspace from its prefix.
    #[must_use]
    pub fn entity_from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "company" => Some(Self::Company),
            "job" => Some(Self::Job),
            "match" => Some(Self::MatchResult),
            _ => None,
        }
    }
}

/// A fully-qualified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key of a single entity: `{prefix}:{tenant}:{id}`.
    #[must_use]
    pub fn entity(space: Keyspace, tenant: &str, id: i64) -> Self {
        Self(format!("{}:{tenant}:{id}", space.prefix()))
    }

    /// Key of a per-tenant singleton: `{prefix}:{tenant}`.
    #[must_use]
    pub fn singleton(space: Keyspace, tenant: &str) -> Self {
        Self(format!("{}:{tenant}", space.prefix()))
    }

    /// Key of a list view; `None` selects the unfiltered view.
    #[must_use]
    pub fn list(space: Keyspace, tenant: &str, qualifier: Option<&str>) -> Self {
        Self(format!(
            "{}:{tenant}:{}",
            space.prefix(),
            qualifier.unwrap_or("all")
        ))
    }

    /// Tombstone recording a pending delete: `tomb:{tenant}:{entity prefix}:{id}`.
    #[must_use]
    pub fn tombstone(space: Keyspace, tenant: &str, id: i64) -> Self {
        Self(format!(
            "{}:{tenant}:{}:{id}",
            Keyspace::Tombstone.prefix(),
            space.prefix()
        ))
    }

    /// Named bookkeeping key: `meta:{tenant}:{name}`.
    #[must_use]
    pub fn meta(tenant: &str, name: &str) -> Self {
        Self(format!("{}:{tenant}:{name}", Keyspace::Meta.prefix()))
    }

    /// Prefix shared by every key of `space` for `tenant`.
    #[must_use]
    pub fn family_prefix(space: Keyspace, tenant: &str) -> String {
        format!("{}:{tenant}:", space.prefix())
    }

    /// Borrow the encoded key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the trailing numeric id from a key that starts with `prefix`.
#[must_use]
pub fn id_from_key(key: &str, prefix: &str) -> Option<i64> {
    key.strip_prefix(prefix)?.parse().ok()
}

/// Decode a tombstone key into its entity keyspace and id.
#[must_use]
pub fn parse_tombstone(key: &str, tenant: &str) -> Option<(Keyspace, i64)> {
    let rest = key.strip_prefix(&CacheKey::family_prefix(Keyspace::Tombstone, tenant))?;
    let (space, id) = rest.split_once(':')?;
    Some((Keyspace::entity_from_prefix(space)?, id.parse().ok()?))
}
