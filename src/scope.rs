use crate::db::Database;
use crate::errors::EngineResult;
use crate::groups::{group_for_path_id, group_path_ids};
use crate::models::{ScopeContext, ScopeKeyword, VisibilityFilter};
use crate::paths::{ensure_path, normalize_path};
use crate::snowflake::IdGenerator;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Turns a working directory into a [`ScopeContext`]. Resolution never fails: anything that
/// goes wrong degrades to a global-only context.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    db: Arc<Database>,
    ids: Arc<IdGenerator>,
}

impl ScopeResolver {
    pub fn new(db: Arc<Database>, ids: Arc<IdGenerator>) -> Self {
        Self { db, ids }
    }

    pub fn resolve(&self, working_directory: &str) -> ScopeContext {
        let canonical = normalize_path(working_directory);
        if canonical.is_empty() {
            tracing::warn!("empty working directory, scope degraded to global-only");
            return ScopeContext::degraded();
        }

        match self.try_resolve(&canonical) {
            Ok(ctx) => ctx,
            Err(error) => {
                tracing::warn!(path = %canonical, error = %error, "scope resolution failed, degraded to global-only");
                ScopeContext::degraded()
            }
        }
    }

    pub fn resolve_current(&self) -> ScopeContext {
        match std::env::current_dir() {
            Ok(cwd) => self.resolve(&cwd.to_string_lossy()),
            Err(error) => {
                tracing::warn!(error = %error, "working directory unavailable, scope degraded to global-only");
                ScopeContext::degraded()
            }
        }
    }

    fn try_resolve(&self, canonical: &str) -> EngineResult<ScopeContext> {
        self.db.write(|tx| {
            let path = ensure_path(tx, &self.ids, canonical)?;
            let (group_id, group_path_ids) = match group_for_path_id(tx, path.id)? {
                Some(group) => (Some(group.id), group_path_ids(tx, group.id)?),
                None => (None, BTreeSet::new()),
            };
            tracing::debug!(
                path = %path.canonical_path,
                path_id = path.id,
                group_id = ?group_id,
                peers = group_path_ids.len(),
                "scope resolved"
            );
            Ok(ScopeContext {
                path_id: path.id,
                group_id,
                group_path_ids,
                include_global: true,
            })
        })
    }
}

/// Builds the visibility predicate for a keyword. The first matching rule wins:
///
/// - `global`: global rows only.
/// - `personal`: the caller's own path, or nothing when the path is unknown.
/// - `group`: every path in the caller's group, or nothing when ungrouped.
/// - `all` / empty: global rows plus own and group paths. With no known path and no group
///   this degrades to global-only, so an empty private result can mean "scope degraded"
///   rather than "no data". [`VisibilityFilter::describe`] reports `global-only` then.
///
/// Non-global rows are only ever matched through an explicit, non-empty set of path ids.
pub fn build_filter(keyword: ScopeKeyword, ctx: &ScopeContext) -> VisibilityFilter {
    match keyword {
        ScopeKeyword::Global => VisibilityFilter::new(ctx.include_global, BTreeSet::new()),
        ScopeKeyword::Personal if ctx.has_path() => {
            VisibilityFilter::new(false, BTreeSet::from([ctx.path_id]))
        }
        ScopeKeyword::Personal => VisibilityFilter::nothing(),
        ScopeKeyword::Group => VisibilityFilter::new(false, ctx.group_path_ids.clone()),
        ScopeKeyword::All => {
            let mut path_ids = ctx.group_path_ids.clone();
            if ctx.has_path() {
                path_ids.insert(ctx.path_id);
            }
            VisibilityFilter::new(ctx.include_global, path_ids)
        }
    }
}

/// String-keyword entry point for presentation layers.
pub fn build_filter_for(raw_keyword: &str, ctx: &ScopeContext) -> VisibilityFilter {
    build_filter(ScopeKeyword::parse(raw_keyword), ctx)
}

#[cfg(test)]
mod tests {
    use super::{build_filter, build_filter_for, ScopeResolver};
    use crate::db::Database;
    use crate::groups::GroupRegistry;
    use crate::models::{ScopeContext, ScopeKeyword};
    use crate::snowflake::IdGenerator;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn ctx(path_id: i64, group: &[i64]) -> ScopeContext {
        ScopeContext {
            path_id,
            group_id: if group.is_empty() { None } else { Some(99) },
            group_path_ids: group.iter().copied().collect(),
            include_global: true,
        }
    }

    #[test]
    fn global_keyword_excludes_private_rows() {
        let filter = build_filter(ScopeKeyword::Global, &ctx(1, &[1, 2]));
        assert!(filter.include_global());
        assert!(!filter.include_non_global());
        assert!(filter.path_ids().is_empty());
    }

    #[test]
    fn personal_keyword_uses_only_own_path() {
        let filter = build_filter(ScopeKeyword::Personal, &ctx(5, &[5, 6]));
        assert!(!filter.include_global());
        assert_eq!(filter.path_ids(), &BTreeSet::from([5]));

        let unknown = build_filter(ScopeKeyword::Personal, &ScopeContext::degraded());
        assert!(unknown.matches_nothing());
    }

    #[test]
    fn group_keyword_requires_membership() {
        let filter = build_filter(ScopeKeyword::Group, &ctx(5, &[5, 6, 7]));
        assert!(!filter.include_global());
        assert_eq!(filter.path_ids(), &BTreeSet::from([5, 6, 7]));

        let ungrouped = build_filter(ScopeKeyword::Group, &ctx(5, &[]));
        assert!(ungrouped.matches_nothing());
    }

    #[test]
    fn all_keyword_unions_own_and_group_paths() {
        let filter = build_filter(ScopeKeyword::All, &ctx(5, &[6, 7]));
        assert!(filter.include_global());
        assert_eq!(filter.path_ids(), &BTreeSet::from([5, 6, 7]));
    }

    #[test]
    fn unknown_location_degrades_all_to_global_only() {
        let filter = build_filter_for("", &ScopeContext::degraded());
        assert!(filter.include_global());
        assert!(!filter.include_non_global());
        assert_eq!(filter.describe(), "global-only");
    }

    #[test]
    fn unknown_keyword_is_treated_as_global() {
        let filter = build_filter_for("everyone", &ctx(5, &[5, 6]));
        assert_eq!(filter, build_filter(ScopeKeyword::Global, &ctx(5, &[5, 6])));
    }

    #[test]
    fn no_keyword_matches_private_rows_without_path_ids() {
        let contexts = [
            ScopeContext::degraded(),
            ctx(0, &[]),
            ctx(3, &[]),
            ctx(0, &[4, 5]),
            ctx(3, &[3, 4]),
            ScopeContext {
                include_global: false,
                ..ctx(3, &[3])
            },
        ];
        for keyword in ["personal", "group", "global", "all", "", "bogus"] {
            for context in &contexts {
                let filter = build_filter_for(keyword, context);
                if filter.include_non_global() {
                    assert!(!filter.path_ids().is_empty(), "{keyword} leaked for {context:?}");
                }
                if !context.include_global {
                    assert!(!filter.include_global());
                }
            }
        }
    }

    #[test]
    fn resolve_registers_path_and_collects_group_peers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let ids = Arc::new(IdGenerator::new(3).expect("ids"));
        let resolver = ScopeResolver::new(Arc::clone(&db), Arc::clone(&ids));
        let groups = GroupRegistry::new(db, ids);

        let lonely = resolver.resolve("/repo/solo");
        assert!(lonely.has_path());
        assert!(lonely.group_path_ids.is_empty());
        assert_eq!(resolver.resolve("/repo/solo").path_id, lonely.path_id);

        let group = groups.create_group("team", "").expect("group");
        groups.add_path(group.id, "/repo/a").expect("add a");
        groups.add_path(group.id, "/repo/b").expect("add b");

        let from_b = resolver.resolve("/repo/b");
        assert_eq!(from_b.group_id, Some(group.id));
        assert_eq!(from_b.group_path_ids.len(), 2);
        assert!(from_b.group_path_ids.contains(&from_b.path_id));
    }

    #[test]
    fn resolve_of_blank_directory_is_degraded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let resolver = ScopeResolver::new(db, Arc::new(IdGenerator::new(3).expect("ids")));
        assert_eq!(resolver.resolve("  "), ScopeContext::degraded());
    }
}
