use crate::models::VisibilityFilter;
use rusqlite::types::Value;

/// SQL fragment over the `global` / `path_id` columns shared by every entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopePredicate {
    clause: String,
    params: Vec<Value>,
}

impl ScopePredicate {
    /// Disjunction of the active clauses. With no active clause the predicate is
    /// always false, so the query returns nothing instead of scanning the table.
    pub fn from_filter(filter: &VisibilityFilter) -> Self {
        let mut clauses = Vec::with_capacity(2);
        let mut params = Vec::new();

        if filter.include_global() {
            clauses.push("global = 1".to_string());
        }
        if filter.include_non_global() && !filter.path_ids().is_empty() {
            let placeholders = vec!["?"; filter.path_ids().len()].join(", ");
            clauses.push(format!("(global = 0 AND path_id IN ({}))", placeholders));
            params.extend(filter.path_ids().iter().map(|id| Value::Integer(*id)));
        }

        let clause = if clauses.is_empty() {
            "(1 = 0)".to_string()
        } else {
            format!("({})", clauses.join(" OR "))
        };
        Self { clause, params }
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

impl VisibilityFilter {
    /// In-memory twin of [`ScopePredicate`] for a single row.
    pub fn admits(&self, global: bool, path_id: i64) -> bool {
        if global {
            return self.include_global();
        }
        self.include_non_global() && self.path_ids().contains(&path_id)
    }
}

#[cfg(test)]
mod tests {
    use super::ScopePredicate;
    use crate::models::VisibilityFilter;
    use rusqlite::types::Value;
    use rusqlite::Connection;
    use std::collections::BTreeSet;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("memory db");
        conn.execute_batch(
            "CREATE TABLE rows (id INTEGER PRIMARY KEY, global INTEGER NOT NULL, path_id INTEGER NOT NULL);
             INSERT INTO rows VALUES (1, 1, 0), (2, 0, 10), (3, 0, 11), (4, 0, 12), (5, 1, 10);",
        )
        .expect("seed");
        conn
    }

    fn matching(conn: &Connection, filter: &VisibilityFilter) -> Vec<i64> {
        let predicate = ScopePredicate::from_filter(filter);
        let sql = format!("SELECT id FROM rows WHERE {} ORDER BY id", predicate.clause());
        let mut stmt = conn.prepare(&sql).expect("prepare");
        stmt.query_map(rusqlite::params_from_iter(predicate.params()), |row| row.get(0))
            .expect("query")
            .collect::<Result<Vec<i64>, _>>()
            .expect("collect")
    }

    #[test]
    fn empty_filter_is_always_false() {
        let predicate = ScopePredicate::from_filter(&VisibilityFilter::nothing());
        assert_eq!(predicate.clause(), "(1 = 0)");
        assert!(predicate.params().is_empty());
        assert!(matching(&seeded(), &VisibilityFilter::nothing()).is_empty());
    }

    #[test]
    fn global_rows_ignore_their_stored_path() {
        let conn = seeded();
        assert_eq!(matching(&conn, &VisibilityFilter::global_only()), vec![1, 5]);

        let personal = VisibilityFilter::new(false, BTreeSet::from([10]));
        assert_eq!(matching(&conn, &personal), vec![2]);
    }

    #[test]
    fn combined_filter_binds_each_path_id() {
        let conn = seeded();
        let filter = VisibilityFilter::new(true, BTreeSet::from([11, 12]));
        let predicate = ScopePredicate::from_filter(&filter);
        assert_eq!(
            predicate.clause(),
            "(global = 1 OR (global = 0 AND path_id IN (?, ?)))"
        );
        assert_eq!(predicate.params(), &[Value::Integer(11), Value::Integer(12)]);
        assert_eq!(matching(&conn, &filter), vec![1, 3, 4, 5]);
    }

    #[test]
    fn admits_agrees_with_sql() {
        let conn = seeded();
        let rows = [(1, true, 0), (2, false, 10), (3, false, 11), (4, false, 12), (5, true, 10)];
        let filters = [
            VisibilityFilter::nothing(),
            VisibilityFilter::global_only(),
            VisibilityFilter::new(false, BTreeSet::from([10, 12])),
            VisibilityFilter::new(true, BTreeSet::from([11])),
        ];
        for filter in &filters {
            let expected: Vec<i64> = rows
                .iter()
                .filter(|(_, global, path_id)| filter.admits(*global, *path_id))
                .map(|(id, _, _)| *id)
                .collect();
            assert_eq!(matching(&conn, filter), expected, "{}", filter.describe());
        }
    }
}
