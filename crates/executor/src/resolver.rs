//! Column reference resolution against a base table plus its joins, in the
//! order they appear in a query (§4.8).

use chimera_core::{Column, Error, Result};

pub struct TrackedTable<'a> {
    pub name: &'a str,
    pub alias: Option<&'a str>,
    pub columns: &'a [Column],
}

impl<'a> TrackedTable<'a> {
    pub fn new(name: &'a str, alias: Option<&'a str>, columns: &'a [Column]) -> Self {
        Self { name, alias, columns }
    }

    fn matches(&self, qualifier: &str) -> bool {
        self.name == qualifier || self.alias == Some(qualifier)
    }
}

/// One resolved reference: which tracked table it came from, and the bare
/// column name within that table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub table_index: usize,
    pub column_index: usize,
}

pub struct ColumnResolver<'a> {
    tables: Vec<TrackedTable<'a>>,
}

impl<'a> ColumnResolver<'a> {
    pub fn new(tables: Vec<TrackedTable<'a>>) -> Self {
        Self { tables }
    }

    /// Resolve `reference`, either `column` (unqualified) or `table.column`.
    pub fn resolve(&self, reference: &str) -> Result<Resolved> {
        match reference.split_once('.') {
            Some((qualifier, column)) => self.resolve_qualified(reference, qualifier, column),
            None => self.resolve_unqualified(reference),
        }
    }

    fn resolve_qualified(&self, reference: &str, qualifier: &str, column: &str) -> Result<Resolved> {
        if qualifier.is_empty() || column.is_empty() || column.contains('.') {
            return Err(Error::InvalidQualifiedName(reference.to_string()));
        }
        let table_index = self
            .tables
            .iter()
            .position(|t| t.matches(qualifier))
            .ok_or_else(|| Error::ColumnNotFound(reference.to_string()))?;
        let table = &self.tables[table_index];
        let column_index = table
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| Error::ColumnNotFound(reference.to_string()))?;
        Ok(Resolved { table_index, column_index })
    }

    fn resolve_unqualified(&self, column: &str) -> Result<Resolved> {
        let matches: Vec<(usize, usize)> = self
            .tables
            .iter()
            .enumerate()
            .filter_map(|(ti, t)| t.columns.iter().position(|c| c.name == column).map(|ci| (ti, ci)))
            .collect();
        match matches.as_slice() {
            [] => Err(Error::ColumnNotFound(column.to_string())),
            [(table_index, column_index)] => Ok(Resolved { table_index: *table_index, column_index: *column_index }),
            _ => Err(Error::AmbiguousColumn(column.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::ColumnType;

    fn cols() -> Vec<Column> {
        vec![Column::new("id", ColumnType::Int), Column::new("name", ColumnType::Text)]
    }

    #[test]
    fn unqualified_unambiguous_resolves() {
        let users = cols();
        let resolver = ColumnResolver::new(vec![TrackedTable::new("users", None, &users)]);
        let r = resolver.resolve("name").unwrap();
        assert_eq!(r.table_index, 0);
    }

    #[test]
    fn unqualified_ambiguous_across_joined_tables() {
        let users = cols();
        let orders = cols();
        let resolver = ColumnResolver::new(vec![
            TrackedTable::new("users", None, &users),
            TrackedTable::new("orders", None, &orders),
        ]);
        let err = resolver.resolve("id").unwrap_err();
        assert!(matches!(err, Error::AmbiguousColumn(_)));
    }

    #[test]
    fn qualified_by_alias_resolves() {
        let users = cols();
        let resolver = ColumnResolver::new(vec![TrackedTable::new("users", Some("u"), &users)]);
        let r = resolver.resolve("u.name").unwrap();
        assert_eq!(r.table_index, 0);
    }

    #[test]
    fn qualified_by_unknown_table_is_not_found() {
        let users = cols();
        let resolver = ColumnResolver::new(vec![TrackedTable::new("users", None, &users)]);
        let err = resolver.resolve("orders.name").unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound(_)));
    }

    #[test]
    fn malformed_qualified_forms_are_rejected() {
        let users = cols();
        let resolver = ColumnResolver::new(vec![TrackedTable::new("users", None, &users)]);
        assert!(matches!(resolver.resolve(".name").unwrap_err(), Error::InvalidQualifiedName(_)));
        assert!(matches!(resolver.resolve("users.").unwrap_err(), Error::InvalidQualifiedName(_)));
        assert!(matches!(resolver.resolve("u.n.name").unwrap_err(), Error::InvalidQualifiedName(_)));
    }

    #[test]
    fn missing_column_is_not_found() {
        let users = cols();
        let resolver = ColumnResolver::new(vec![TrackedTable::new("users", None, &users)]);
        assert!(matches!(resolver.resolve("missing").unwrap_err(), Error::ColumnNotFound(_)));
    }
}
