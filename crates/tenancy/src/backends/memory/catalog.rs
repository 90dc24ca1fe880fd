//! Schemas, relations and rows shared by all memory connections.

use std::collections::{BTreeMap, BTreeSet};

use std::cmp::Ordering;

use super::statement::{Predicate, Projection, QualifiedName, Select, SortKey, compare_values};
use crate::core::Row;
use crate::error::BackendError;

#[derive(Debug, Default, Clone)]
pub(crate) struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    fn column_index(&self, column: &str) -> Result<usize, BackendError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| BackendError::QueryError {
                message: format!("column \"{column}\" does not exist"),
            })
    }

    fn check_filter(&self, filter: Option<&Predicate>) -> Result<(), BackendError> {
        for column in filter.map(Predicate::columns).unwrap_or_default() {
            self.column_index(column)?;
        }
        Ok(())
    }

    fn matches(&self, row: &[Option<String>], filter: Option<&Predicate>) -> bool {
        filter.is_none_or(|predicate| predicate.evaluate(&self.columns, row))
    }

    /// Runs a query: filter, sort, limit, then project.
    fn scan(&self, query: &Select) -> Result<Vec<Row>, BackendError> {
        self.check_filter(query.filter.as_ref())?;
        let keys = query
            .order_by
            .iter()
            .map(|key| Ok((self.column_index(&key.column)?, key.descending)))
            .collect::<Result<Vec<_>, BackendError>>()?;

        let mut selected: Vec<&Vec<Option<String>>> = self
            .rows
            .iter()
            .filter(|row| self.matches(row, query.filter.as_ref()))
            .collect();
        if !keys.is_empty() {
            selected.sort_by(|a, b| compare_rows(a, b, &keys));
        }
        if let Some(limit) = query.limit {
            selected.truncate(limit);
        }

        match &query.projection {
            Projection::Count(label) => Ok(vec![Row::new(
                vec![label.clone()],
                vec![Some(selected.len().to_string())],
            )]),
            Projection::All => Ok(selected
                .into_iter()
                .map(|row| Row::new(self.columns.clone(), row.clone()))
                .collect()),
            Projection::Columns(columns) => {
                let indices = columns
                    .iter()
                    .map(|(source, _)| self.column_index(source))
                    .collect::<Result<Vec<_>, _>>()?;
                let labels: Vec<String> = columns.iter().map(|(_, label)| label.clone()).collect();
                Ok(selected
                    .into_iter()
                    .map(|row| {
                        Row::new(
                            labels.clone(),
                            indices.iter().map(|idx| row[*idx].clone()).collect(),
                        )
                    })
                    .collect())
            }
        }
    }
}

/// Orders rows by the sort keys. NULL sorts after every value, as in PostgreSQL.
fn compare_rows(a: &[Option<String>], b: &[Option<String>], keys: &[(usize, bool)]) -> Ordering {
    for (idx, descending) in keys {
        let ordering = match (&a[*idx], &b[*idx]) {
            (Some(x), Some(y)) => compare_values(x, y),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
        };
        let ordering = if *descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Schema {
    tables: BTreeMap<String, Table>,
    indexes: BTreeSet<String>,
}

impl Schema {
    fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.indexes.is_empty()
    }

    fn has_relation(&self, name: &str) -> bool {
        self.tables.contains_key(name) || self.indexes.contains(name)
    }
}

/// Database-wide catalog.
#[derive(Debug, Clone)]
pub(crate) struct Catalog {
    schemas: BTreeMap<String, Schema>,
}

impl Default for Catalog {
    fn default() -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert("public".to_string(), Schema::default());
        Self { schemas }
    }
}

impl Catalog {
    pub fn schema_exists(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn table_names(&self, schema: &str) -> Vec<String> {
        self.schemas
            .get(schema)
            .map(|s| s.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn index_names(&self, schema: &str) -> Vec<String> {
        self.schemas
            .get(schema)
            .map(|s| s.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn create_schema(&mut self, name: &str, if_not_exists: bool) -> Result<bool, BackendError> {
        if self.schemas.contains_key(name) {
            if if_not_exists {
                return Ok(false);
            }
            return Err(BackendError::DuplicateObject {
                name: format!("schema \"{name}\" already exists"),
            });
        }
        self.schemas.insert(name.to_string(), Schema::default());
        Ok(true)
    }

    pub fn drop_schema(&mut self, name: &str, if_exists: bool, cascade: bool) -> Result<(), BackendError> {
        let Some(schema) = self.schemas.get(name) else {
            if if_exists {
                return Ok(());
            }
            return Err(BackendError::SchemaNotFound {
                message: format!("schema \"{name}\" does not exist"),
            });
        };
        if !cascade && !schema.is_empty() {
            return Err(BackendError::QueryError {
                message: format!(
                    "cannot drop schema {name} because other objects depend on it"
                ),
            });
        }
        self.schemas.remove(name);
        Ok(())
    }

    /// Picks the schema new unqualified objects are created in.
    fn creation_schema(
        &self,
        name: &QualifiedName,
        search_path: &[String],
    ) -> Result<String, BackendError> {
        if let Some(schema) = &name.schema {
            if !self.schemas.contains_key(schema) {
                return Err(BackendError::SchemaNotFound {
                    message: format!("schema \"{schema}\" does not exist"),
                });
            }
            return Ok(schema.clone());
        }
        search_path
            .iter()
            .find(|s| self.schemas.contains_key(*s))
            .cloned()
            .ok_or_else(|| BackendError::SchemaNotFound {
                message: "no schema has been selected to create in".to_string(),
            })
    }

    /// Resolves a relation through the search path.
    fn resolve(&self, name: &QualifiedName, search_path: &[String]) -> Result<String, BackendError> {
        let undefined = || BackendError::UndefinedTable {
            relation: match &name.schema {
                Some(schema) => format!("{schema}.{}", name.name),
                None => name.name.clone(),
            },
        };

        if let Some(schema) = &name.schema {
            let Some(found) = self.schemas.get(schema) else {
                return Err(BackendError::SchemaNotFound {
                    message: format!("schema \"{schema}\" does not exist"),
                });
            };
            return if found.tables.contains_key(&name.name) {
                Ok(schema.clone())
            } else {
                Err(undefined())
            };
        }

        let mut any_schema = false;
        for schema in search_path {
            if let Some(found) = self.schemas.get(schema) {
                any_schema = true;
                if found.tables.contains_key(&name.name) {
                    return Ok(schema.clone());
                }
            }
        }
        if any_schema {
            Err(undefined())
        } else {
            Err(BackendError::SchemaNotFound {
                message: format!(
                    "no schema on search_path ({}) exists to resolve \"{}\"",
                    search_path.join(", "),
                    name.name
                ),
            })
        }
    }

    fn table_mut(&mut self, schema: &str, name: &str) -> Result<&mut Table, BackendError> {
        self.schemas
            .get_mut(schema)
            .and_then(|s| s.tables.get_mut(name))
            .ok_or_else(|| BackendError::UndefinedTable {
                relation: format!("{schema}.{name}"),
            })
    }

    pub fn create_table(
        &mut self,
        name: &QualifiedName,
        if_not_exists: bool,
        columns: &[String],
        search_path: &[String],
    ) -> Result<(), BackendError> {
        let schema_name = self.creation_schema(name, search_path)?;
        let schema = self.schemas.entry(schema_name.clone()).or_default();
        if schema.has_relation(&name.name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(BackendError::DuplicateObject {
                name: format!("relation \"{}\" already exists", name.name),
            });
        }
        schema.tables.insert(
            name.name.clone(),
            Table {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn drop_table(
        &mut self,
        name: &QualifiedName,
        if_exists: bool,
        search_path: &[String],
    ) -> Result<(), BackendError> {
        match self.resolve(name, search_path) {
            Ok(schema) => {
                if let Some(s) = self.schemas.get_mut(&schema) {
                    s.tables.remove(&name.name);
                }
                Ok(())
            }
            Err(_) if if_exists => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn create_index(
        &mut self,
        index: &str,
        if_not_exists: bool,
        table: &QualifiedName,
        search_path: &[String],
    ) -> Result<(), BackendError> {
        let schema_name = self.resolve(table, search_path)?;
        let schema = self.schemas.entry(schema_name).or_default();
        if schema.has_relation(index) {
            if if_not_exists {
                return Ok(());
            }
            return Err(BackendError::DuplicateObject {
                name: format!("relation \"{index}\" already exists"),
            });
        }
        schema.indexes.insert(index.to_string());
        Ok(())
    }

    pub fn insert(
        &mut self,
        name: &QualifiedName,
        columns: Option<&[String]>,
        rows: &[Vec<Option<String>>],
        search_path: &[String],
    ) -> Result<u64, BackendError> {
        let schema = self.resolve(name, search_path)?;
        let table = self.table_mut(&schema, &name.name)?;

        let targets: Vec<usize> = match columns {
            Some(columns) => columns
                .iter()
                .map(|c| table.column_index(c))
                .collect::<Result<_, _>>()?,
            None => (0..table.columns.len()).collect(),
        };

        let mut staged = Vec::with_capacity(rows.len());
        for values in rows {
            if values.len() != targets.len() {
                return Err(BackendError::QueryError {
                    message: format!(
                        "INSERT has {} values for {} target columns",
                        values.len(),
                        targets.len()
                    ),
                });
            }
            let mut row = vec![None; table.columns.len()];
            for (idx, value) in targets.iter().zip(values) {
                row[*idx] = value.clone();
            }
            staged.push(row);
        }

        let count = staged.len() as u64;
        table.rows.extend(staged);
        Ok(count)
    }

    pub fn select(&self, query: &Select, search_path: &[String]) -> Result<Vec<Row>, BackendError> {
        let name = &query.table;
        if name.schema.as_deref() == Some("information_schema") && name.name == "schemata" {
            return self.schemata().scan(query);
        }

        let schema = self.resolve(name, search_path)?;
        self.schemas
            .get(&schema)
            .and_then(|s| s.tables.get(&name.name))
            .ok_or_else(|| BackendError::UndefinedTable {
                relation: name.name.clone(),
            })?
            .scan(query)
    }

    /// `information_schema.schemata` as a table.
    fn schemata(&self) -> Table {
        Table {
            columns: vec!["schema_name".to_string()],
            rows: self
                .schemas
                .keys()
                .map(|name| vec![Some(name.clone())])
                .collect(),
        }
    }

    pub fn update(
        &mut self,
        name: &QualifiedName,
        assignments: &[(String, Option<String>)],
        filter: Option<&Predicate>,
        search_path: &[String],
    ) -> Result<u64, BackendError> {
        let schema = self.resolve(name, search_path)?;
        let table = self.table_mut(&schema, &name.name)?;
        table.check_filter(filter)?;
        let assignments = assignments
            .iter()
            .map(|(column, value)| Ok((table.column_index(column)?, value.clone())))
            .collect::<Result<Vec<_>, BackendError>>()?;

        let Table { columns, rows } = table;
        let mut count = 0;
        for row in rows.iter_mut() {
            if filter.is_some_and(|predicate| !predicate.evaluate(columns, row)) {
                continue;
            }
            for (idx, value) in &assignments {
                row[*idx] = value.clone();
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn delete(
        &mut self,
        name: &QualifiedName,
        filter: Option<&Predicate>,
        search_path: &[String],
    ) -> Result<u64, BackendError> {
        let schema = self.resolve(name, search_path)?;
        let table = self.table_mut(&schema, &name.name)?;
        table.check_filter(filter)?;
        let Table { columns, rows } = table;
        let before = rows.len();
        rows.retain(|row| filter.is_some_and(|predicate| !predicate.evaluate(columns, row)));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::statement::Comparison;

    fn name(schema: Option<&str>, table: &str) -> QualifiedName {
        QualifiedName {
            schema: schema.map(str::to_string),
            name: table.to_string(),
        }
    }

    fn path(schemas: &[&str]) -> Vec<String> {
        schemas.iter().map(|s| s.to_string()).collect()
    }

    fn id_is(op: Comparison, value: &str) -> Predicate {
        Predicate::Compare {
            column: "id".to_string(),
            op,
            value: Some(value.to_string()),
        }
    }

    fn select(table: QualifiedName, projection: Projection, filter: Option<Predicate>) -> Select {
        Select {
            table,
            projection,
            filter,
            order_by: Vec::new(),
            limit: None,
        }
    }

    fn label_column() -> Projection {
        Projection::Columns(vec![("label".to_string(), "label".to_string())])
    }

    fn seeded() -> (Catalog, QualifiedName, Vec<String>) {
        let mut catalog = Catalog::default();
        let sp = path(&["public"]);
        let t = name(None, "items");
        catalog
            .create_table(&t, false, &["id".to_string(), "label".to_string()], &sp)
            .unwrap();
        catalog
            .insert(
                &t,
                None,
                &[
                    vec![Some("2".to_string()), Some("b".to_string())],
                    vec![Some("10".to_string()), None],
                    vec![Some("1".to_string()), Some("a".to_string())],
                ],
                &sp,
            )
            .unwrap();
        (catalog, t, sp)
    }

    #[test]
    fn test_resolution_follows_search_path_order() {
        let mut catalog = Catalog::default();
        catalog.create_schema("acme", false).unwrap();
        let columns = vec!["id".to_string()];
        catalog
            .create_table(&name(None, "widgets"), false, &columns, &path(&["acme"]))
            .unwrap();
        catalog
            .create_table(&name(None, "widgets"), false, &columns, &path(&["public"]))
            .unwrap();

        assert_eq!(
            catalog
                .resolve(&name(None, "widgets"), &path(&["acme", "public"]))
                .unwrap(),
            "acme"
        );
        assert_eq!(
            catalog
                .resolve(&name(None, "widgets"), &path(&["missing", "public"]))
                .unwrap(),
            "public"
        );
    }

    #[test]
    fn test_locked_path_reports_unknown_schema() {
        let catalog = Catalog::default();
        let err = catalog
            .resolve(&name(None, "widgets"), &path(&["non_existent_schema_lock"]))
            .unwrap_err();
        assert!(matches!(err, BackendError::SchemaNotFound { .. }));

        let err = catalog
            .creation_schema(&name(None, "widgets"), &path(&["non_existent_schema_lock"]))
            .unwrap_err();
        assert!(matches!(err, BackendError::SchemaNotFound { .. }));
    }

    #[test]
    fn test_drop_schema_requires_cascade_when_not_empty() {
        let mut catalog = Catalog::default();
        catalog.create_schema("acme", false).unwrap();
        catalog
            .create_table(&name(Some("acme"), "t"), false, &[], &[])
            .unwrap();
        assert!(catalog.drop_schema("acme", false, false).is_err());
        catalog.drop_schema("acme", false, true).unwrap();
        assert!(!catalog.schema_exists("acme"));
        assert!(catalog.drop_schema("acme", true, false).is_ok());
    }

    #[test]
    fn test_crud_round() {
        let (mut catalog, t, sp) = seeded();

        let updated = catalog
            .update(
                &t,
                &[("label".to_string(), Some("c".to_string()))],
                Some(&id_is(Comparison::Eq, "10")),
                &sp,
            )
            .unwrap();
        assert_eq!(updated, 1);

        let rows = catalog
            .select(&select(t.clone(), label_column(), Some(id_is(Comparison::Eq, "10"))), &sp)
            .unwrap();
        assert_eq!(rows[0].get(0), Some("c"));

        let deleted = catalog
            .delete(&t, Some(&id_is(Comparison::Lt, "3")), &sp)
            .unwrap();
        assert_eq!(deleted, 2);
        let count = catalog
            .select(&select(t, Projection::Count("count".to_string()), None), &sp)
            .unwrap();
        assert_eq!(count[0].get_by_name("count"), Some("1"));
    }

    #[test]
    fn test_range_filter_compares_numbers() {
        let (catalog, t, sp) = seeded();
        let rows = catalog
            .select(&select(t, Projection::All, Some(id_is(Comparison::Gt, "1"))), &sp)
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get_by_name("id")).collect();
        assert_eq!(ids, vec![Some("2"), Some("10")]);
    }

    #[test]
    fn test_order_by_and_limit() {
        let (catalog, t, sp) = seeded();
        let mut query = select(t, label_column(), None);
        query.order_by = vec![SortKey {
            column: "id".to_string(),
            descending: false,
        }];
        let labels: Vec<_> = catalog
            .select(&query, &sp)
            .unwrap()
            .iter()
            .map(|r| r.get(0).map(str::to_string))
            .collect();
        assert_eq!(
            labels,
            vec![Some("a".to_string()), Some("b".to_string()), None]
        );

        query.order_by = vec![SortKey {
            column: "label".to_string(),
            descending: true,
        }];
        query.limit = Some(2);
        let labels: Vec<_> = catalog
            .select(&query, &sp)
            .unwrap()
            .iter()
            .map(|r| r.get(0).map(str::to_string))
            .collect();
        assert_eq!(labels, vec![None, Some("b".to_string())]);
    }

    #[test]
    fn test_unknown_filter_column_is_an_error() {
        let (catalog, t, sp) = seeded();
        let filter = Predicate::Null {
            column: "missing".to_string(),
            negated: false,
        };
        assert!(catalog.select(&select(t, Projection::All, Some(filter)), &sp).is_err());
    }

    #[test]
    fn test_information_schema_schemata() {
        let mut catalog = Catalog::default();
        catalog.create_schema("acme", false).unwrap();
        let filter = Predicate::Compare {
            column: "schema_name".to_string(),
            op: Comparison::Eq,
            value: Some("acme".to_string()),
        };
        let rows = catalog
            .select(
                &select(
                    name(Some("information_schema"), "schemata"),
                    Projection::Columns(vec![("schema_name".to_string(), "schema_name".to_string())]),
                    Some(filter),
                ),
                &[],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some("acme"));
    }
}
