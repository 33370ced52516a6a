//! Generic list-query pipeline shared by tours, users, and reviews.
//!
//! A raw query-string map turns into equality/comparison filters, sort keys,
//! a field projection, and pagination. Column names always come from the
//! resource's [`FilterSchema`] allow-list and values are bound parameters,
//! so nothing from the request ever reaches the SQL text itself.

use std::collections::HashMap;

use sqlx::{PgPool, Postgres, QueryBuilder};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::error::ApiError;

/// Keys consumed by the pipeline itself, never treated as filters.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "gt" => Some(CmpOp::Gt),
            "gte" => Some(CmpOp::Gte),
            "lt" => Some(CmpOp::Lt),
            "lte" => Some(CmpOp::Lte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Numeric,
    Bool,
    Timestamp,
}

/// Filterable/sortable columns for one resource.
pub struct FilterSchema {
    pub columns: &'static [(&'static str, ColumnKind)],
}

impl FilterSchema {
    fn lookup(&self, name: &str) -> Option<(&'static str, ColumnKind)> {
        self.columns
            .iter()
            .find(|(column, _)| *column == name)
            .copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Numeric(f64),
    Bool(bool),
    Timestamp(OffsetDateTime),
    Id(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub op: CmpOp,
    pub value: FilterValue,
}

impl Filter {
    /// Equality prefilter on a reference column, e.g. a nested route's
    /// "this tour's reviews only".
    pub fn id_eq(column: &'static str, id: Uuid) -> Self {
        Self {
            column,
            op: CmpOp::Eq,
            value: FilterValue::Id(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub column: &'static str,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct ListParams {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub fields: Option<Vec<String>>,
    pub page: Option<i64>,
    pub limit: i64,
}

impl ListParams {
    pub fn parse(raw: &HashMap<String, String>, schema: &FilterSchema) -> Result<Self, ApiError> {
        let mut filters = Vec::new();
        for (key, value) in raw {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let (name, op) = split_operator(key)?;
            let (column, kind) = schema.lookup(name).ok_or_else(|| {
                ApiError::Validation(format!("cannot filter on field '{name}'"))
            })?;
            filters.push(Filter {
                column,
                op,
                value: coerce(value, kind, name)?,
            });
        }

        let sort = match raw.get("sort") {
            Some(spec) => parse_sort(spec, schema)?,
            None => Vec::new(),
        };

        let fields = raw.get("fields").map(|spec| {
            spec.split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect()
        });

        let page = match raw.get("page") {
            Some(p) => Some(
                p.parse::<i64>()
                    .ok()
                    .filter(|p| *p >= 1)
                    .ok_or_else(|| ApiError::Validation("page must be a positive integer".into()))?,
            ),
            None => None,
        };

        let limit = match raw.get("limit") {
            Some(l) => l
                .parse::<i64>()
                .ok()
                .filter(|l| *l >= 1)
                .ok_or_else(|| ApiError::Validation("limit must be a positive integer".into()))?,
            None => DEFAULT_LIMIT,
        };

        Ok(Self {
            filters,
            sort,
            fields,
            page,
            limit,
        })
    }

    /// Zero-based row offset. A page so large the offset cannot even be
    /// computed necessarily lies past the end of any result set.
    pub fn offset(&self) -> Result<i64, ApiError> {
        self.page
            .unwrap_or(1)
            .checked_sub(1)
            .and_then(|p| p.checked_mul(self.limit))
            .ok_or(ApiError::PageOutOfRange)
    }
}

/// `price[gte]` -> `("price", Gte)`; a bare key is an equality filter.
fn split_operator(key: &str) -> Result<(&str, CmpOp), ApiError> {
    match key.split_once('[') {
        Some((name, rest)) => {
            let suffix = rest.strip_suffix(']').ok_or_else(|| {
                ApiError::Validation(format!("malformed filter key '{key}'"))
            })?;
            let op = CmpOp::from_suffix(suffix).ok_or_else(|| {
                ApiError::Validation(format!("unsupported filter operator '{suffix}'"))
            })?;
            Ok((name, op))
        }
        None => Ok((key, CmpOp::Eq)),
    }
}

fn coerce(value: &str, kind: ColumnKind, name: &str) -> Result<FilterValue, ApiError> {
    match kind {
        ColumnKind::Text => Ok(FilterValue::Text(value.to_string())),
        ColumnKind::Numeric => value
            .parse::<f64>()
            .map(FilterValue::Numeric)
            .map_err(|_| ApiError::Validation(format!("'{name}' expects a numeric value"))),
        ColumnKind::Bool => value
            .parse::<bool>()
            .map(FilterValue::Bool)
            .map_err(|_| ApiError::Validation(format!("'{name}' expects true or false"))),
        ColumnKind::Timestamp => OffsetDateTime::parse(value, &Rfc3339)
            .map(FilterValue::Timestamp)
            .map_err(|_| ApiError::Validation(format!("'{name}' expects an RFC 3339 timestamp"))),
    }
}

fn parse_sort(spec: &str, schema: &FilterSchema) -> Result<Vec<SortKey>, ApiError> {
    spec.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, descending) = match part.strip_prefix('-') {
                Some(name) => (name, true),
                None => (part, false),
            };
            let (column, _) = schema
                .lookup(name)
                .ok_or_else(|| ApiError::Validation(format!("cannot sort on field '{name}'")))?;
            Ok(SortKey { column, descending })
        })
        .collect()
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    qb.push(" AND ");
    // Enum-backed columns compare as text so one code path covers both.
    match &filter.value {
        FilterValue::Text(_) => {
            qb.push(filter.column).push("::text");
        }
        _ => {
            qb.push(filter.column);
        }
    }
    qb.push(" ").push(filter.op.as_sql()).push(" ");
    match &filter.value {
        FilterValue::Text(v) => qb.push_bind(v.clone()),
        FilterValue::Numeric(v) => qb.push_bind(*v),
        FilterValue::Bool(v) => qb.push_bind(*v),
        FilterValue::Timestamp(v) => qb.push_bind(*v),
        FilterValue::Id(v) => qb.push_bind(*v),
    };
}

fn push_sort(qb: &mut QueryBuilder<'_, Postgres>, sort: &[SortKey]) {
    qb.push(" ORDER BY ");
    if sort.is_empty() {
        qb.push("created_at DESC");
        return;
    }
    for (i, key) in sort.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(key.column);
        qb.push(if key.descending { " DESC" } else { " ASC" });
    }
}

fn push_pagination(qb: &mut QueryBuilder<'_, Postgres>, limit: i64, offset: i64) {
    qb.push(" LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
}

/// An explicitly requested page must start before the end of the result set.
fn ensure_page_exists(offset: i64, total: i64) -> Result<(), ApiError> {
    if offset >= total {
        return Err(ApiError::PageOutOfRange);
    }
    Ok(())
}

/// One list query: a base SELECT/COUNT pair (each ending in a WHERE clause),
/// optional structured prefilters, and the parsed request directives.
pub struct ListQuery<'a> {
    select_base: &'a str,
    count_base: &'a str,
    params: &'a ListParams,
    prefilters: Vec<Filter>,
}

impl<'a> ListQuery<'a> {
    pub fn new(select_base: &'a str, count_base: &'a str, params: &'a ListParams) -> Self {
        Self {
            select_base,
            count_base,
            params,
            prefilters: Vec::new(),
        }
    }

    pub fn prefilter(mut self, filter: Filter) -> Self {
        self.prefilters.push(filter);
        self
    }

    fn all_filters(&self) -> impl Iterator<Item = &Filter> {
        self.prefilters.iter().chain(self.params.filters.iter())
    }

    /// Runs the query. When `page` was explicitly requested, the matching
    /// rows are counted first and an out-of-range page fails instead of
    /// returning an empty success.
    pub async fn fetch_all<T>(&self, db: &PgPool) -> Result<Vec<T>, ApiError>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let offset = self.params.offset()?;
        if self.params.page.is_some() {
            let mut qb = QueryBuilder::new(self.count_base);
            for filter in self.all_filters() {
                push_filter(&mut qb, filter);
            }
            let total: i64 = qb.build_query_scalar().fetch_one(db).await?;
            ensure_page_exists(offset, total)?;
        }

        let mut qb = QueryBuilder::new(self.select_base);
        for filter in self.all_filters() {
            push_filter(&mut qb, filter);
        }
        push_sort(&mut qb, &self.params.sort);
        push_pagination(&mut qb, self.params.limit, offset);

        Ok(qb.build_query_as::<T>().fetch_all(db).await?)
    }
}

/// Inclusion projection over already-serialized rows. `id` survives any
/// projection, matching how clients expect to follow up on list results.
pub fn project(value: serde_json::Value, fields: &Option<Vec<String>>) -> serde_json::Value {
    let Some(fields) = fields else {
        return value;
    };
    match value {
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(|item| project(item, &Some(fields.clone())))
                .collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(key, _)| key == "id" || fields.iter().any(|f| f == key))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: FilterSchema = FilterSchema {
        columns: &[
            ("name", ColumnKind::Text),
            ("price", ColumnKind::Numeric),
            ("difficulty", ColumnKind::Text),
            ("ratings_average", ColumnKind::Numeric),
            ("created_at", ColumnKind::Timestamp),
        ],
    };

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn comparison_suffix_becomes_operator_not_equality() {
        let params = ListParams::parse(&raw(&[("price[gte]", "100")]), &SCHEMA).unwrap();
        assert_eq!(
            params.filters,
            vec![Filter {
                column: "price",
                op: CmpOp::Gte,
                value: FilterValue::Numeric(100.0),
            }]
        );
    }

    #[test]
    fn comparison_filter_reaches_sql_as_operator() {
        let params = ListParams::parse(&raw(&[("price[gte]", "100")]), &SCHEMA).unwrap();
        let query = ListQuery::new(
            "SELECT * FROM tours WHERE secret = FALSE",
            "SELECT COUNT(*) FROM tours WHERE secret = FALSE",
            &params,
        );
        let mut qb = QueryBuilder::<Postgres>::new(query.select_base);
        for filter in query.all_filters() {
            push_filter(&mut qb, filter);
        }
        let sql = qb.into_sql();
        assert!(sql.contains("price >= $1"), "got: {sql}");
        assert!(!sql.contains("gte"));
    }

    #[test]
    fn reserved_keys_are_not_filters() {
        let params = ListParams::parse(
            &raw(&[("page", "2"), ("limit", "10"), ("sort", "price"), ("fields", "name")]),
            &SCHEMA,
        )
        .unwrap();
        assert!(params.filters.is_empty());
        assert_eq!(params.page, Some(2));
        assert_eq!(params.limit, 10);
        assert_eq!(params.offset().unwrap(), 10);
    }

    #[test]
    fn unknown_filter_field_is_rejected() {
        let err = ListParams::parse(&raw(&[("password_hash", "x")]), &SCHEMA).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn unsupported_operator_is_rejected() {
        let err = ListParams::parse(&raw(&[("price[like]", "1")]), &SCHEMA).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn sort_parses_direction_and_order() {
        let params =
            ListParams::parse(&raw(&[("sort", "-ratings_average,price")]), &SCHEMA).unwrap();
        assert_eq!(
            params.sort,
            vec![
                SortKey {
                    column: "ratings_average",
                    descending: true
                },
                SortKey {
                    column: "price",
                    descending: false
                },
            ]
        );
    }

    #[test]
    fn default_sort_is_newest_first() {
        let params = ListParams::parse(&raw(&[]), &SCHEMA).unwrap();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 WHERE TRUE");
        push_sort(&mut qb, &params.sort);
        assert!(qb.into_sql().ends_with("ORDER BY created_at DESC"));
    }

    #[test]
    fn defaults_when_no_pagination_given() {
        let params = ListParams::parse(&raw(&[]), &SCHEMA).unwrap();
        assert_eq!(params.page, None);
        assert_eq!(params.limit, 100);
        assert_eq!(params.offset().unwrap(), 0);
    }

    #[test]
    fn invalid_page_is_rejected() {
        let err = ListParams::parse(&raw(&[("page", "0")]), &SCHEMA).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn overflowing_page_is_out_of_range_not_a_panic() {
        // page * limit would wrap i64; any such page is past the data anyway.
        let params =
            ListParams::parse(&raw(&[("page", "4611686018427387904"), ("limit", "4")]), &SCHEMA)
                .unwrap();
        assert!(matches!(params.offset(), Err(ApiError::PageOutOfRange)));
    }

    #[test]
    fn page_past_the_row_count_does_not_exist() {
        assert!(ensure_page_exists(0, 1).is_ok());
        assert!(ensure_page_exists(9, 10).is_ok());
        assert!(matches!(
            ensure_page_exists(10, 10),
            Err(ApiError::PageOutOfRange)
        ));
        assert!(matches!(
            ensure_page_exists(50, 10),
            Err(ApiError::PageOutOfRange)
        ));
    }

    #[test]
    fn projection_keeps_requested_fields_and_id() {
        let rows = json!([
            { "id": "a", "name": "Forest Hiker", "price": 397.0, "summary": "..." },
            { "id": "b", "name": "Sea Explorer", "price": 497.0, "summary": "..." }
        ]);
        let projected = project(rows, &Some(vec!["name".into(), "price".into()]));
        assert_eq!(
            projected,
            json!([
                { "id": "a", "name": "Forest Hiker", "price": 397.0 },
                { "id": "b", "name": "Sea Explorer", "price": 497.0 }
            ])
        );
    }

    #[test]
    fn no_projection_returns_value_unchanged() {
        let row = json!({ "id": "a", "name": "Forest Hiker" });
        assert_eq!(project(row.clone(), &None), row);
    }
}
