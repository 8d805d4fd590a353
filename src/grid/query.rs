use sqlx::Sqlite;
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::sqlite::SqliteArguments;

use super::columns::GridSpec;
use super::params::{GridParams, SortDirection};
use super::predicate::{SqlParam, build_predicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: usize,
    pub expr: &'static str,
    pub dir: SortDirection,
}

/// Resolves the requested ordering against the allow-list. Anything out of
/// range or pointing at a non-sortable column gets the endpoint default.
pub fn resolve_order(spec: &GridSpec, params: &GridParams) -> SortOrder {
    let requested = params.order.and_then(|order| {
        let index = order.column?;
        spec.sortable_column(index).map(|column| SortOrder {
            column: index,
            expr: column.expr,
            dir: order.dir,
        })
    });

    requested.unwrap_or_else(|| SortOrder {
        column: spec.default_sort,
        expr: spec
            .sortable_column(spec.default_sort)
            .map(|column| column.expr)
            .unwrap_or(spec.key),
        dir: spec.default_dir,
    })
}

/// The three statements one grid request runs, with their bind lists.
#[derive(Debug, Clone, PartialEq)]
pub struct GridQuery {
    pub total_sql: String,
    pub filtered_sql: String,
    pub select_sql: String,
    pub filter_params: Vec<SqlParam>,
    pub select_params: Vec<SqlParam>,
    pub order: SortOrder,
}

pub fn assemble(spec: &GridSpec, params: &GridParams) -> GridQuery {
    let predicate = build_predicate(spec.columns, spec.filters, params);
    let where_sql = predicate.where_sql();
    let order = resolve_order(spec, params);

    let total_sql = format!("SELECT COUNT(*) FROM {}", spec.from);
    let filtered_sql = format!("SELECT COUNT(*) FROM {}{}", spec.from, where_sql);
    let select_sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} {}, {} {} LIMIT ? OFFSET ?",
        spec.select,
        spec.from,
        where_sql,
        order.expr,
        order.dir.as_sql(),
        spec.key,
        order.dir.as_sql(),
    );

    let filter_params = predicate.into_params();
    let mut select_params = filter_params.clone();
    // SQLite treats a negative LIMIT as "no limit".
    select_params.push(SqlParam::Integer(params.length.unwrap_or(-1)));
    select_params.push(SqlParam::Integer(params.start));

    GridQuery {
        total_sql,
        filtered_sql,
        select_sql,
        filter_params,
        select_params,
        order,
    }
}

pub fn bind_scalar<'q, O>(
    mut query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> QueryScalar<'q, Sqlite, O, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.as_str()),
            SqlParam::Integer(value) => query.bind(*value),
            SqlParam::Bool(value) => query.bind(*value),
        };
    }
    query
}

pub fn bind_rows<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.as_str()),
            SqlParam::Integer(value) => query.bind(*value),
            SqlParam::Bool(value) => query.bind(*value),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::columns::{EntityFilter, GridColumn};
    use crate::grid::params::OrderRequest;

    const SPEC: GridSpec = GridSpec {
        name: "things",
        from: "things t",
        select: "t.id, t.name, t.is_active",
        key: "t.id",
        columns: &[
            GridColumn::integer("ID", "t.id"),
            GridColumn::text("Name", "t.name"),
            GridColumn::boolean("Status", "t.is_active"),
            GridColumn::actions(),
        ],
        filters: &[EntityFilter::boolean("active", "t.is_active")],
        default_sort: 1,
        default_dir: SortDirection::Asc,
    };

    fn ordered(column: Option<usize>, dir: SortDirection) -> GridParams {
        GridParams {
            order: Some(OrderRequest { column, dir }),
            ..GridParams::default()
        }
    }

    #[test]
    fn requested_sortable_column_is_used() {
        let order = resolve_order(&SPEC, &ordered(Some(0), SortDirection::Desc));
        assert_eq!(order.expr, "t.id");
        assert_eq!(order.dir, SortDirection::Desc);
    }

    #[test]
    fn out_of_range_or_actions_column_falls_back_to_default() {
        for column in [Some(3), Some(42), None] {
            let order = resolve_order(&SPEC, &ordered(column, SortDirection::Desc));
            assert_eq!(order.column, 1);
            assert_eq!(order.expr, "t.name");
            assert_eq!(order.dir, SortDirection::Asc);
        }
    }

    #[test]
    fn unfiltered_query_has_no_where_and_binds_paging() {
        let query = assemble(&SPEC, &GridParams::default());

        assert_eq!(query.total_sql, "SELECT COUNT(*) FROM things t");
        assert_eq!(query.filtered_sql, "SELECT COUNT(*) FROM things t");
        assert_eq!(
            query.select_sql,
            "SELECT t.id, t.name, t.is_active FROM things t ORDER BY t.name ASC, t.id ASC LIMIT ? OFFSET ?"
        );
        assert!(query.filter_params.is_empty());
        assert_eq!(
            query.select_params,
            vec![SqlParam::Integer(10), SqlParam::Integer(0)]
        );
    }

    #[test]
    fn filter_applies_to_filtered_count_and_select_only() {
        let mut params = GridParams {
            search: "ab".to_string(),
            start: 20,
            length: None,
            ..GridParams::default()
        };
        params.filters.insert("active".to_string(), "active".to_string());

        let query = assemble(&SPEC, &params);

        assert_eq!(query.total_sql, "SELECT COUNT(*) FROM things t");
        assert!(query.filtered_sql.ends_with("AND t.is_active = ?"));
        assert_eq!(query.filter_params.len(), 3);
        assert_eq!(
            &query.select_params[3..],
            &[SqlParam::Integer(-1), SqlParam::Integer(20)]
        );
    }
}
