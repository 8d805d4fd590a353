use super::columns::{ColumnKind, EntityFilter, FilterKind, GridColumn};
use super::params::GridParams;

/// A positional bind value with its type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl SqlParam {
    pub fn type_tag(&self) -> &'static str {
        match self {
            SqlParam::Text(_) => "text",
            SqlParam::Integer(_) => "integer",
            SqlParam::Bool(_) => "bool",
        }
    }
}

/// An AND-ed list of parameterized clauses. Clause text only ever contains
/// allow-listed column expressions and `?` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<String>,
    params: Vec<SqlParam>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn push(&mut self, clause: String, params: impl IntoIterator<Item = SqlParam>) {
        self.clauses.push(clause);
        self.params.extend(params);
    }

    /// ` WHERE a AND b`, or an empty string when there is nothing to filter.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

/// Escapes LIKE wildcards so user text always matches literally.
pub fn like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('%');
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Keyword sniffing for active/inactive flags: anything mentioning
/// "inactive" selects false rows, any other non-empty value selects true rows.
pub fn sniff_active(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(!value.to_lowercase().contains("inactive"))
    }
}

fn like_clause(column: &GridColumn) -> String {
    match column.kind {
        ColumnKind::Integer => format!("CAST({} AS TEXT) LIKE ? ESCAPE '\\'", column.expr),
        _ => format!("{} LIKE ? ESCAPE '\\'", column.expr),
    }
}

fn column_clause(column: &GridColumn, value: &str) -> Option<(String, SqlParam)> {
    match column.kind {
        ColumnKind::Text | ColumnKind::Integer => {
            Some((like_clause(column), SqlParam::Text(like_pattern(value))))
        }
        ColumnKind::Boolean => {
            sniff_active(value).map(|flag| (format!("{} = ?", column.expr), SqlParam::Bool(flag)))
        }
        ColumnKind::Status => Some((
            format!("LOWER({}) = ?", column.expr),
            SqlParam::Text(value.trim().to_lowercase()),
        )),
        ColumnKind::Actions => None,
    }
}

fn filter_clause(filter: &EntityFilter, value: &str) -> Option<(String, SqlParam)> {
    match filter.kind {
        FilterKind::Integer => value
            .trim()
            .parse::<i64>()
            .ok()
            .map(|id| (format!("{} = ?", filter.expr), SqlParam::Integer(id))),
        FilterKind::Status => Some((
            format!("LOWER({}) = ?", filter.expr),
            SqlParam::Text(value.trim().to_lowercase()),
        )),
        FilterKind::Boolean => {
            sniff_active(value).map(|flag| (format!("{} = ?", filter.expr), SqlParam::Bool(flag)))
        }
    }
}

/// Builds the filter for one grid request: global search over every
/// searchable text-like column, then per-column searches, then the
/// endpoint's own named filters.
pub fn build_predicate(
    columns: &[GridColumn],
    filters: &[EntityFilter],
    params: &GridParams,
) -> Predicate {
    let mut predicate = Predicate::new();

    if !params.search.is_empty() {
        let targets: Vec<&GridColumn> = columns
            .iter()
            .filter(|c| c.searchable && matches!(c.kind, ColumnKind::Text | ColumnKind::Integer))
            .collect();

        if !targets.is_empty() {
            let pattern = like_pattern(&params.search);
            let clause = targets
                .iter()
                .map(|c| like_clause(c))
                .collect::<Vec<_>>()
                .join(" OR ");
            predicate.push(
                format!("({})", clause),
                targets.iter().map(|_| SqlParam::Text(pattern.clone())),
            );
        }
    }

    for (index, value) in &params.column_search {
        let Some(column) = columns.get(*index).filter(|c| c.searchable) else {
            continue;
        };
        if let Some((clause, param)) = column_clause(column, value) {
            predicate.push(clause, [param]);
        }
    }

    for filter in filters {
        if let Some((clause, param)) = params
            .filter(filter.param)
            .and_then(|value| filter_clause(filter, value))
        {
            predicate.push(clause, [param]);
        }
    }

    predicate
}
