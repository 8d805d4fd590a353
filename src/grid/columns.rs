//! Static, position-indexed column allow-lists. Grid requests address
//! columns by index only; the SQL expression always comes from here.

use super::params::SortDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Substring search.
    Text,
    /// Substring search against the textual form of the number.
    Integer,
    /// `is_active`-style flag, searched by keyword sniffing.
    Boolean,
    /// Enumerated text, searched by exact (case-insensitive) match.
    Status,
    /// Rendered controls; never searched or sorted.
    Actions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridColumn {
    pub title: &'static str,
    pub expr: &'static str,
    pub kind: ColumnKind,
    pub searchable: bool,
    pub sortable: bool,
}

impl GridColumn {
    pub const fn text(title: &'static str, expr: &'static str) -> Self {
        Self {
            title,
            expr,
            kind: ColumnKind::Text,
            searchable: true,
            sortable: true,
        }
    }

    pub const fn integer(title: &'static str, expr: &'static str) -> Self {
        Self {
            title,
            expr,
            kind: ColumnKind::Integer,
            searchable: true,
            sortable: true,
        }
    }

    pub const fn boolean(title: &'static str, expr: &'static str) -> Self {
        Self {
            title,
            expr,
            kind: ColumnKind::Boolean,
            searchable: true,
            sortable: true,
        }
    }

    pub const fn status(title: &'static str, expr: &'static str) -> Self {
        Self {
            title,
            expr,
            kind: ColumnKind::Status,
            searchable: true,
            sortable: true,
        }
    }

    pub const fn actions() -> Self {
        Self {
            title: "Actions",
            expr: "",
            kind: ColumnKind::Actions,
            searchable: false,
            sortable: false,
        }
    }

    /// Sortable, but left out of global and per-column search.
    pub const fn unsearchable(self) -> Self {
        Self {
            searchable: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Foreign-key style equality; values that don't parse are ignored.
    Integer,
    /// Exact, case-insensitive text equality.
    Status,
    /// Active/inactive keyword sniffing.
    Boolean,
}

/// A named query parameter, outside the grid protocol, that narrows one
/// endpoint (e.g. `term_fk` on enrollments).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityFilter {
    pub param: &'static str,
    pub expr: &'static str,
    pub kind: FilterKind,
}

impl EntityFilter {
    pub const fn integer(param: &'static str, expr: &'static str) -> Self {
        Self {
            param,
            expr,
            kind: FilterKind::Integer,
        }
    }

    pub const fn status(param: &'static str, expr: &'static str) -> Self {
        Self {
            param,
            expr,
            kind: FilterKind::Status,
        }
    }

    pub const fn boolean(param: &'static str, expr: &'static str) -> Self {
        Self {
            param,
            expr,
            kind: FilterKind::Boolean,
        }
    }
}

/// The fixed shape of one grid endpoint.
#[derive(Debug, Clone, Copy)]
pub struct GridSpec {
    pub name: &'static str,
    /// FROM clause including joins, without the keyword.
    pub from: &'static str,
    /// Select list, without the keyword. Aliases must match the row struct.
    pub select: &'static str,
    /// Unique key appended to every ORDER BY so paging is stable.
    pub key: &'static str,
    pub columns: &'static [GridColumn],
    pub filters: &'static [EntityFilter],
    pub default_sort: usize,
    pub default_dir: SortDirection,
}

impl GridSpec {
    pub fn sortable_column(&self, index: usize) -> Option<&GridColumn> {
        self.columns.get(index).filter(|c| c.sortable && !c.expr.is_empty())
    }

    pub fn titles(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.title).collect()
    }
}
