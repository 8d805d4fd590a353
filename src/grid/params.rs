use std::collections::{BTreeMap, HashMap};

use rocket::Request;
use rocket::request::{FromRequest, Outcome};
use serde::Serialize;

use crate::config::AppConfig;

pub const DEFAULT_PAGE_LENGTH: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Anything other than `desc` sorts ascending.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRequest {
    /// `None` when the client sent something that isn't a column index.
    pub column: Option<usize>,
    pub dir: SortDirection,
}

/// Normalized grid request. Built from the raw query string; malformed
/// values fall back to defaults instead of failing the request.
#[derive(Debug, Clone, PartialEq)]
pub struct GridParams {
    pub draw: i64,
    pub start: i64,
    /// `None` means every row (`length=-1`).
    pub length: Option<i64>,
    pub order: Option<OrderRequest>,
    pub search: String,
    pub column_search: BTreeMap<usize, String>,
    pub filters: HashMap<String, String>,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            draw: 0,
            start: 0,
            length: Some(DEFAULT_PAGE_LENGTH),
            order: None,
            search: String::new(),
            column_search: BTreeMap::new(),
            filters: HashMap::new(),
        }
    }
}

/// Splits `columns[3][search][value]` into `("columns", ["3", "search", "value"])`.
fn split_key(key: &str) -> (&str, Vec<&str>) {
    match key.find('[') {
        Some(pos) => {
            let head = &key[..pos];
            let parts = key[pos..]
                .split(']')
                .filter_map(|part| part.strip_prefix('['))
                .collect();
            (head, parts)
        }
        None => (key, Vec::new()),
    }
}

impl GridParams {
    pub fn from_pairs<'a, I>(pairs: I, max_length: i64) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = GridParams::default();
        let mut order_column: Option<&str> = None;
        let mut order_dir: Option<&str> = None;

        for (key, value) in pairs {
            let (head, parts) = split_key(key);
            match (head, parts.as_slice()) {
                ("draw", []) => params.draw = value.trim().parse().unwrap_or(0),
                ("start", []) => params.start = value.trim().parse::<i64>().unwrap_or(0).max(0),
                ("length", []) => {
                    params.length = match value.trim().parse::<i64>() {
                        Ok(-1) => None,
                        Ok(n) if n > 0 => Some(n),
                        _ => Some(DEFAULT_PAGE_LENGTH),
                    }
                }
                ("search", ["value"]) => params.search = value.trim().to_string(),
                ("order", ["0", "column"]) => order_column = Some(value),
                ("order", ["0", "dir"]) => order_dir = Some(value),
                ("columns", [index, "search", "value"]) => {
                    let value = value.trim();
                    if let (Ok(index), false) = (index.parse::<usize>(), value.is_empty()) {
                        params.column_search.insert(index, value.to_string());
                    }
                }
                (_, []) if head != "_" => {
                    let value = value.trim();
                    if !value.is_empty() {
                        params.filters.insert(head.to_string(), value.to_string());
                    }
                }
                _ => {}
            }
        }

        if let Some(column) = order_column {
            params.order = Some(OrderRequest {
                column: column.trim().parse::<usize>().ok(),
                dir: SortDirection::parse(order_dir.unwrap_or("asc")),
            });
        }

        if max_length > 0 {
            params.length = params.length.map(|len| len.min(max_length));
        }

        params
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for GridParams {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let max_length = request
            .rocket()
            .state::<AppConfig>()
            .map(|config| config.max_page_length)
            .unwrap_or_else(|| AppConfig::default().max_page_length);

        let params = match request.uri().query() {
            Some(query) => GridParams::from_pairs(query.segments(), max_length),
            None => GridParams::default(),
        };

        Outcome::Success(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &[(&str, &str)]) -> GridParams {
        GridParams::from_pairs(query.iter().copied(), 500)
    }

    #[test]
    fn missing_parameters_use_defaults() {
        let params = parse(&[]);
        assert_eq!(params, GridParams::default());
        assert_eq!(params.length, Some(DEFAULT_PAGE_LENGTH));
    }

    #[test]
    fn reads_datatables_parameters() {
        let params = parse(&[
            ("draw", "7"),
            ("start", "20"),
            ("length", "25"),
            ("search[value]", "  smith "),
            ("search[regex]", "false"),
            ("order[0][column]", "2"),
            ("order[0][dir]", "DESC"),
            ("columns[1][search][value]", "inactive"),
            ("columns[2][search][value]", ""),
            ("columns[1][data]", "1"),
            ("term_fk", "4"),
            ("_", "1700000000"),
        ]);

        assert_eq!(params.draw, 7);
        assert_eq!(params.start, 20);
        assert_eq!(params.length, Some(25));
        assert_eq!(params.search, "smith");
        assert_eq!(
            params.order,
            Some(OrderRequest {
                column: Some(2),
                dir: SortDirection::Desc
            })
        );
        assert_eq!(params.column_search.len(), 1);
        assert_eq!(params.column_search.get(&1).map(String::as_str), Some("inactive"));
        assert_eq!(params.filter("term_fk"), Some("4"));
        assert_eq!(params.filter("_"), None);
    }

    #[test]
    fn malformed_values_are_defaulted() {
        let params = parse(&[
            ("draw", "abc"),
            ("start", "-5"),
            ("length", "zero"),
            ("order[0][column]", "name"),
            ("order[0][dir]", "sideways"),
        ]);

        assert_eq!(params.draw, 0);
        assert_eq!(params.start, 0);
        assert_eq!(params.length, Some(DEFAULT_PAGE_LENGTH));
        assert_eq!(
            params.order,
            Some(OrderRequest {
                column: None,
                dir: SortDirection::Asc
            })
        );
    }

    #[test]
    fn length_minus_one_means_all_and_is_not_capped() {
        assert_eq!(parse(&[("length", "-1")]).length, None);
        assert_eq!(parse(&[("length", "10000")]).length, Some(500));
    }

    #[test]
    fn split_key_handles_nested_brackets() {
        assert_eq!(split_key("draw"), ("draw", vec![]));
        assert_eq!(
            split_key("columns[3][search][value]"),
            ("columns", vec!["3", "search", "value"])
        );
    }
}
