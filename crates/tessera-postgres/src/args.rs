//! Request argument parsing.
//!
//! Turns the JSON:API query-string vocabulary (`include`, `fields[type]`,
//! `sort`, `page[size]`, `page[number]`, `filter[...]`, `search`) into an
//! immutable [`RequestArguments`]. Member names are normalized to snake case,
//! so `article-count` and `articleCount` both address `article_count`.

use std::collections::{BTreeMap, HashMap, HashSet};

use heck::ToSnakeCase;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::FilterOp;
use crate::{Result, TesseraError};

static FILTER_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^filter\[([A-Za-z0-9_\-]+)((?:\.[A-Za-z0-9_\-]+)*)(?::([a-z]+))?\]$")
        .expect("valid filter key pattern")
});

static FIELDS_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^fields\[([A-Za-z0-9_\-]+)\]$").expect("valid fields key pattern"));

/// Nested relationship names to side-load: `a.b,a.c` is `{a: {b: {}, c: {}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeTree(BTreeMap<String, IncludeTree>);

impl IncludeTree {
    pub fn get(&self, name: &str) -> Option<&IncludeTree> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert_path<'a>(&mut self, mut segments: impl Iterator<Item = &'a str>) {
        if let Some(head) = segments.next() {
            self.0
                .entry(normalize(head))
                .or_default()
                .insert_path(segments);
        }
    }
}

/// One `sort` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field name, preceded by to-one relationship names for dot paths.
    pub path: Vec<String>,
    pub descending: bool,
}

impl SortSpec {
    /// First path segment: the field (or relationship) on the sorted model.
    pub fn field(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or_default()
    }
}

/// One `filter[field.path:op]=value` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub field: String,
    /// Nested attribute path below `field`, empty for a direct attribute.
    pub path: Vec<String>,
    pub op: Option<FilterOp>,
    pub value: String,
    key: String,
}

impl FilterSpec {
    /// The original query-string key, used in error reports.
    pub fn parameter(&self) -> &str {
        &self.key
    }
}

/// Parsed, request-scoped arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestArguments {
    pub include: IncludeTree,
    /// Requested fieldsets per resource type; each set contains `id`.
    pub fields: HashMap<String, HashSet<String>>,
    pub sort: Vec<SortSpec>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub filters: Vec<FilterSpec>,
    pub search: Option<String>,
}

impl RequestArguments {
    /// Parses a raw query string such as `include=author&page[size]=10`.
    pub fn from_query_string(query: &str) -> Result<Self> {
        Self::parse(url::form_urlencoded::parse(query.as_bytes()))
    }

    /// Parses decoded key/value pairs. Unknown keys are ignored.
    pub fn parse<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut args = RequestArguments::default();
        let mut page_size = None;
        let mut page_number = None;

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "include" => args.include = parse_include(value),
                "sort" => args.sort = parse_sort(value),
                "search" => {
                    let term = value.trim();
                    args.search = (!term.is_empty()).then(|| term.to_string());
                }
                "page[size]" => page_size = Some(positive_integer(key, value)?),
                "page[number]" => page_number = Some(positive_integer(key, value)?),
                _ if key.starts_with("page[") => {
                    return Err(TesseraError::invalid_argument(
                        key,
                        "unsupported pagination parameter",
                    ));
                }
                _ if key.starts_with("filter[") => args.filters.push(parse_filter(key, value)?),
                _ if key.starts_with("fields[") => {
                    let captures = FIELDS_KEY.captures(key).ok_or_else(|| {
                        TesseraError::invalid_argument(key, "malformed fieldset parameter")
                    })?;
                    args.fields
                        .insert(captures[1].to_string(), parse_fieldset(value));
                }
                _ => {}
            }
        }

        match (page_size, page_number) {
            (Some(size), Some(number)) => {
                args.limit = Some(size);
                args.offset = Some((number - 1).checked_mul(size).ok_or_else(|| {
                    TesseraError::invalid_argument("page[number]", "page is out of range")
                })?);
            }
            (Some(size), None) => args.limit = Some(size),
            (None, Some(_)) => {
                return Err(TesseraError::invalid_argument(
                    "page[number]",
                    "page[number] requires page[size]",
                ))
            }
            (None, None) => {}
        }

        Ok(args)
    }

    /// Fieldset requested for a resource type, if any.
    pub fn fieldset(&self, type_name: &str) -> Option<&HashSet<String>> {
        self.fields.get(type_name)
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_snake_case()
}

fn parse_include(value: &str) -> IncludeTree {
    let mut tree = IncludeTree::default();
    for path in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        tree.insert_path(path.split('.'));
    }
    tree
}

fn parse_fieldset(value: &str) -> HashSet<String> {
    let mut fields: HashSet<String> = value
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(normalize)
        .collect();
    fields.insert("id".to_string());
    fields
}

fn parse_sort(value: &str) -> Vec<SortSpec> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|spec| {
            // '+' arrives as a space after form decoding
            let (descending, name) = match spec.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, spec.trim_start_matches('+')),
            };
            SortSpec {
                path: name.split('.').map(normalize).collect(),
                descending,
            }
        })
        .collect()
}

fn positive_integer(key: &str, value: &str) -> Result<i64> {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(TesseraError::invalid_argument(
            key,
            format!("'{}' must be an integer greater than zero", value),
        )),
    }
}

fn parse_filter(key: &str, value: &str) -> Result<FilterSpec> {
    let captures = FILTER_KEY
        .captures(key)
        .ok_or_else(|| TesseraError::invalid_argument(key, "malformed filter parameter"))?;

    let path = captures
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split('.')
        .filter(|s| !s.is_empty())
        .map(normalize)
        .collect();

    let op = match captures.get(3) {
        Some(m) => Some(FilterOp::parse(m.as_str()).ok_or_else(|| {
            TesseraError::invalid_argument(key, format!("unknown operator '{}'", m.as_str()))
        })?),
        None => None,
    };

    Ok(FilterSpec {
        field: normalize(&captures[1]),
        path,
        op,
        value: value.to_string(),
        key: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<RequestArguments> {
        RequestArguments::parse(pairs.iter().copied())
    }

    #[test]
    fn test_include_tree() {
        let args = parse(&[("include", "author,comments.author,comments.article-tags")]).unwrap();
        assert!(args.include.contains("author"));
        let comments = args.include.get("comments").unwrap();
        assert_eq!(comments.names().collect::<Vec<_>>(), vec!["article_tags", "author"]);
        assert!(args.include.get("author").unwrap().is_empty());
    }

    #[test]
    fn test_fieldsets_always_contain_id() {
        let args = parse(&[("fields[users]", "name,articleCount"), ("fields[tags]", "")]).unwrap();
        let users = args.fieldset("users").unwrap();
        assert!(users.contains("name"));
        assert!(users.contains("article_count"));
        assert!(users.contains("id"));
        assert_eq!(args.fieldset("tags").unwrap().len(), 1);
        assert!(args.fieldset("articles").is_none());
    }

    #[test]
    fn test_sort() {
        let args = parse(&[("sort", "-created-at,+name, author.name")]).unwrap();
        assert_eq!(
            args.sort,
            vec![
                SortSpec { path: vec!["created_at".to_string()], descending: true },
                SortSpec { path: vec!["name".to_string()], descending: false },
                SortSpec {
                    path: vec!["author".to_string(), "name".to_string()],
                    descending: false
                },
            ]
        );
    }

    #[test]
    fn test_sort_plus_from_query_string() {
        let args = RequestArguments::from_query_string("sort=+id").unwrap();
        assert_eq!(args.sort[0].field(), "id");
        assert!(!args.sort[0].descending);
    }

    #[test]
    fn test_pagination() {
        let args = parse(&[("page[size]", "3"), ("page[number]", "2")]).unwrap();
        assert_eq!(args.limit, Some(3));
        assert_eq!(args.offset, Some(3));

        let args = parse(&[("page[size]", "10")]).unwrap();
        assert_eq!(args.limit, Some(10));
        assert_eq!(args.offset, None);
    }

    #[test]
    fn test_pagination_errors() {
        for pairs in [
            vec![("page[size]", "0")],
            vec![("page[size]", "-1")],
            vec![("page[size]", "ten")],
            vec![("page[number]", "2")],
            vec![("page[size]", "5"), ("page[number]", "0")],
            vec![("page[offset]", "5")],
        ] {
            let err = parse(&pairs).unwrap_err();
            assert!(matches!(err, TesseraError::InvalidArgument { .. }), "{:?}", pairs);
        }
    }

    #[test]
    fn test_filters() {
        let args = parse(&[
            ("filter[id]", "<4,6"),
            ("filter[author.first-name:ne]", "Ann"),
            ("filter[published:eq]", "t"),
        ])
        .unwrap();
        assert_eq!(args.filters.len(), 3);

        let id = &args.filters[0];
        assert_eq!(id.field, "id");
        assert!(id.path.is_empty());
        assert_eq!(id.op, None);
        assert_eq!(id.value, "<4,6");

        let author = &args.filters[1];
        assert_eq!(author.field, "author");
        assert_eq!(author.path, vec!["first_name".to_string()]);
        assert_eq!(author.op, Some(FilterOp::Ne));
        assert_eq!(author.parameter(), "filter[author.first-name:ne]");
    }

    #[test]
    fn test_malformed_filters() {
        for key in ["filter[]", "filter[id", "filter[id:]", "filter[id:like]", "filter[a..b]"] {
            let err = parse(&[(key, "1")]).unwrap_err();
            match err {
                TesseraError::InvalidArgument { parameter, .. } => assert_eq!(parameter, key),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_search_and_unknown_keys() {
        let args = parse(&[("search", " rust "), ("utm_source", "feed")]).unwrap();
        assert_eq!(args.search.as_deref(), Some("rust"));
        assert!(!args.has_filters());
    }
}
