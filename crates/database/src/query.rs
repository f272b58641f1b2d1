use std::{cmp::Ordering, str::FromStr};

use mongodb::bson::{doc, Bson, Document as BsonDocument};
use serde::Deserialize;

use crate::{PopulateSpec, RepositoryError};

/// A query against one model, accumulated through chained calls and
/// resolved by [`Model::count`](crate::Model::count) or
/// [`Model::fetch`](crate::Model::fetch).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filter: BsonDocument,
    multiple: bool,
    projection: Option<Projection>,
    limit: Option<i64>,
    skip: Option<u64>,
    populate: Vec<PopulateSpec>,
    sort: Option<Sort>,
}

impl Query {
    /// Query resolving to every matching document.
    pub fn many(filter: BsonDocument) -> Self {
        Self {
            filter,
            multiple: true,
            ..Default::default()
        }
    }

    /// Query resolving to at most one document.
    pub fn one(filter: BsonDocument) -> Self {
        Self {
            filter,
            multiple: false,
            ..Default::default()
        }
    }

    pub fn select(&mut self, projection: Projection) -> &mut Self {
        self.projection = Some(projection);
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.skip = Some(skip);
        self
    }

    /// Adds one reference expansion. Expansions run in the order they were added.
    pub fn populate(&mut self, spec: PopulateSpec) -> &mut Self {
        self.populate.push(spec);
        self
    }

    pub fn sort(&mut self, sort: Sort) -> &mut Self {
        self.sort = Some(sort);
        self
    }

    pub fn filter(&self) -> &BsonDocument {
        &self.filter
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    pub fn selection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    pub fn max_results(&self) -> Option<i64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.skip
    }

    pub fn expansions(&self) -> &[PopulateSpec] {
        &self.populate
    }

    pub fn ordering(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }

    /// Top-level paths replaced by the expansions of this query.
    pub fn expanded_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for spec in &self.populate {
            for path in spec.paths() {
                if !paths.iter().any(|p| p == path) {
                    paths.push(path.to_owned());
                }
            }
        }
        paths
    }
}

/// Field projection: either a list of paths to keep or a list to drop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Projection {
    Include { paths: Vec<String>, with_id: bool },
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Include {
            paths: paths.into_iter().map(Into::into).collect(),
            with_id: true,
        }
    }

    pub fn exclude<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(paths.into_iter().map(Into::into).collect())
    }

    /// Projection document as understood by MongoDB.
    pub fn to_document(&self) -> BsonDocument {
        let mut projection = BsonDocument::new();
        match self {
            Projection::Include { paths, with_id } => {
                for path in paths {
                    projection.insert(path.as_str(), 1);
                }
                if !with_id {
                    projection.insert("_id", 0);
                }
            }
            Projection::Exclude(paths) => {
                for path in paths {
                    projection.insert(path.as_str(), 0);
                }
            }
        }
        projection
    }

    /// Applies the projection to top-level fields of `row`.
    pub fn apply(&self, row: &BsonDocument) -> BsonDocument {
        match self {
            Projection::Include { paths, with_id } => row
                .iter()
                .filter(|(key, _)| {
                    (*with_id && key.as_str() == "_id") || paths.iter().any(|p| p == *key)
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            Projection::Exclude(paths) => row
                .iter()
                .filter(|(key, _)| !paths.iter().any(|p| p == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

impl FromStr for Projection {
    type Err = RepositoryError;

    /// Parses a select string such as `"name age"`, `"-secret -token"` or `"name -_id"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut included = Vec::new();
        let mut excluded = Vec::new();

        for token in s.split_whitespace() {
            match token.strip_prefix('-') {
                Some(path) if !path.is_empty() => excluded.push(path.to_owned()),
                Some(_) => return Err(RepositoryError::InvalidProjection(s.to_owned())),
                None => included.push(token.trim_start_matches('+').to_owned()),
            }
        }

        if included.is_empty() && excluded.is_empty() {
            return Err(RepositoryError::InvalidProjection("empty selection".into()));
        }

        if included.is_empty() {
            return Ok(Projection::Exclude(excluded));
        }

        let without_id = excluded.iter().any(|path| path == "_id");
        if excluded.iter().any(|path| path != "_id") {
            return Err(RepositoryError::InvalidProjection(format!(
                "cannot mix inclusion and exclusion in `{s}`"
            )));
        }

        Ok(Projection::Include {
            paths: included,
            with_id: !without_id,
        })
    }
}

impl TryFrom<String> for Projection {
    type Error = RepositoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn direction(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Ordered list of sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Bson")]
pub struct Sort(Vec<(String, SortOrder)>);

impl Sort {
    pub fn new() -> Self {
        Sort(Vec::new())
    }

    pub fn asc(mut self, path: impl Into<String>) -> Self {
        self.0.push((path.into(), SortOrder::Ascending));
        self
    }

    pub fn desc(mut self, path: impl Into<String>) -> Self {
        self.0.push((path.into(), SortOrder::Descending));
        self
    }

    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.0
    }

    pub fn to_document(&self) -> BsonDocument {
        self.0
            .iter()
            .map(|(path, order)| (path.clone(), Bson::Int32(order.direction())))
            .collect()
    }

    /// Compares two rows key by key.
    pub fn compare(&self, a: &BsonDocument, b: &BsonDocument) -> Ordering {
        for (path, order) in &self.0 {
            let ordering = compare_bson(a.get(path), b.get(path));
            let ordering = match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Default for Sort {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Sort {
    type Err = RepositoryError;

    /// Parses `"name -age"`: a leading `-` sorts descending.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut sort = Sort::new();
        for token in s.split_whitespace() {
            sort = match token.strip_prefix('-') {
                Some("") => return Err(RepositoryError::InvalidSort(s.to_owned())),
                Some(path) => sort.desc(path),
                None => sort.asc(token.trim_start_matches('+')),
            };
        }

        if sort.0.is_empty() {
            return Err(RepositoryError::InvalidSort("empty sort".into()));
        }
        Ok(sort)
    }
}

impl TryFrom<BsonDocument> for Sort {
    type Error = RepositoryError;

    fn try_from(value: BsonDocument) -> Result<Self, Self::Error> {
        let mut sort = Sort::new();
        for (path, direction) in value {
            let order = match &direction {
                Bson::Int32(1) | Bson::Int64(1) => SortOrder::Ascending,
                Bson::Int32(-1) | Bson::Int64(-1) => SortOrder::Descending,
                Bson::Double(d) if *d == 1.0 => SortOrder::Ascending,
                Bson::Double(d) if *d == -1.0 => SortOrder::Descending,
                Bson::String(s) => match s.to_ascii_lowercase().as_str() {
                    "asc" | "ascending" => SortOrder::Ascending,
                    "desc" | "descending" => SortOrder::Descending,
                    _ => return Err(RepositoryError::InvalidSort(format!("{path}: {s}"))),
                },
                other => return Err(RepositoryError::InvalidSort(format!("{path}: {other}"))),
            };
            sort.0.push((path, order));
        }
        Ok(sort)
    }
}

impl TryFrom<Bson> for Sort {
    type Error = RepositoryError;

    fn try_from(value: Bson) -> Result<Self, Self::Error> {
        match value {
            Bson::String(s) => s.parse(),
            Bson::Document(d) => d.try_into(),
            other => Err(RepositoryError::InvalidSort(other.to_string())),
        }
    }
}

/// Canonical type rank used when values of different types are compared.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_) | Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Orders two optional values the way a document store sorts mixed types.
pub fn compare_bson(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Some(Bson::String(x)), Some(Bson::String(y))) => x.cmp(y),
        (Some(Bson::ObjectId(x)), Some(Bson::ObjectId(y))) => x.cmp(y),
        (Some(Bson::Boolean(x)), Some(Bson::Boolean(y))) => x.cmp(y),
        (Some(Bson::DateTime(x)), Some(Bson::DateTime(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (as_f64(x), as_f64(y)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        _ => Ordering::Equal,
    }
}

/// Shorthand for an `_id` equality filter.
pub(crate) fn id_filter(id: &Bson) -> BsonDocument {
    doc! { "_id": id.clone() }
}
