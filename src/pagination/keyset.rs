//! Keyset Query Planner
//!
//! Builds the "strictly after the cursor" predicate for an N-field sort with a
//! unique tie-break, the matching ordering, and the `limit + 1` fetch size,
//! then cuts the fetched rows into a [`Page`].
//!
//! For fields `c1..cN` the predicate is the disjunction over `i` of
//! `c1 = v1 AND .. AND c(i-1) = v(i-1) AND ci beyond vi`, where "beyond" is
//! `<` for a descending field and `>` for an ascending one.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PaginationError;
use crate::pagination::{Cursor, Page};

// == Sort Value ==
/// One component of a sort tuple.
///
/// Values are totally ordered: numbers before text, integers and floats
/// compared numerically. An integer and a float are compared exactly, even
/// beyond 2^53, and `-0.0` equals `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl SortValue {
    pub fn is_finite(&self) -> bool {
        match self {
            SortValue::Float(f) => f.is_finite(),
            _ => true,
        }
    }

    /// Same value with `-0.0` folded into `0.0`.
    pub fn normalized(self) -> Self {
        match self {
            SortValue::Float(f) if f == 0.0 => SortValue::Float(0.0),
            other => other,
        }
    }

    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Int(a), SortValue::Int(b)) => a.cmp(b),
            (SortValue::Int(a), SortValue::Float(b)) => cmp_int_float(*a, *b),
            (SortValue::Float(a), SortValue::Int(b)) => cmp_int_float(*b, *a).reverse(),
            // Adding 0.0 turns -0.0 into 0.0
            (SortValue::Float(a), SortValue::Float(b)) => (a + 0.0).total_cmp(&(b + 0.0)),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Text(_), _) => Ordering::Greater,
            (_, SortValue::Text(_)) => Ordering::Less,
        }
    }
}

/// Exact comparison of an integer with a float. NaN sorts last.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() || float >= TWO_POW_63 {
        return Ordering::Less;
    }
    if float < -TWO_POW_63 {
        return Ordering::Greater;
    }

    // In range, so the floor converts to i64 without rounding
    let floor = float.floor();
    match int.cmp(&(floor as i64)) {
        Ordering::Equal if float > floor => Ordering::Less,
        ordering => ordering,
    }
}

impl From<i64> for SortValue {
    fn from(value: i64) -> Self {
        SortValue::Int(value)
    }
}

impl From<f64> for SortValue {
    fn from(value: f64) -> Self {
        SortValue::Float(value)
    }
}

impl From<&str> for SortValue {
    fn from(value: &str) -> Self {
        SortValue::Text(value.to_string())
    }
}

impl From<String> for SortValue {
    fn from(value: String) -> Self {
        SortValue::Text(value)
    }
}

// == Direction ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Turns a natural ordering into this direction's ordering.
    pub fn apply(self, natural: Ordering) -> Ordering {
        match self {
            Direction::Asc => natural,
            Direction::Desc => natural.reverse(),
        }
    }

    /// Comparison that selects rows after a bound in this direction.
    pub fn beyond(self) -> Comparison {
        match self {
            Direction::Asc => Comparison::GreaterThan,
            Direction::Desc => Comparison::LessThan,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    LessThan,
    GreaterThan,
}

impl Comparison {
    fn holds(self, natural: Ordering) -> bool {
        match self {
            Comparison::LessThan => natural == Ordering::Less,
            Comparison::GreaterThan => natural == Ordering::Greater,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Comparison::LessThan => "<",
            Comparison::GreaterThan => ">",
        }
    }
}

// == Sort Field ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub name: String,
    pub direction: Direction,
}

impl SortField {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Desc,
        }
    }
}

/// Rows that can report the value of a named sort field.
pub trait SortKeyed {
    fn sort_value(&self, field: &str) -> Option<SortValue>;
}

impl<T: SortKeyed + ?Sized> SortKeyed for &T {
    fn sort_value(&self, field: &str) -> Option<SortValue> {
        (**self).sort_value(field)
    }
}

// == Sort Spec ==
/// An ordered list of sort fields ending in a tie-break field that is unique
/// per row, which makes the order total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    fields: Vec<SortField>,
}

impl SortSpec {
    pub fn new(mut fields: Vec<SortField>, tie_break: SortField) -> Self {
        fields.push(tie_break);
        Self { fields }
    }

    /// All fields, tie-break last.
    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn tie_break(&self) -> Option<&SortField> {
        self.fields.last()
    }

    /// Short hex digest of the field names and directions. Cursors carry it
    /// so a token is only ever read under the sort that produced it.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for field in &self.fields {
            hasher.update(field.name.as_bytes());
            hasher.update(match field.direction {
                Direction::Asc => b":asc;",
                Direction::Desc => b":dsc;",
            });
        }
        hasher.finalize()[..4]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Orders two sort tuples the way this spec orders rows.
    pub fn compare(&self, a: &[SortValue], b: &[SortValue]) -> Ordering {
        self.fields
            .iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(field, (x, y))| field.direction.apply(x.total_cmp(y)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Extracts a row's sort tuple in field order.
    pub fn tuple_of<R: SortKeyed + ?Sized>(&self, row: &R) -> Result<Vec<SortValue>, PaginationError> {
        self.fields
            .iter()
            .map(|field| {
                row.sort_value(&field.name)
                    .ok_or_else(|| PaginationError::MissingSortValue(field.name.clone()))
            })
            .collect()
    }
}

// == Keyset Predicate ==
/// "Strictly after `bound` in sort order", as a disjunction of branches.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetPredicate {
    fields: Vec<SortField>,
    bound: Vec<SortValue>,
}

impl KeysetPredicate {
    /// Whether a row's sort tuple satisfies the predicate. A tuple of the
    /// wrong length never does.
    pub fn matches(&self, tuple: &[SortValue]) -> bool {
        if tuple.len() != self.fields.len() {
            return false;
        }
        (0..self.fields.len()).any(|i| {
            let prefix_equal = (0..i).all(|j| tuple[j].total_cmp(&self.bound[j]).is_eq());
            prefix_equal
                && self.fields[i]
                    .direction
                    .beyond()
                    .holds(tuple[i].total_cmp(&self.bound[i]))
        })
    }

    /// Renders the predicate with `?` placeholders and its bound parameters
    /// in placeholder order.
    pub fn to_sql(&self) -> (String, Vec<SortValue>) {
        let mut params = Vec::new();
        let branches: Vec<String> = (0..self.fields.len())
            .map(|i| {
                let mut terms: Vec<String> = Vec::with_capacity(i + 1);
                for j in 0..i {
                    terms.push(format!("{} = ?", self.fields[j].name));
                    params.push(self.bound[j].clone());
                }
                let field = &self.fields[i];
                terms.push(format!("{} {} ?", field.name, field.direction.beyond().sql()));
                params.push(self.bound[i].clone());
                format!("({})", terms.join(" AND "))
            })
            .collect();

        (format!("({})", branches.join(" OR ")), params)
    }
}

// == Keyset Plan ==
/// Filter, ordering and fetch size for one page request.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetPlan {
    spec: SortSpec,
    predicate: Option<KeysetPredicate>,
    requested_limit: usize,
}

impl KeysetPlan {
    /// Plans a page of `requested_limit` rows after `cursor`, or from the
    /// start when there is no cursor. A cursor taken under another sort is
    /// an invalid cursor.
    pub fn new(
        spec: &SortSpec,
        cursor: Option<&Cursor>,
        requested_limit: usize,
    ) -> Result<Self, PaginationError> {
        if requested_limit == 0 {
            return Err(PaginationError::ZeroLimit);
        }

        let predicate = match cursor {
            None => None,
            Some(cursor) => {
                if !cursor.belongs_to(spec) {
                    return Err(PaginationError::InvalidCursor(
                        "cursor belongs to a different sort".to_string(),
                    ));
                }
                let bound = cursor.values();
                if bound.len() != spec.arity() {
                    return Err(PaginationError::ArityMismatch {
                        expected: spec.arity(),
                        actual: bound.len(),
                    });
                }
                Some(KeysetPredicate {
                    fields: spec.fields().to_vec(),
                    bound: bound.to_vec(),
                })
            }
        };

        Ok(Self {
            spec: spec.clone(),
            predicate,
            requested_limit,
        })
    }

    pub fn spec(&self) -> &SortSpec {
        &self.spec
    }

    pub fn predicate(&self) -> Option<&KeysetPredicate> {
        self.predicate.as_ref()
    }

    pub fn requested_limit(&self) -> usize {
        self.requested_limit
    }

    /// Rows to fetch: one more than the page holds, to detect a next page.
    pub fn fetch_limit(&self) -> usize {
        self.requested_limit + 1
    }

    /// `ORDER BY` clause body matching the sort spec exactly.
    pub fn order_by_sql(&self) -> String {
        self.spec
            .fields()
            .iter()
            .map(|field| format!("{} {}", field.name, field.direction.sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn predicate_sql(&self) -> Option<(String, Vec<SortValue>)> {
        self.predicate.as_ref().map(KeysetPredicate::to_sql)
    }

    /// True when a row with this sort tuple belongs at or after the resume point.
    pub fn matches(&self, tuple: &[SortValue]) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.matches(tuple))
    }

    /// Runs the plan over in-memory rows: filter, order, and take `fetch_limit`.
    pub fn select_from<R: SortKeyed + Clone>(&self, rows: &[R]) -> Result<Vec<R>, PaginationError> {
        let mut keyed = rows
            .iter()
            .map(|row| Ok((self.spec.tuple_of(row)?, row)))
            .collect::<Result<Vec<_>, PaginationError>>()?;

        keyed.retain(|(tuple, _)| self.matches(tuple));
        keyed.sort_by(|(a, _), (b, _)| self.spec.compare(a, b));

        Ok(keyed
            .into_iter()
            .take(self.fetch_limit())
            .map(|(_, row)| row.clone())
            .collect())
    }

    /// Cuts fetched rows into a page; the cursor is taken from the last row
    /// kept, and only when more rows were fetched than the page holds.
    pub fn paginate<R: SortKeyed>(&self, mut rows: Vec<R>) -> Result<Page<R>, PaginationError> {
        let has_more = rows.len() > self.requested_limit;
        rows.truncate(self.requested_limit);

        let next_cursor = match rows.last() {
            Some(last) if has_more => {
                Some(Cursor::new(&self.spec, self.spec.tuple_of(last)?).encode()?)
            }
            _ => None,
        };

        Ok(Page {
            items: rows,
            next_cursor,
        })
    }
}
