//! # Query Definitions
//!
//! `QueryDef` is the fluent, schema-free description of a read. Nothing is
//! resolved here: field names, reference paths and globs are checked only when
//! the definition is compiled against a schema layout.
//!
//! ```ignore
//! let q = QueryDef::new("article")
//!     .filter("views", Operator::Gt, 100)
//!     .or(|f| f.filter("pinned", Operator::Equal, true))
//!     .sort("title", Order::Asc)
//!     .range(0, 20)
//!     .include(["title", "author.name"])
//!     .include_ref("tags", |q| q.include(["*"]).range(0, 5));
//! ```

use std::fmt;
use std::str::FromStr;

use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    Has,
    NotHas,
    Gt,
    Lt,
    Ge,
    Le,
    Exists,
    NotExists,
    Like,
    NotLike,
}

pub const OP_NEGATE: u8 = 0x80;

impl Operator {
    /// Wire code: the base operator, with bit 7 set for negation.
    pub fn code(self) -> u8 {
        let (base, negated) = self.split();
        if negated {
            base | OP_NEGATE
        } else {
            base
        }
    }

    fn split(self) -> (u8, bool) {
        match self {
            Operator::Equal => (1, false),
            Operator::NotEqual => (1, true),
            Operator::Has => (2, false),
            Operator::NotHas => (2, true),
            Operator::Gt => (3, false),
            Operator::Lt => (4, false),
            Operator::Ge => (5, false),
            Operator::Le => (6, false),
            Operator::Exists => (7, false),
            Operator::NotExists => (7, true),
            Operator::Like => (8, false),
            Operator::NotLike => (8, true),
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let negated = code & OP_NEGATE != 0;
        Some(match (code & !OP_NEGATE, negated) {
            (1, false) => Operator::Equal,
            (1, true) => Operator::NotEqual,
            (2, false) => Operator::Has,
            (2, true) => Operator::NotHas,
            (3, false) => Operator::Gt,
            (4, false) => Operator::Lt,
            (5, false) => Operator::Ge,
            (6, false) => Operator::Le,
            (7, false) => Operator::Exists,
            (7, true) => Operator::NotExists,
            (8, false) => Operator::Like,
            (8, true) => Operator::NotLike,
            _ => return None,
        })
    }

    pub fn is_range(self) -> bool {
        matches!(self, Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le)
    }

    pub fn is_negated(self) -> bool {
        self.split().1
    }

    /// Operators that compare a substring and never a hash.
    pub fn is_partial(self) -> bool {
        matches!(
            self,
            Operator::Has | Operator::NotHas | Operator::Like | Operator::NotLike
        )
    }

    pub fn is_exists(self) -> bool {
        matches!(self, Operator::Exists | Operator::NotExists)
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "=" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "has" => Operator::Has,
            "!has" => Operator::NotHas,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            ">=" => Operator::Ge,
            "<=" => Operator::Le,
            "exists" => Operator::Exists,
            "!exists" => Operator::NotExists,
            "like" => Operator::Like,
            "!like" => Operator::NotLike,
            other => return Err(format!("unknown operator '{other}'")),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::Has => "has",
            Operator::NotHas => "!has",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Exists => "exists",
            Operator::NotExists => "!exists",
            Operator::Like => "like",
            Operator::NotLike => "!like",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

/// One member of a filter's conjunction.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Condition(Condition),
    /// A nested filter that matches as a whole, OR chain included.
    Any(Box<Filter>),
}

/// A conjunction of clauses with an optional OR branch.
///
/// `a.or(b)` matches records matching every clause of `a`, or `b`. Branches
/// chain: `a.or(b.or(c))` is the three-way OR. [`Filter::any`] nests a group
/// inside the conjunction, so `a.any(|f| b.or(c))` is `a && (b || c)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub(crate) clauses: Vec<Clause>,
    pub(crate) or: Option<Box<Filter>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Condition(Condition {
            field: field.into(),
            op,
            value: value.into(),
        }));
        self
    }

    pub fn exists(self, field: impl Into<String>) -> Self {
        self.filter(field, Operator::Exists, Value::Null)
    }

    pub fn or(mut self, f: impl FnOnce(Filter) -> Filter) -> Self {
        self.append_branch(f(Filter::new()));
        self
    }

    /// Adds the filter built by `f` as a single clause of this branch.
    pub fn any(mut self, f: impl FnOnce(Filter) -> Filter) -> Self {
        self.clauses.push(Clause::Any(Box::new(f(Filter::new()))));
        self
    }

    fn append_branch(&mut self, branch: Filter) {
        if let Some(next) = self.or.as_deref_mut() {
            next.append_branch(branch);
        } else {
            self.or = Some(Box::new(branch));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.or.is_none()
    }

    /// The branches of the OR chain, this filter's own clauses first.
    pub(crate) fn branches(&self) -> Vec<&[Clause]> {
        let mut out = vec![self.clauses.as_slice()];
        let mut next = self.or.as_deref();
        while let Some(f) = next {
            out.push(f.clauses.as_slice());
            next = f.or.as_deref();
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc = 0,
    Desc = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDef {
    pub field: String,
    pub order: Order,
    /// Locale of a text sort; `None` sorts on the "any locale" slot.
    pub locale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncludeOpts {
    /// First char of a string to return.
    pub start: Option<usize>,
    /// One past the last char of a string to return.
    pub end: Option<usize>,
    /// Single locale of a text field to read.
    pub locale: Option<String>,
}

impl IncludeOpts {
    pub fn slice(start: usize, end: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            locale: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncludeItem {
    /// A field name, dotted path, `*` or `**`.
    Path(String),
    WithOpts(String, IncludeOpts),
    /// A reference read with its own nested query.
    Nested(String, Box<QueryDef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggFn {
    Count = 1,
    Sum = 2,
    Avg = 3,
    Min = 4,
    Max = 5,
    Stddev = 6,
    Var = 7,
}

impl AggFn {
    /// Accumulator bytes reserved for one function slot.
    pub fn width(self) -> u8 {
        match self {
            AggFn::Count => 4,
            AggFn::Sum | AggFn::Min | AggFn::Max => 8,
            AggFn::Avg => 16,
            AggFn::Stddev | AggFn::Var => 24,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFn::Count => "count",
            AggFn::Sum => "sum",
            AggFn::Avg => "avg",
            AggFn::Min => "min",
            AggFn::Max => "max",
            AggFn::Stddev => "stddev",
            AggFn::Var => "var",
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => AggFn::Count,
            2 => AggFn::Sum,
            3 => AggFn::Avg,
            4 => AggFn::Min,
            5 => AggFn::Max,
            6 => AggFn::Stddev,
            7 => AggFn::Var,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateDef {
    pub count: bool,
    /// (function, field) in call order.
    pub fns: Vec<(AggFn, String)>,
    pub group_by: Option<String>,
}

impl AggregateDef {
    pub fn is_bare_count(&self) -> bool {
        self.count && self.fns.is_empty() && self.group_by.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFn {
    Cosine = 0,
    Euclidean = 1,
    DotProduct = 2,
    Manhattan = 3,
}

impl VectorFn {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => VectorFn::Cosine,
            1 => VectorFn::Euclidean,
            2 => VectorFn::DotProduct,
            3 => VectorFn::Manhattan,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchDef {
    /// Words of `query` matched against the weighted fields.
    Text {
        query: String,
        fields: Vec<(String, u8)>,
    },
    Vector {
        field: String,
        vector: Vec<f32>,
        func: VectorFn,
        threshold: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    All,
    Ids(Vec<u32>),
    Id(u32),
    Alias { field: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDef {
    pub(crate) type_name: String,
    pub(crate) target: Target,
    pub(crate) filter: Filter,
    pub(crate) sort: Option<SortDef>,
    pub(crate) offset: u32,
    pub(crate) limit: Option<u32>,
    pub(crate) include: Vec<IncludeItem>,
    pub(crate) locale: Option<String>,
    pub(crate) aggregate: Option<AggregateDef>,
    pub(crate) search: Option<SearchDef>,
}

impl QueryDef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            target: Target::All,
            filter: Filter::new(),
            sort: None,
            offset: 0,
            limit: None,
            include: Vec::new(),
            locale: None,
            aggregate: None,
            search: None,
        }
    }

    /// Query over the records of a reference; the type comes from the schema.
    pub(crate) fn nested() -> Self {
        Self::new(String::new())
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn id(mut self, id: u32) -> Self {
        self.target = Target::Id(id);
        self
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.target = Target::Ids(ids.into_iter().collect());
        self
    }

    pub fn alias(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.target = Target::Alias {
            field: field.into(),
            value: value.into(),
        };
        self
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.filter = self.filter.filter(field, op, value);
        self
    }

    pub fn exists(mut self, field: impl Into<String>) -> Self {
        self.filter = self.filter.exists(field);
        self
    }

    pub fn or(mut self, f: impl FnOnce(Filter) -> Filter) -> Self {
        self.filter = self.filter.or(f);
        self
    }

    pub fn any(mut self, f: impl FnOnce(Filter) -> Filter) -> Self {
        self.filter = self.filter.any(f);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: Order) -> Self {
        self.sort = Some(SortDef {
            field: field.into(),
            order,
            locale: None,
        });
        self
    }

    pub fn sort_locale(mut self, field: impl Into<String>, order: Order, locale: impl Into<String>) -> Self {
        self.sort = Some(SortDef {
            field: field.into(),
            order,
            locale: Some(locale.into()),
        });
        self
    }

    pub fn range(mut self, offset: u32, limit: u32) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn include<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.include
            .extend(fields.into_iter().map(|f| IncludeItem::Path(f.into())));
        self
    }

    pub fn include_with(mut self, field: impl Into<String>, opts: IncludeOpts) -> Self {
        self.include.push(IncludeItem::WithOpts(field.into(), opts));
        self
    }

    /// Reads one locale of a text field.
    pub fn include_locale(mut self, field: impl Into<String>, locale: impl Into<String>) -> Self {
        self.include.push(IncludeItem::WithOpts(
            field.into(),
            IncludeOpts {
                locale: Some(locale.into()),
                ..IncludeOpts::default()
            },
        ));
        self
    }

    pub fn include_ref(mut self, field: impl Into<String>, f: impl FnOnce(QueryDef) -> QueryDef) -> Self {
        self.include
            .push(IncludeItem::Nested(field.into(), Box::new(f(QueryDef::nested()))));
        self
    }

    /// Locale read from every text field of the query.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    fn aggregate_mut(&mut self) -> &mut AggregateDef {
        self.aggregate.get_or_insert_with(AggregateDef::default)
    }

    pub fn count(mut self) -> Self {
        self.aggregate_mut().count = true;
        self
    }

    fn push_fns<S: Into<String>>(mut self, func: AggFn, fields: impl IntoIterator<Item = S>) -> Self {
        let agg = self.aggregate_mut();
        agg.fns
            .extend(fields.into_iter().map(|f| (func, f.into())));
        self
    }

    pub fn sum<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push_fns(AggFn::Sum, fields)
    }

    pub fn avg<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push_fns(AggFn::Avg, fields)
    }

    pub fn min<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push_fns(AggFn::Min, fields)
    }

    pub fn max<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push_fns(AggFn::Max, fields)
    }

    pub fn stddev<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push_fns(AggFn::Stddev, fields)
    }

    pub fn var<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push_fns(AggFn::Var, fields)
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.aggregate_mut().group_by = Some(field.into());
        self
    }

    pub fn search_text<S: Into<String>>(
        mut self,
        query: impl Into<String>,
        fields: impl IntoIterator<Item = (S, u8)>,
    ) -> Self {
        self.search = Some(SearchDef::Text {
            query: query.into(),
            fields: fields.into_iter().map(|(f, w)| (f.into(), w)).collect(),
        });
        self
    }

    pub fn search_vector(
        mut self,
        field: impl Into<String>,
        vector: impl Into<Vec<f32>>,
        func: VectorFn,
        threshold: f64,
    ) -> Self {
        self.search = Some(SearchDef::Vector {
            field: field.into(),
            vector: vector.into(),
            func,
            threshold,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_codes_negate_with_high_bit() {
        assert_eq!(Operator::Equal.code(), 1);
        assert_eq!(Operator::NotEqual.code(), 0x81);
        assert_eq!(Operator::NotLike.code(), 0x88);
        for op in [Operator::Ge, Operator::NotExists, Operator::NotHas] {
            assert_eq!(Operator::from_code(op.code()), Some(op));
        }
        assert_eq!(Operator::from_code(0x83), None);
    }

    #[test]
    fn operators_parse_from_text() {
        assert_eq!("!=".parse::<Operator>(), Ok(Operator::NotEqual));
        assert_eq!(Operator::Le.to_string(), "<=");
        assert!("~".parse::<Operator>().is_err());
    }

    #[test]
    fn or_chains_append_branches() {
        let f = Filter::new()
            .filter("a", Operator::Equal, 1)
            .or(|f| f.filter("b", Operator::Equal, 2))
            .or(|f| f.filter("c", Operator::Equal, 3).filter("d", Operator::Gt, 0));
        let branches = f.branches();
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[2].len(), 2);
        assert!(matches!(&branches[1][0], Clause::Condition(c) if c.field == "b"));
    }

    #[test]
    fn any_nests_a_group_in_the_branch() {
        let f = Filter::new()
            .filter("a", Operator::Equal, 1)
            .any(|f| f.filter("b", Operator::Equal, 2).or(|f| f.filter("c", Operator::Equal, 3)));
        let branches = f.branches();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].len(), 2);
        let Clause::Any(group) = &branches[0][1] else {
            panic!("expected a nested group");
        };
        assert_eq!(group.branches().len(), 2);
    }

    #[test]
    fn aggregate_builders_accumulate() {
        let q = QueryDef::new("user").count().sum(["age"]).avg(["age", "score"]);
        let agg = q.aggregate.unwrap();
        assert!(agg.count);
        assert_eq!(agg.fns.len(), 3);
        assert!(!agg.is_bare_count());
        assert!(QueryDef::new("user").count().aggregate.unwrap().is_bare_count());
    }
}
