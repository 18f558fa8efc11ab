use std::fmt;
use std::sync::Arc;

use linkq_error::{DbError, Result};

use super::Expr;
use crate::types::DataType;
use crate::values::Value;

/// Query operators, usable both against queryables and in-memory sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOperator {
    Where,
    Select,
    SelectMany,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Join,
    GroupBy,
    Skip,
    Take,
    Distinct,
    Include,
    ThenInclude,
    Count,
    LongCount,
    Any,
    All,
    Contains,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
    Sum,
    Min,
    Max,
    Average,
}

impl QueryOperator {
    pub const ALL: &'static [QueryOperator] = &[
        Self::Where,
        Self::Select,
        Self::SelectMany,
        Self::OrderBy,
        Self::OrderByDescending,
        Self::ThenBy,
        Self::ThenByDescending,
        Self::Join,
        Self::GroupBy,
        Self::Skip,
        Self::Take,
        Self::Distinct,
        Self::Include,
        Self::ThenInclude,
        Self::Count,
        Self::LongCount,
        Self::Any,
        Self::All,
        Self::Contains,
        Self::First,
        Self::FirstOrDefault,
        Self::Single,
        Self::SingleOrDefault,
        Self::Last,
        Self::LastOrDefault,
        Self::Sum,
        Self::Min,
        Self::Max,
        Self::Average,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Where => "Where",
            Self::Select => "Select",
            Self::SelectMany => "SelectMany",
            Self::OrderBy => "OrderBy",
            Self::OrderByDescending => "OrderByDescending",
            Self::ThenBy => "ThenBy",
            Self::ThenByDescending => "ThenByDescending",
            Self::Join => "Join",
            Self::GroupBy => "GroupBy",
            Self::Skip => "Skip",
            Self::Take => "Take",
            Self::Distinct => "Distinct",
            Self::Include => "Include",
            Self::ThenInclude => "ThenInclude",
            Self::Count => "Count",
            Self::LongCount => "LongCount",
            Self::Any => "Any",
            Self::All => "All",
            Self::Contains => "Contains",
            Self::First => "First",
            Self::FirstOrDefault => "FirstOrDefault",
            Self::Single => "Single",
            Self::SingleOrDefault => "SingleOrDefault",
            Self::Last => "Last",
            Self::LastOrDefault => "LastOrDefault",
            Self::Sum => "Sum",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Average => "Average",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// If this operator produces a single value instead of a sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Count
                | Self::LongCount
                | Self::Any
                | Self::All
                | Self::Contains
                | Self::First
                | Self::FirstOrDefault
                | Self::Single
                | Self::SingleOrDefault
                | Self::Last
                | Self::LastOrDefault
                | Self::Sum
                | Self::Min
                | Self::Max
                | Self::Average
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringMethod {
    Contains,
    StartsWith,
    EndsWith,
    ToUpper,
    ToLower,
    Trim,
    /// Static, takes the string as its only argument.
    IsNullOrEmpty,
    /// Static, concatenates all arguments.
    Concat,
}

impl StringMethod {
    const ALL: &'static [StringMethod] = &[
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::ToUpper,
        Self::ToLower,
        Self::Trim,
        Self::IsNullOrEmpty,
        Self::Concat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Contains => "Contains",
            Self::StartsWith => "StartsWith",
            Self::EndsWith => "EndsWith",
            Self::ToUpper => "ToUpper",
            Self::ToLower => "ToLower",
            Self::Trim => "Trim",
            Self::IsNullOrEmpty => "IsNullOrEmpty",
            Self::Concat => "Concat",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::IsNullOrEmpty | Self::Concat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathMethod {
    Abs,
    Round,
    Floor,
    Ceiling,
    Sqrt,
    Pow,
    Max,
    Min,
}

impl MathMethod {
    const ALL: &'static [MathMethod] = &[
        Self::Abs,
        Self::Round,
        Self::Floor,
        Self::Ceiling,
        Self::Sqrt,
        Self::Pow,
        Self::Max,
        Self::Min,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Abs => "Abs",
            Self::Round => "Round",
            Self::Floor => "Floor",
            Self::Ceiling => "Ceiling",
            Self::Sqrt => "Sqrt",
            Self::Pow => "Pow",
            Self::Max => "Max",
            Self::Min => "Min",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

pub type LocalFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A function that only exists in the process that built the query.
///
/// Calls to local functions must be evaluated before a query can be
/// translated.
pub struct LocalFunction {
    pub name: String,
    pub param_types: Vec<DataType>,
    pub return_type: DataType,
    func: Box<LocalFn>,
}

impl LocalFunction {
    pub fn new<F>(
        name: impl Into<String>,
        param_types: Vec<DataType>,
        return_type: DataType,
        func: F,
    ) -> Arc<Self>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::new(LocalFunction {
            name: name.into(),
            param_types,
            return_type,
            func: Box::new(func),
        })
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for LocalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFunction")
            .field("name", &self.name)
            .field("param_types", &self.param_types)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum MethodKind {
    /// Operator over a queryable.
    Query(QueryOperator),
    /// Operator over an in-memory sequence.
    Enumerable(QueryOperator),
    String(StringMethod),
    Math(MathMethod),
    Local(Arc<LocalFunction>),
}

impl MethodKind {
    pub fn declaring_type(&self) -> &'static str {
        match self {
            Self::Query(_) => "Queryable",
            Self::Enumerable(_) => "Enumerable",
            Self::String(_) => "String",
            Self::Math(_) => "Math",
            Self::Local(_) => "Local",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Query(op) | Self::Enumerable(op) => op.name(),
            Self::String(m) => m.name(),
            Self::Math(m) => m.name(),
            Self::Local(f) => &f.name,
        }
    }

    pub fn query_operator(&self) -> Option<QueryOperator> {
        match self {
            Self::Query(op) | Self::Enumerable(op) => Some(*op),
            _ => None,
        }
    }

    /// Look up a transportable method by its declaring type and name.
    pub fn from_names(declaring_type: &str, name: &str) -> Option<Self> {
        match declaring_type {
            "Queryable" => QueryOperator::from_name(name).map(Self::Query),
            "Enumerable" => QueryOperator::from_name(name).map(Self::Enumerable),
            "String" => StringMethod::from_name(name).map(Self::String),
            "Math" => MathMethod::from_name(name).map(Self::Math),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Method {
    pub kind: MethodKind,
    pub generic_arguments: Vec<DataType>,
}

impl Method {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.kind.declaring_type(), self.kind.name())
    }
}

/// Check a lambda argument against the expected parameter types, returning
/// its body.
fn lambda_signature<'a>(
    op: QueryOperator,
    expr: &'a Expr,
    expected_params: &[&DataType],
) -> Result<&'a Expr> {
    match expr {
        Expr::Lambda { parameters, body } => {
            if parameters.len() != expected_params.len() {
                return Err(DbError::translation(format!(
                    "{} expects a lambda with {} parameters, got {}",
                    op.name(),
                    expected_params.len(),
                    parameters.len()
                )));
            }
            for ((name, actual), expected) in parameters.iter().zip(expected_params) {
                if !actual.is_assignable_from(expected) {
                    return Err(DbError::translation(format!(
                        "Lambda parameter '{name}' of {} has type '{actual}', expected '{expected}'",
                        op.name()
                    )));
                }
            }
            Ok(body)
        }
        other => Err(DbError::translation(format!(
            "{} expects a lambda, got '{other}'",
            op.name()
        ))),
    }
}

/// Infer generic arguments and the result type of a query operator call.
pub(crate) fn infer_query_call(
    op: QueryOperator,
    args: &[Expr],
) -> Result<(Vec<DataType>, DataType)> {
    let source = args.first().ok_or_else(|| {
        DbError::translation(format!("{} requires a source sequence", op.name()))
    })?;
    let source_type = source.datatype();
    let elem = source_type.try_element_type()?.clone();

    let wrap = |t: DataType| match &source_type {
        DataType::Queryable(_) => DataType::queryable(t),
        _ => DataType::list(t),
    };

    let arity = |allowed: &[usize]| -> Result<()> {
        if !allowed.contains(&args.len()) {
            return Err(DbError::translation(format!(
                "{} called with {} arguments",
                op.name(),
                args.len()
            )));
        }
        Ok(())
    };

    let body_type = |idx: usize, params: &[&DataType]| -> Result<DataType> {
        Ok(lambda_signature(op, &args[idx], params)?.datatype())
    };

    use QueryOperator as Q;
    Ok(match op {
        Q::Where => {
            arity(&[2])?;
            let ret = body_type(1, &[&elem])?;
            if !DataType::nullable(DataType::Boolean).is_assignable_from(&ret) {
                return Err(DbError::translation(format!(
                    "Where predicate must return bool, got '{ret}'"
                )));
            }
            (vec![elem.clone()], wrap(elem))
        }
        Q::Select => {
            arity(&[2])?;
            let ret = body_type(1, &[&elem])?;
            (vec![elem, ret.clone()], wrap(ret))
        }
        Q::SelectMany => {
            arity(&[2, 3])?;
            let coll = body_type(1, &[&elem])?;
            let coll_elem = coll.try_element_type()?.clone();
            if args.len() == 3 {
                let ret = body_type(2, &[&elem, &coll_elem])?;
                (vec![elem, coll_elem, ret.clone()], wrap(ret))
            } else {
                (vec![elem, coll_elem.clone()], wrap(coll_elem))
            }
        }
        Q::OrderBy | Q::OrderByDescending | Q::ThenBy | Q::ThenByDescending => {
            arity(&[2])?;
            let key = body_type(1, &[&elem])?;
            (vec![elem.clone(), key], wrap(elem))
        }
        Q::Join => {
            arity(&[5])?;
            let inner_type = args[1].datatype();
            let inner_elem = inner_type.try_element_type()?.clone();
            let outer_key = body_type(2, &[&elem])?;
            let inner_key = body_type(3, &[&inner_elem])?;
            if !outer_key.is_assignable_from(&inner_key) && !inner_key.is_assignable_from(&outer_key)
            {
                return Err(DbError::translation(format!(
                    "Join keys have incompatible types '{outer_key}' and '{inner_key}'"
                )));
            }
            let ret = body_type(4, &[&elem, &inner_elem])?;
            (vec![elem, inner_elem, outer_key, ret.clone()], wrap(ret))
        }
        Q::GroupBy => {
            arity(&[2, 3])?;
            let key = body_type(1, &[&elem])?;
            if args.len() == 3 {
                let element = body_type(2, &[&elem])?;
                (
                    vec![elem, key.clone(), element.clone()],
                    wrap(DataType::grouping(key, element)),
                )
            } else {
                (
                    vec![elem.clone(), key.clone()],
                    wrap(DataType::grouping(key, elem)),
                )
            }
        }
        Q::Skip | Q::Take => {
            arity(&[2])?;
            let count = args[1].datatype();
            if !DataType::Int32.is_assignable_from(&count) {
                return Err(DbError::translation(format!(
                    "{} expects an i32 count, got '{count}'",
                    op.name()
                )));
            }
            (vec![elem.clone()], wrap(elem))
        }
        Q::Distinct => {
            arity(&[1])?;
            (vec![elem.clone()], wrap(elem))
        }
        Q::Include | Q::ThenInclude => {
            arity(&[2])?;
            let nav = body_type(1, &[&elem])?;
            (vec![elem.clone(), nav], wrap(elem))
        }
        Q::Count | Q::LongCount | Q::Any => {
            arity(&[1, 2])?;
            if args.len() == 2 {
                body_type(1, &[&elem])?;
            }
            let ret = match op {
                Q::Count => DataType::Int32,
                Q::LongCount => DataType::Int64,
                _ => DataType::Boolean,
            };
            (vec![elem], ret)
        }
        Q::All => {
            arity(&[2])?;
            body_type(1, &[&elem])?;
            (vec![elem], DataType::Boolean)
        }
        Q::Contains => {
            arity(&[2])?;
            (vec![elem], DataType::Boolean)
        }
        Q::First
        | Q::FirstOrDefault
        | Q::Single
        | Q::SingleOrDefault
        | Q::Last
        | Q::LastOrDefault => {
            arity(&[1, 2])?;
            if args.len() == 2 {
                body_type(1, &[&elem])?;
            }
            (vec![elem.clone()], elem)
        }
        Q::Sum | Q::Min | Q::Max | Q::Average => {
            arity(&[1, 2])?;
            let value_type = if args.len() == 2 {
                body_type(1, &[&elem])?
            } else {
                elem.clone()
            };
            if matches!(op, Q::Sum | Q::Average) && !value_type.is_numeric() {
                return Err(DbError::translation(format!(
                    "{} requires numeric values, got '{value_type}'",
                    op.name()
                )));
            }
            let ret = match op {
                Q::Average => match &value_type {
                    DataType::Nullable(_) => DataType::nullable(DataType::Float64),
                    _ => DataType::Float64,
                },
                _ => value_type.clone(),
            };
            let mut generics = vec![elem];
            if args.len() == 2 {
                generics.push(value_type);
            }
            (generics, ret)
        }
    })
}

pub(crate) fn infer_string_call(
    method: StringMethod,
    instance: Option<&Expr>,
    args: &[Expr],
) -> Result<DataType> {
    let expect_string = |expr: &Expr| -> Result<()> {
        let ty = expr.datatype();
        if !DataType::Utf8.is_assignable_from(&ty) {
            return Err(DbError::translation(format!(
                "String.{} expects string arguments, got '{ty}'",
                method.name()
            )));
        }
        Ok(())
    };

    match (method.is_static(), instance) {
        (true, Some(_)) => {
            return Err(DbError::translation(format!(
                "String.{} is static",
                method.name()
            )));
        }
        (false, None) => {
            return Err(DbError::translation(format!(
                "String.{} requires an instance",
                method.name()
            )));
        }
        (false, Some(instance)) => expect_string(instance)?,
        (true, None) => (),
    }

    let expected_args = match method {
        StringMethod::Contains | StringMethod::StartsWith | StringMethod::EndsWith => Some(1),
        StringMethod::ToUpper | StringMethod::ToLower | StringMethod::Trim => Some(0),
        StringMethod::IsNullOrEmpty => Some(1),
        StringMethod::Concat => None,
    };
    if let Some(n) = expected_args {
        if args.len() != n {
            return Err(DbError::translation(format!(
                "String.{} expects {n} arguments, got {}",
                method.name(),
                args.len()
            )));
        }
    }
    for arg in args {
        expect_string(arg)?;
    }

    Ok(match method {
        StringMethod::ToUpper | StringMethod::ToLower | StringMethod::Trim | StringMethod::Concat => {
            DataType::Utf8
        }
        _ => DataType::Boolean,
    })
}

pub(crate) fn infer_math_call(method: MathMethod, args: &[Expr]) -> Result<DataType> {
    let expected = match method {
        MathMethod::Pow | MathMethod::Max | MathMethod::Min => 2,
        _ => 1,
    };
    if args.len() != expected {
        return Err(DbError::translation(format!(
            "Math.{} expects {expected} arguments, got {}",
            method.name(),
            args.len()
        )));
    }
    let types: Vec<_> = args.iter().map(|a| a.datatype()).collect();
    for ty in &types {
        if !ty.is_numeric() {
            return Err(DbError::translation(format!(
                "Math.{} expects numeric arguments, got '{ty}'",
                method.name()
            )));
        }
    }

    Ok(match method {
        MathMethod::Abs => types[0].clone(),
        MathMethod::Max | MathMethod::Min => widest_numeric(&types[0], &types[1]),
        _ => DataType::Float64,
    })
}

pub(crate) fn infer_local_call(func: &LocalFunction, args: &[Expr]) -> Result<DataType> {
    if args.len() != func.param_types.len() {
        return Err(DbError::translation(format!(
            "Local function '{}' expects {} arguments, got {}",
            func.name,
            func.param_types.len(),
            args.len()
        )));
    }
    for (arg, expected) in args.iter().zip(&func.param_types) {
        let actual = arg.datatype();
        if !expected.is_assignable_from(&actual) {
            return Err(DbError::translation(format!(
                "Local function '{}' expects '{expected}', got '{actual}'",
                func.name
            )));
        }
    }
    Ok(func.return_type.clone())
}

/// Widest of two numeric types. Nullability is kept if either side is
/// nullable.
pub(crate) fn widest_numeric(a: &DataType, b: &DataType) -> DataType {
    let rank = |t: &DataType| match t.non_nullable() {
        DataType::Float64 => 2,
        DataType::Int64 => 1,
        _ => 0,
    };
    let base = if rank(a) >= rank(b) {
        a.non_nullable().clone()
    } else {
        b.non_nullable().clone()
    };
    if matches!(a, DataType::Nullable(_)) || matches!(b, DataType::Nullable(_)) {
        DataType::nullable(base)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_names_round_trip() {
        for op in QueryOperator::ALL {
            assert_eq!(Some(*op), QueryOperator::from_name(op.name()));
        }
        assert_eq!(None, QueryOperator::from_name("Aggregate"));
    }

    #[test]
    fn lookup_by_declaring_type() {
        assert!(matches!(
            MethodKind::from_names("Queryable", "Where"),
            Some(MethodKind::Query(QueryOperator::Where))
        ));
        assert!(matches!(
            MethodKind::from_names("String", "StartsWith"),
            Some(MethodKind::String(StringMethod::StartsWith))
        ));
        assert!(MethodKind::from_names("Local", "anything").is_none());
    }

    #[test]
    fn widest() {
        assert_eq!(
            DataType::Int64,
            widest_numeric(&DataType::Int32, &DataType::Int64)
        );
        assert_eq!(
            DataType::nullable(DataType::Float64),
            widest_numeric(&DataType::nullable(DataType::Int32), &DataType::Float64)
        );
    }
}
