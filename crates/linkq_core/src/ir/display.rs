use std::fmt;

use super::{ConstantValue, Expression, NewArrayKind, UnaryOperator};

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expression]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}L"),
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Timestamp(v) => write!(f, "'{}'", v.to_rfc3339()),
            Self::Uuid(v) => write!(f, "'{v}'"),
            Self::QueryableResource(r) => write!(f, "Resource<{}>", r.element_type),
            Self::Argument(a) => write!(f, "arg#{}", a.instance_id),
            Self::Variable(v) => write!(f, "${}", v.name),
            Self::VariableList(v) => write!(f, "${}[{}]", v.name, v.values.len()),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { value, .. } => write!(f, "{value}"),
            Self::Parameter { name, .. } => write!(f, "{name}"),
            Self::MemberAccess { expression, member } => write!(f, "{expression}.{member}"),
            Self::Unary {
                operator,
                operand,
                type_info,
            } => match operator {
                UnaryOperator::Not => write!(f, "!({operand})"),
                UnaryOperator::Negate => write!(f, "-({operand})"),
                UnaryOperator::Convert => write!(f, "({type_info})({operand})"),
            },
            Self::Binary {
                operator,
                left,
                right,
            } => match operator {
                super::BinaryOperator::ArrayIndex => write!(f, "{left}[{right}]"),
                other => write!(f, "({left} {} {right})", other.symbol()),
            },
            Self::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({test} ? {if_true} : {if_false})"),
            Self::New {
                type_info,
                arguments,
            } => {
                write!(f, "new {type_info}(")?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            Self::MemberInit { new, bindings } => {
                write!(f, "{new} {{ ")?;
                for (idx, binding) in bindings.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", binding.member, binding.expression)?;
                }
                write!(f, " }}")
            }
            Self::ListInit {
                element_type,
                initializers,
            } => {
                write!(f, "new List<{element_type}> {{ ")?;
                write_list(f, initializers)?;
                write!(f, " }}")
            }
            Self::NewArray {
                element_type,
                kind,
                expressions,
            } => match kind {
                NewArrayKind::Init => {
                    write!(f, "new {element_type}[] {{ ")?;
                    write_list(f, expressions)?;
                    write!(f, " }}")
                }
                NewArrayKind::Bounds => {
                    write!(f, "new {element_type}[")?;
                    write_list(f, expressions)?;
                    write!(f, "]")
                }
            },
            Self::Collection { items, .. } => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Self::MethodCall {
                instance,
                method,
                arguments,
            } => {
                match instance {
                    Some(instance) => write!(f, "{instance}.{}(", method.name)?,
                    None => write!(f, "{}(", method.full_name())?,
                }
                write_list(f, arguments)?;
                write!(f, ")")
            }
            Self::Lambda { parameters, body } => {
                if parameters.len() == 1 {
                    write!(f, "{}", parameters[0].name)?;
                } else {
                    write!(f, "(")?;
                    for (idx, param) in parameters.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", param.name)?;
                    }
                    write!(f, ")")?;
                }
                write!(f, " => {body}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOperator, MethodInfo, ParameterDecl, QueryableResourceDescriptor};
    use crate::types::descriptor::TypeDescriptor;

    #[test]
    fn render_where() {
        let product = TypeDescriptor::named("shop", "Product");
        let query = Expression::MethodCall {
            instance: None,
            method: MethodInfo {
                declaring_type: "Queryable".into(),
                name: "Where".into(),
                generic_arguments: Vec::new(),
            },
            arguments: vec![
                Expression::Constant {
                    value: ConstantValue::QueryableResource(QueryableResourceDescriptor {
                        element_type: product.clone(),
                    }),
                    type_info: product.clone(),
                },
                Expression::Lambda {
                    parameters: vec![ParameterDecl {
                        name: "x".into(),
                        type_info: product.clone(),
                    }],
                    body: Box::new(Expression::Binary {
                        operator: BinaryOperator::Equal,
                        left: Box::new(Expression::MemberAccess {
                            expression: Box::new(Expression::Parameter {
                                name: "x".into(),
                                type_info: product,
                            }),
                            member: "name".into(),
                        }),
                        right: Box::new(Expression::Constant {
                            value: ConstantValue::Utf8("Car".into()),
                            type_info: TypeDescriptor::named("", "string"),
                        }),
                    }),
                },
            ],
        };

        assert_eq!(
            "Queryable.Where(Resource<shop.Product>, x => (x.name == 'Car'))",
            query.to_string()
        );
    }
}
