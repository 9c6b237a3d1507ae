/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! The pre-parsed query expression tree. Parsing the query language is the
//! caller's job; the engine evaluates and structurally rewrites this tree.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

impl fmt::Display for SetOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetOperator::Union => "+",
            SetOperator::Intersect => "^",
            SetOperator::Except => "-",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpression {
    /// A target pattern, resolved against the universe when evaluated.
    TargetLiteral(String),
    /// `set(a b c)`: each word is a target pattern.
    SetLiteral(Vec<String>),
    /// A chain of one set operator applied left to right.
    BinaryOp {
        op: SetOperator,
        operands: Vec<QueryExpression>,
    },
    Function {
        name: String,
        args: Vec<Argument>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Expression(QueryExpression),
    Word(String),
    Integer(u64),
}

impl QueryExpression {
    pub fn target(pattern: impl Into<String>) -> Self {
        QueryExpression::TargetLiteral(pattern.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Argument>) -> Self {
        QueryExpression::Function {
            name: name.into(),
            args,
        }
    }

    pub fn binary(op: SetOperator, operands: Vec<QueryExpression>) -> Self {
        QueryExpression::BinaryOp { op, operands }
    }

    /// Applies a structural rewrite bottom-up. When the mapper replaces a
    /// function node, the replacement is mapped again, so rewrites must not
    /// produce a node they would rewrite once more.
    pub fn map(&self, mapper: &dyn ExpressionMapper) -> QueryExpression {
        match self {
            QueryExpression::TargetLiteral(..) | QueryExpression::SetLiteral(..) => self.clone(),
            QueryExpression::BinaryOp { op, operands } => QueryExpression::BinaryOp {
                op: *op,
                operands: operands.iter().map(|e| e.map(mapper)).collect(),
            },
            QueryExpression::Function { name, args } => match mapper.map_function(name, args) {
                Some(replacement) => replacement.map(mapper),
                None => QueryExpression::Function {
                    name: name.clone(),
                    args: args
                        .iter()
                        .map(|arg| match arg {
                            Argument::Expression(e) => Argument::Expression(e.map(mapper)),
                            other => other.clone(),
                        })
                        .collect(),
                },
            },
        }
    }
}

/// Rewrites function nodes of an expression tree. Returning `None` keeps the
/// node (its expression arguments are still mapped).
pub trait ExpressionMapper {
    fn map_function(&self, name: &str, args: &[Argument]) -> Option<QueryExpression>;
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpression::TargetLiteral(pattern) => f.write_str(pattern),
            QueryExpression::SetLiteral(patterns) => {
                write!(f, "set({})", patterns.join(" "))
            }
            QueryExpression::BinaryOp { op, operands } => {
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", op)?;
                    }
                    write!(f, "{}", operand)?;
                }
                Ok(())
            }
            QueryExpression::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Expression(e) => write!(f, "{}", e),
            Argument::Word(w) => f.write_str(w),
            Argument::Integer(i) => write!(f, "{}", i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrips_canonical_syntax() {
        let expr = QueryExpression::binary(
            SetOperator::Except,
            vec![
                QueryExpression::function(
                    "deps",
                    vec![
                        Argument::Expression(QueryExpression::target("//a:x")),
                        Argument::Integer(2),
                    ],
                ),
                QueryExpression::SetLiteral(vec!["//b:y".to_owned(), "//c:z".to_owned()]),
            ],
        );
        assert_eq!(expr.to_string(), "deps(//a:x, 2) - set(//b:y //c:z)");
    }

    #[test]
    fn test_map_rewrites_nested_functions() {
        struct RenameDeps;
        impl ExpressionMapper for RenameDeps {
            fn map_function(&self, name: &str, args: &[Argument]) -> Option<QueryExpression> {
                if name == "deps" {
                    Some(QueryExpression::function("alldeps", args.to_vec()))
                } else {
                    None
                }
            }
        }

        let expr = QueryExpression::function(
            "rdeps",
            vec![
                Argument::Expression(QueryExpression::target("//u:u")),
                Argument::Expression(QueryExpression::function(
                    "deps",
                    vec![Argument::Expression(QueryExpression::target("//a:x"))],
                )),
            ],
        );
        assert_eq!(
            expr.map(&RenameDeps).to_string(),
            "rdeps(//u:u, alldeps(//a:x))"
        );
    }
}
