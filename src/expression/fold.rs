//! Constant folding.
//!
//! A prepared node whose inputs are all literals is evaluated once and
//! replaced by a literal of its declared type.

use crate::context::StatementContext;
use crate::expression::error::ExpressionResult;
use crate::expression::expr::{Expr, ExprKind};

impl Expr {
    pub(crate) fn is_foldable(&self) -> bool {
        match &self.kind {
            ExprKind::Literal
            | ExprKind::Column { .. }
            | ExprKind::Parameter { .. }
            | ExprKind::Star { .. }
            | ExprKind::InSubquery { .. }
            | ExprKind::Quantified { .. }
            | ExprKind::ScalarSubquery { .. }
            | ExprKind::Exists { .. }
            | ExprKind::Contains { .. }
            | ExprKind::UserFunction { .. }
            | ExprKind::Aggregate { .. }
            | ExprKind::SystemVariable(_) => false,
            ExprKind::Function { function, .. } if function.is_volatile() => false,
            _ => {
                let children = self.children();
                !children.is_empty() && children.iter().all(|c| c.is_constant())
            }
        }
    }

    pub(crate) fn fold(&mut self, ctx: &StatementContext) -> ExpressionResult<()> {
        let value = self.compute(ctx)?;
        let mut literal = Expr::typed_literal(value, self.data_type)?;
        literal.position = self.position;
        literal.flags.prepared = true;
        log::debug!(
            "folded constant expression to {} ({})",
            literal.value(),
            self.data_type.name()
        );
        *self = literal;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnMetadata, SchemaCatalog, TableSchema};
    use crate::expression::error::ErrorKind;
    use crate::value::{DataType, Value};

    fn context() -> StatementContext {
        let mut catalog = SchemaCatalog::new();
        catalog.add_table(TableSchema::new(
            "t",
            vec![ColumnMetadata::new("a", DataType::Int)],
        ));
        StatementContext::new(Box::new(catalog))
    }

    #[test]
    fn test_literal_arithmetic_folds() {
        let ctx = context();
        let mut expr = Expr::add(Expr::int(1), Expr::mul(Expr::int(2), Expr::int(3)));
        assert!(expr.prepare(&ctx).unwrap());
        assert!(expr.is_constant());
        assert_eq!(expr.literal_value(), Some(&Value::Int(7)));
        assert_eq!(expr.data_type(), DataType::Int);
    }

    #[test]
    fn test_mixed_types_fold_to_result_type() {
        let ctx = context();
        let mut expr = Expr::add(Expr::literal(Value::TinyInt(2)), Expr::literal(Value::Float(0.5)));
        assert!(expr.prepare(&ctx).unwrap());
        assert_eq!(expr.literal_value(), Some(&Value::Float(2.5)));

        let mut null = Expr::add(Expr::int(1), Expr::null());
        assert!(null.prepare(&ctx).unwrap());
        assert_eq!(null.data_type(), DataType::Int);
        assert!(null.always_null());
    }

    #[test]
    fn test_predicates_and_functions_fold() {
        let ctx = context();
        let mut like = Expr::like(Expr::string("abcdef"), Expr::string("abc%"));
        assert!(like.prepare(&ctx).unwrap());
        assert_eq!(like.literal_value(), Some(&Value::Bit(true)));

        let mut upper = Expr::function("upper", vec![Expr::string("abc")]);
        assert!(upper.prepare(&ctx).unwrap());
        assert_eq!(upper.literal_value(), Some(&Value::String("ABC".into())));

        let mut case = Expr::case(
            None,
            vec![(Expr::eq(Expr::int(1), Expr::int(2)), Expr::string("no"))],
            Some(Expr::string("yes")),
        );
        assert!(case.prepare(&ctx).unwrap());
        assert_eq!(case.literal_value(), Some(&Value::String("yes".into())));
    }

    #[test]
    fn test_non_constant_inputs_do_not_fold() {
        let ctx = context();
        let mut expr = Expr::add(Expr::column("a"), Expr::add(Expr::int(1), Expr::int(1)));
        assert!(!expr.prepare(&ctx).unwrap());
        let ExprKind::Binary { right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(right.literal_value(), Some(&Value::Int(2)));

        let mut now = Expr::function("getdate", vec![]);
        assert!(!now.prepare(&ctx).unwrap());
    }

    #[test]
    fn test_fold_errors_surface_at_prepare() {
        let ctx = context();
        let err = Expr::div(Expr::int(1), Expr::int(0)).at(3).prepare(&ctx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DivisionByZero));
        assert_eq!(err.position, Some(3));
    }
}
