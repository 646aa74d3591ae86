//! Run comparison and aggregation queries over output tables and microdata.
//!
//! A calculation is a small expression over table expressions, accumulators
//! or entity attributes. It is tokenized, checked for unsafe SQL, rewritten
//! into column references of per-source CTEs and wrapped in a final `cr` CTE
//! returning `(run_id, dim0.., calc_value)`.

pub mod expr;
pub mod filter;
pub mod lexer;
pub mod micro;
pub mod table;

pub use filter::{DimFilter, FilterOp, OrderBy};
pub use micro::translate_to_micro_sql;
pub use table::{translate_to_acc_sql, translate_to_expr_sql};

/// Input of a calculation: the expression, the base run, the other runs and
/// result filters.
#[derive(Debug, Clone, Copy)]
pub struct CalcRequest<'a> {
    pub expr: &'a str,
    /// Base run in compare mode, first run otherwise.
    pub from_id: i32,
    pub run_ids: &'a [i32],
    pub filters: &'a [DimFilter],
    pub order_by: &'a [OrderBy],
}

/// Generated query: `cte` is the `WITH ...` prefix, `main` the final select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalcSql {
    pub cte: String,
    pub main: String,
    pub is_compare: bool,
}

impl CalcSql {
    /// Complete statement ready to execute.
    #[must_use]
    pub fn to_sql(&self) -> String {
        format!("{} {}", self.cte, self.main)
    }
}
