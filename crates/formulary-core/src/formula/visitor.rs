use crate::formula::Formula;

///
/// FormulaVisitor
///
/// Receives the node `accept` was called on; descending into inner formulas
/// is up to the visitor.
///

pub trait FormulaVisitor<'a> {
    fn visit(&mut self, formula: &'a Formula);
}

///
/// LookUp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LookUp {
    /// Stop descending at the first match on every path.
    Shallow,
    /// Collect matches at any depth.
    Deep,
}

///
/// FormulaFinder
///
/// Collects nodes matching a predicate in depth-first, left-to-right order.
/// The root itself is a candidate.
///

pub struct FormulaFinder<'a, P> {
    predicate: P,
    lookup: LookUp,
    found: Vec<&'a Formula>,
}

impl<'a, P> FormulaFinder<'a, P>
where
    P: Fn(&Formula) -> bool,
{
    pub fn find(root: &'a Formula, predicate: P, lookup: LookUp) -> Vec<&'a Formula> {
        let mut finder = Self {
            predicate,
            lookup,
            found: Vec::new(),
        };
        root.accept(&mut finder);

        finder.found
    }
}

impl<'a, P> FormulaVisitor<'a> for FormulaFinder<'a, P>
where
    P: Fn(&Formula) -> bool,
{
    fn visit(&mut self, formula: &'a Formula) {
        if (self.predicate)(formula) {
            self.found.push(formula);
            if self.lookup == LookUp::Shallow {
                return;
            }
        }

        for inner in formula.inner_formulas() {
            inner.accept(self);
        }
    }
}
