//! Named derived scalars with declared field dependencies.
//!
//! An evaluator only ever sees the values of its declared dependencies, in
//! declaration order, as a slice. It has no access to the record itself, so
//! a variable cannot silently depend on a field it did not declare.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use cf_core::{Error, FieldKey, Record, Result};

use crate::expr::CompiledExpr;

/// Boxed evaluator: a pure function of the dependency values.
pub type Evaluator = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Index of a variable inside its [`VariableRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(usize);

impl VariableId {
    /// Position in the registry.
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone)]
enum Compute {
    /// Identity on a single field.
    Field,
    Expr(CompiledExpr),
    Func(Evaluator),
}

/// A registered variable.
#[derive(Clone)]
pub struct Variable {
    name: String,
    dependencies: Vec<FieldKey>,
    compute: Compute,
}

impl Variable {
    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dependencies, in the order the evaluator receives them.
    pub fn dependencies(&self) -> &[FieldKey] {
        &self.dependencies
    }

    /// Evaluate from already-gathered dependency values.
    pub fn compute(&self, values: &[f64]) -> f64 {
        match &self.compute {
            Compute::Field => values[0],
            Compute::Expr(e) => e.eval(values),
            Compute::Func(f) => f(values),
        }
    }

    fn gather(&self, record: &Record, buf: &mut Vec<f64>) -> std::result::Result<f64, FieldKey> {
        buf.clear();
        for key in &self.dependencies {
            match record.get(key) {
                Some(v) => buf.push(v),
                None => return Err(key.clone()),
            }
        }
        Ok(self.compute(buf))
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.compute {
            Compute::Field => "field".to_string(),
            Compute::Expr(e) => format!("expr({})", e.source()),
            Compute::Func(_) => "fn".to_string(),
        };
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("kind", &kind)
            .finish()
    }
}

/// Registry of named variables.
///
/// Built once before a run; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    vars: Vec<Variable>,
    by_name: HashMap<String, VariableId>,
}

impl VariableRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable computed by `evaluator` from `dependencies`.
    ///
    /// Fails with [`Error::DuplicateName`] if `name` is taken and
    /// [`Error::InvalidVariable`] if a dependency is listed twice.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        dependencies: impl IntoIterator<Item = FieldKey>,
        evaluator: F,
    ) -> Result<VariableId>
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        let dependencies: Vec<FieldKey> = dependencies.into_iter().collect();
        self.insert(name.into(), dependencies, Compute::Func(Arc::new(evaluator)))
    }

    /// Register the identity variable of one field, named `Branch.field`.
    ///
    /// Idempotent: returns the existing id if the field was registered before.
    pub fn register_field(&mut self, key: FieldKey) -> Result<VariableId> {
        let name = key.to_string();
        if let Some(&id) = self.by_name.get(&name) {
            let existing = &self.vars[id.0];
            if matches!(existing.compute, Compute::Field) {
                return Ok(id);
            }
            return Err(Error::DuplicateName { kind: "variable", name });
        }
        self.insert(name, vec![key], Compute::Field)
    }

    /// Register a variable defined by a formula (see [`CompiledExpr`]).
    pub fn register_expr(&mut self, name: impl Into<String>, formula: &str) -> Result<VariableId> {
        let expr = CompiledExpr::compile(formula)?;
        let dependencies = expr.dependencies().to_vec();
        self.insert(name.into(), dependencies, Compute::Expr(expr))
    }

    /// Look a name up; if it is unknown but has the `Branch.field` form,
    /// register it as a field variable.
    pub fn resolve_or_field(&mut self, name: &str) -> Result<VariableId> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }
        let key = FieldKey::parse(name).map_err(|_| Error::UnknownVariable(name.to_string()))?;
        self.register_field(key)
    }

    fn insert(
        &mut self,
        name: String,
        dependencies: Vec<FieldKey>,
        compute: Compute,
    ) -> Result<VariableId> {
        if name.is_empty() {
            return Err(Error::InvalidVariable { name, reason: "empty name".into() });
        }
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateName { kind: "variable", name });
        }
        let mut seen = HashSet::new();
        for key in &dependencies {
            if !seen.insert(key) {
                return Err(Error::InvalidVariable {
                    name,
                    reason: format!("dependency '{key}' declared twice"),
                });
            }
        }

        let id = VariableId(self.vars.len());
        tracing::debug!(variable = %name, n_deps = dependencies.len(), "variable registered");
        self.by_name.insert(name.clone(), id);
        self.vars.push(Variable { name, dependencies, compute });
        Ok(id)
    }

    /// Id of a registered name.
    pub fn lookup(&self, name: &str) -> Option<VariableId> {
        self.by_name.get(name).copied()
    }

    /// Variable by id.
    ///
    /// # Panics
    ///
    /// If `id` was issued by a different registry and is out of range.
    pub fn get(&self, id: VariableId) -> &Variable {
        &self.vars[id.0]
    }

    /// `true` if `id` belongs to this registry.
    pub fn contains(&self, id: VariableId) -> bool {
        id.0 < self.vars.len()
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate `(id, variable)` in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.vars.iter().enumerate().map(|(i, v)| (VariableId(i), v))
    }

    /// Evaluate a variable on a record.
    pub fn evaluate(&self, id: VariableId, record: &Record) -> Result<f64> {
        let mut buf = Vec::new();
        self.get(id).gather(record, &mut buf).map_err(Error::MissingField)
    }

    /// Evaluate by name.
    pub fn evaluate_by_name(&self, name: &str, record: &Record) -> Result<f64> {
        let id = self.lookup(name).ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
        self.evaluate(id, record)
    }
}

/// Per-record memo of variable values.
///
/// Each variable is computed at most once between two calls to
/// [`EvalScope::reset`]. Missing-field outcomes are memoized too.
pub struct EvalScope<'r> {
    registry: &'r VariableRegistry,
    memo: Vec<Option<std::result::Result<f64, FieldKey>>>,
    buf: Vec<f64>,
    computed: u64,
}

impl<'r> EvalScope<'r> {
    /// Scope over `registry`, initially empty.
    pub fn new(registry: &'r VariableRegistry) -> Self {
        Self { registry, memo: vec![None; registry.len()], buf: Vec::new(), computed: 0 }
    }

    /// Forget all memoized values. Call before each new record.
    pub fn reset(&mut self) {
        self.memo.iter_mut().for_each(|m| *m = None);
    }

    /// Registry this scope evaluates against.
    pub fn registry(&self) -> &'r VariableRegistry {
        self.registry
    }

    /// Value of `id` on `record`, computing it on first request.
    pub fn value(&mut self, id: VariableId, record: &Record) -> Result<f64> {
        let outcome = match &self.memo[id.0] {
            Some(known) => known.clone(),
            None => {
                let fresh = self.registry.get(id).gather(record, &mut self.buf);
                self.computed += 1;
                self.memo[id.0] = Some(fresh.clone());
                fresh
            }
        };
        outcome.map_err(Error::MissingField)
    }

    /// Total evaluator invocations since the scope was created.
    pub fn computed(&self) -> u64 {
        self.computed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt() -> FieldKey {
        FieldKey::new("Candidates", "fKFPt")
    }

    #[test]
    fn register_and_evaluate() {
        let mut reg = VariableRegistry::new();
        let ct = FieldKey::new("Candidates", "fLiteCt");
        let id = reg.register("properLifetime", [ct.clone()], |v| 100.0 / 2.997 * v[0]).unwrap();
        let rec = Record::new().with("Candidates", "fLiteCt", 2.997);
        assert!((reg.evaluate(id, &rec).unwrap() - 100.0).abs() < 1e-10);
        assert!((reg.evaluate_by_name("properLifetime", &rec).unwrap() - 100.0).abs() < 1e-10);
        assert_eq!(reg.get(id).dependencies(), &[ct]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = VariableRegistry::new();
        reg.register("x", [pt()], |v| v[0]).unwrap();
        let err = reg.register("x", [pt()], |v| 2.0 * v[0]).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "variable", .. }));
    }

    #[test]
    fn repeated_dependency_rejected() {
        let mut reg = VariableRegistry::new();
        let err = reg.register("x", [pt(), pt()], |v| v[0] + v[1]).unwrap_err();
        assert!(matches!(err, Error::InvalidVariable { .. }));
    }

    #[test]
    fn missing_field() {
        let mut reg = VariableRegistry::new();
        let id = reg.register_field(pt()).unwrap();
        let err = reg.evaluate(id, &Record::new()).unwrap_err();
        match err {
            Error::MissingField(k) => assert_eq!(k, pt()),
            other => panic!("expected MissingField, got {other:?}"),
        }
        assert!(matches!(
            reg.evaluate_by_name("nope", &Record::new()),
            Err(Error::UnknownVariable(_))
        ));
    }

    #[test]
    fn register_field_is_idempotent() {
        let mut reg = VariableRegistry::new();
        let a = reg.register_field(pt()).unwrap();
        let b = reg.register_field(pt()).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(a).name(), "Candidates.fKFPt");
        assert_eq!(reg.resolve_or_field("Candidates.fKFPt").unwrap(), a);
        assert!(matches!(reg.resolve_or_field("pt"), Err(Error::UnknownVariable(_))));
    }

    #[test]
    fn field_name_shadowed_by_function_variable() {
        let mut reg = VariableRegistry::new();
        reg.register("Candidates.fKFPt", [pt()], |v| 2.0 * v[0]).unwrap();
        assert!(matches!(reg.register_field(pt()), Err(Error::DuplicateName { .. })));
    }

    #[test]
    fn expression_variable() {
        let mut reg = VariableRegistry::new();
        let id = reg.register_expr("pSq", "Cand.px*Cand.px + Cand.py*Cand.py").unwrap();
        assert_eq!(reg.get(id).dependencies().len(), 2);
        let rec = Record::new().with("Cand", "px", 3.0).with("Cand", "py", 4.0);
        assert_eq!(reg.evaluate(id, &rec).unwrap(), 25.0);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let mut reg = VariableRegistry::new();
        let id = reg.register_expr("m", "sqrt(Cand.e*Cand.e - Cand.p*Cand.p)").unwrap();
        let rec = Record::new().with("Cand", "e", 5.3).with("Cand", "p", 1.7);
        let a = reg.evaluate(id, &rec).unwrap();
        let b = reg.evaluate(id, &rec).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn scope_memoizes_per_record() {
        let mut reg = VariableRegistry::new();
        let id = reg.register_field(pt()).unwrap();
        let missing = reg.register_field(FieldKey::new("Candidates", "fLiteY")).unwrap();
        let rec = Record::new().with("Candidates", "fKFPt", 4.0);

        let mut scope = EvalScope::new(&reg);
        for _ in 0..3 {
            assert_eq!(scope.value(id, &rec).unwrap(), 4.0);
            assert!(scope.value(missing, &rec).is_err());
        }
        assert_eq!(scope.computed(), 2);

        scope.reset();
        scope.value(id, &rec).unwrap();
        assert_eq!(scope.computed(), 3);
    }
}
