//! Session-scoped symbol stores.
//!
//! Variables are keyed by `(name, lane id)` so every lane owns its own
//! instance of a same-named variable. Labels map a name to a program offset
//! and are shared by all lanes. Each store has its own lock; callers hold it
//! for a single lookup or insert only, never across an engine-lock acquire.
use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::instruction::Variable;

#[derive(Debug, Default)]
pub struct VariableRegistry {
    table: RwLock<HashMap<(String, usize), Variable>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or redeclare) `var` for `lane`.
    pub fn define(&self, var: Variable, lane: usize) {
        self.table.write().insert((var.name.clone(), lane), var);
    }

    pub fn lookup(&self, name: &str, lane: usize) -> Option<Variable> {
        self.table.read().get(&(name.to_string(), lane)).cloned()
    }

    /// All declarations, ordered by lane then name.
    pub fn entries(&self) -> Vec<(usize, Variable)> {
        let mut out: Vec<(usize, Variable)> = self
            .table
            .read()
            .iter()
            .map(|((_, lane), var)| (*lane, var.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        out
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.table.write().clear();
    }
}

#[derive(Debug, Default)]
pub struct LabelRegistry {
    labels: Mutex<HashMap<String, usize>>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` at `offset`. Every lane of a warp executes LABEL, so
    /// redefinition simply overwrites.
    pub fn define(&self, name: &str, offset: usize) {
        self.labels.lock().insert(name.to_string(), offset);
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.labels.lock().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.labels.lock().clear();
    }
}

/// Both stores, owned by one engine session and handed to every handler.
#[derive(Debug, Default)]
pub struct Registries {
    pub variables: VariableRegistry,
    pub labels: LabelRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.variables.clear();
        self.labels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::MemorySpace;

    #[test]
    fn variables_are_lane_scoped() {
        let reg = VariableRegistry::new();
        reg.define(Variable::new("i", 0.0, MemorySpace::Global).at(1), 1);
        reg.define(Variable::new("i", 0.0, MemorySpace::Global).at(2), 2);

        assert_eq!(reg.lookup("i", 1).map(|v| v.offset), Some(1));
        assert_eq!(reg.lookup("i", 2).map(|v| v.offset), Some(2));
        assert!(reg.lookup("i", 3).is_none());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn entries_are_ordered() {
        let reg = VariableRegistry::new();
        reg.define(Variable::new("z", 1.0, MemorySpace::Local), 1);
        reg.define(Variable::new("a", 1.0, MemorySpace::Local), 1);
        reg.define(Variable::new("z", 1.0, MemorySpace::Local), 0);
        let order: Vec<(usize, String)> =
            reg.entries().into_iter().map(|(l, v)| (l, v.name)).collect();
        assert_eq!(
            order,
            vec![(0, "z".to_string()), (1, "a".to_string()), (1, "z".to_string())]
        );
    }

    #[test]
    fn labels_overwrite_and_clear() {
        let labels = LabelRegistry::new();
        labels.define("loop", 3);
        labels.define("loop", 4);
        assert_eq!(labels.lookup("loop"), Some(4));
        assert_eq!(labels.lookup("missing"), None);
        labels.clear();
        assert!(labels.is_empty());
    }
}
