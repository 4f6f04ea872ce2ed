use std::collections::HashMap;

/// Compiled identity of a function or struct constructor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionMapped {
    pub id: usize,
    /// Id of the paired cleanup routine.
    pub exit_id: usize,
    pub returns: bool,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    register_map: HashMap<String, usize>,
    function_map: HashMap<String, FunctionMapped>,
    internal_registers: Vec<usize>,
}

/// Compile-time scope tree, stored as an arena of nodes indexed by
/// position. The compiler only ever moves between a node and its parent;
/// abandoned children stay in the arena.
///
/// Name lookups walk from the current node to the root, so bindings in a
/// child shadow bindings of the same name further up.
#[derive(Debug)]
pub struct ScopeTree {
    nodes: Vec<Scope>,
    current: usize,
}

impl ScopeTree {
    pub fn new() -> Self {
        ScopeTree {
            nodes: vec![Scope::default()],
            current: 0,
        }
    }

    pub fn is_at_root(&self) -> bool {
        self.current == 0
    }

    pub fn enter_scope(&mut self) {
        let node = Scope {
            parent: Some(self.current),
            ..Scope::default()
        };
        self.nodes.push(node);
        self.current = self.nodes.len() - 1;
    }

    /// Leave the current scope, returning the registers it owned so the
    /// caller can emit cleanup for them: named registers first (sorted by
    /// id, with their variable name), then internal ones.
    ///
    /// Leaving the root scope is a no-op and returns nothing.
    pub fn leave_scope(&mut self) -> Vec<(usize, Option<String>)> {
        let Some(parent) = self.nodes[self.current].parent else {
            return Vec::new();
        };

        let scope = std::mem::take(&mut self.nodes[self.current]);
        self.current = parent;

        let mut registers: Vec<(usize, Option<String>)> = scope
            .register_map
            .into_iter()
            .map(|(name, register)| (register, Some(name)))
            .collect();
        registers.sort_by_key(|(register, _)| *register);

        registers.extend(scope.internal_registers.into_iter().map(|r| (r, None)));

        registers
    }

    pub fn bind_register(&mut self, name: impl Into<String>, register: usize) {
        self.nodes[self.current]
            .register_map
            .insert(name.into(), register);
    }

    pub fn add_internal_register(&mut self, register: usize) {
        self.nodes[self.current].internal_registers.push(register);
    }

    pub fn bind_function(&mut self, name: impl Into<String>, mapped: FunctionMapped) {
        self.nodes[self.current]
            .function_map
            .insert(name.into(), mapped);
    }

    /// Register for a name, walking towards the root.
    pub fn deep_register(&self, name: &str) -> Option<usize> {
        let mut index = Some(self.current);

        while let Some(i) = index {
            if let Some(&register) = self.nodes[i].register_map.get(name) {
                return Some(register);
            }
            index = self.nodes[i].parent;
        }

        None
    }

    /// Function mapping for a name, walking towards the root.
    pub fn deep_function(&self, name: &str) -> Option<FunctionMapped> {
        let mut index = Some(self.current);

        while let Some(i) = index {
            if let Some(&mapped) = self.nodes[i].function_map.get(name) {
                return Some(mapped);
            }
            index = self.nodes[i].parent;
        }

        None
    }
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}
