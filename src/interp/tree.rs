//! The hierarchical namespace of declarations.
//!
//! Each tree holds declarations (overload sets per name), child
//! namespaces, imported aliases and a parent pointer. Trees live in an
//! arena owned by the typechecker; back-pointers are ids, never owning
//! references.

use std::collections::HashMap;

use crate::interp::ast::QualifiedId;
use crate::interp::cst::DeclId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TreeId(pub u32);

#[derive(Default, Debug)]
pub struct DefnTree {
    pub name: String,
    pub parent: Option<TreeId>,
    children: HashMap<String, TreeId>,
    declarations: HashMap<String, Vec<DeclId>>,
    imported_declarations: HashMap<String, Vec<DeclId>>,
    imported_trees: HashMap<String, TreeId>,
}

/// The arena of namespaces; index 0 is the root.
#[derive(Debug)]
pub struct DefnForest {
    trees: Vec<DefnTree>,
}

impl DefnForest {
    pub fn new() -> Self {
        DefnForest {
            trees: vec![DefnTree::default()],
        }
    }

    pub fn root(&self) -> TreeId {
        TreeId(0)
    }

    fn tree(&self, id: TreeId) -> &DefnTree {
        &self.trees[id.0 as usize]
    }

    fn tree_mut(&mut self, id: TreeId) -> &mut DefnTree {
        &mut self.trees[id.0 as usize]
    }

    pub fn parent(&self, id: TreeId) -> Option<TreeId> {
        self.tree(id).parent
    }

    /// The `::`-joined path from the root.
    pub fn qualified_name(&self, mut id: TreeId) -> String {
        let mut parts = Vec::new();
        while let Some(parent) = self.tree(id).parent {
            parts.push(self.tree(id).name.clone());
            id = parent;
        }
        parts.reverse();
        parts.join("::")
    }

    /// The fully scoped name of a declaration in `tree`.
    pub fn scoped_name(&self, tree: TreeId, name: &str) -> String {
        let prefix = self.qualified_name(tree);
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", prefix, name)
        }
    }

    pub fn child_named(&mut self, id: TreeId, name: &str) -> TreeId {
        if let Some(&child) = self.tree(id).children.get(name) {
            return child;
        }

        let child = TreeId(self.trees.len() as u32);
        self.trees.push(DefnTree {
            name: name.to_string(),
            parent: Some(id),
            ..DefnTree::default()
        });
        self.tree_mut(id).children.insert(name.to_string(), child);
        child
    }

    pub fn existing_child(&self, id: TreeId, name: &str) -> Option<TreeId> {
        self.tree(id).children.get(name).copied()
    }

    /// Adds a declaration to this tree's overload set for `name`.
    pub fn declare(&mut self, id: TreeId, name: &str, decl: DeclId) {
        self.tree_mut(id)
            .declarations
            .entry(name.to_string())
            .or_default()
            .push(decl);
    }

    /// `using X as Y` / `using X`: alias a single declaration set.
    pub fn import_declarations(&mut self, id: TreeId, name: &str, decls: &[DeclId]) {
        self.tree_mut(id)
            .imported_declarations
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(decls);
    }

    /// `using Namespace`: alias a whole tree into scope.
    pub fn import_tree(&mut self, id: TreeId, name: &str, target: TreeId) {
        self.tree_mut(id)
            .imported_trees
            .insert(name.to_string(), target);
    }

    /// All declarations of `name` directly in `tree` (own + imported).
    pub fn declarations_in(&self, id: TreeId, name: &str) -> Vec<DeclId> {
        let tree = self.tree(id);
        let mut out = Vec::new();
        if let Some(decls) = tree.declarations.get(name) {
            out.extend_from_slice(decls);
        }
        if let Some(decls) = tree.imported_declarations.get(name) {
            out.extend_from_slice(decls);
        }
        out
    }

    /// Resolves a possibly-qualified name from `scope`, walking up
    /// through parents until something matches.
    pub fn lookup(&self, scope: TreeId, id: &QualifiedId) -> Vec<DeclId> {
        let mut current = if id.absolute { self.root() } else { scope };

        loop {
            if let Some(decls) = self.lookup_from(current, id) {
                return decls;
            }

            match self.tree(current).parent {
                Some(parent) if !id.absolute => current = parent,
                _ => return Vec::new(),
            }
        }
    }

    fn lookup_from(&self, base: TreeId, id: &QualifiedId) -> Option<Vec<DeclId>> {
        let mut current = base;
        for part in &id.parents {
            let tree = self.tree(current);
            current = tree
                .children
                .get(part)
                .or_else(|| tree.imported_trees.get(part))
                .copied()?;
        }

        let decls = self.declarations_in(current, &id.name);
        if decls.is_empty() {
            None
        } else {
            Some(decls)
        }
    }
}

impl Default for DefnForest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_lookup_walks_parents() {
        let mut forest = DefnForest::new();
        let root = forest.root();
        let inner = forest.child_named(root, "inner");

        forest.declare(root, "x", DeclId(0));
        forest.declare(inner, "y", DeclId(1));

        // From the inner scope both x and y resolve.
        assert_eq!(forest.lookup(inner, &QualifiedId::plain("y")), [DeclId(1)]);
        assert_eq!(forest.lookup(inner, &QualifiedId::plain("x")), [DeclId(0)]);
        // From the root, y needs qualification.
        assert!(forest.lookup(root, &QualifiedId::plain("y")).is_empty());
        let qualified = QualifiedId {
            absolute: false,
            parents: vec!["inner".to_string()],
            name: "y".to_string(),
        };
        assert_eq!(forest.lookup(root, &qualified), [DeclId(1)]);
    }

    #[test]
    fn overloads_accumulate() {
        let mut forest = DefnForest::new();
        let root = forest.root();
        forest.declare(root, "f", DeclId(0));
        forest.declare(root, "f", DeclId(1));
        assert_eq!(
            forest.lookup(root, &QualifiedId::plain("f")),
            [DeclId(0), DeclId(1)]
        );
    }

    #[test]
    fn imported_tree_alias() {
        let mut forest = DefnForest::new();
        let root = forest.root();
        let lib = forest.child_named(root, "lib");
        let user = forest.child_named(root, "user");
        forest.declare(lib, "helper", DeclId(7));

        forest.import_tree(user, "l", lib);
        let through_alias = QualifiedId {
            absolute: false,
            parents: vec!["l".to_string()],
            name: "helper".to_string(),
        };
        assert_eq!(forest.lookup(user, &through_alias), [DeclId(7)]);
    }

    #[test]
    fn qualified_names() {
        let mut forest = DefnForest::new();
        let root = forest.root();
        let a = forest.child_named(root, "a");
        let b = forest.child_named(a, "b");
        assert_eq!(forest.qualified_name(b), "a::b");
        assert_eq!(forest.scoped_name(b, "f"), "a::b::f");
        assert_eq!(forest.scoped_name(root, "f"), "f");
    }
}
