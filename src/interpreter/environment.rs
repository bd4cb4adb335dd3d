use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::interpreter::value::Value;

/// A handle to one lexical scope. Handles are cheap to clone and share the
/// underlying scope, so a closure and the block that created a scope see
/// each other's mutations. Methods take `&self`; the bindings sit behind a
/// `RefCell` inside the scope itself.
#[derive(Debug, Clone)]
pub struct Env {
    scope: Rc<Scope>,
}

#[derive(Debug)]
struct Scope {
    values: RefCell<HashMap<String, Value>>,
    parent: Option<Env>,
}

impl Env {
    /// The root scope of an interpreter.
    pub fn global() -> Self {
        Self {
            scope: Rc::new(Scope {
                values: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// A fresh scope enclosed by `self`.
    pub fn child(&self) -> Self {
        Self {
            scope: Rc::new(Scope {
                values: RefCell::new(HashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Bind (or rebind) a name in this scope.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.scope.values.borrow_mut().insert(name.into(), value);
    }

    /// The nearest scope, from here outward, where `name` is bound.
    fn owning_scope(&self, name: &str) -> Option<Env> {
        let mut env = self.clone();
        loop {
            if env.scope.values.borrow().contains_key(name) {
                return Some(env);
            }
            let parent = env.scope.parent.clone()?;
            env = parent;
        }
    }

    /// Look a name up, walking outward through enclosing scopes.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.owning_scope(name)
            .and_then(|env| env.scope.values.borrow().get(name).cloned())
    }

    /// Assign to wherever `name` is already bound; false if it is bound
    /// nowhere in the chain.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        match self.owning_scope(name) {
            Some(env) => {
                env.scope
                    .values
                    .borrow_mut()
                    .insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Walk exactly `distance` parent links.
    fn ancestor(&self, distance: usize) -> Env {
        let mut env = self.clone();
        for _ in 0..distance {
            env = env
                .scope
                .parent
                .clone()
                .expect("resolver distances stay within the scope chain");
        }
        env
    }

    /// Read `name` in the scope exactly `distance` hops out.
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value> {
        let env = self.ancestor(distance);
        let value = env.scope.values.borrow().get(name).cloned();
        value
    }

    /// Write `name` in the scope exactly `distance` hops out.
    pub fn assign_at(&self, distance: usize, name: &str, value: Value) {
        self.ancestor(distance)
            .scope
            .values
            .borrow_mut()
            .insert(name.to_string(), value);
    }
}
