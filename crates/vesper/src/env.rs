//! Scope frames.
//!
//! A scope is a pair of name maps (`variables`, `constants`) plus an
//! optional `parent` link and an unconditional `global` link. Lookup walks
//! `parent` first, then falls back to `global` once the chain is exhausted —
//! a single global frame reachable from every scope.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::VesperError;
use crate::value::Value;

pub type EnvRef = Rc<RefCell<Environment>>;

#[derive(Debug)]
pub struct Environment {
    variables: HashMap<String, Value>,
    constants: HashMap<String, Value>,
    parent: Option<EnvRef>,
    global: Option<EnvRef>,
}

impl Environment {
    /// Builds the root frame; its `global` link points back to itself.
    ///
    /// Built in two steps: `Rc::new_cyclic`'s callback runs before the `Rc`
    /// has any strong references, so a `Weak::upgrade` taken there always
    /// returns `None` — the root would end up with no `global` at all.
    /// Constructing the frame first and patching `global` in afterward
    /// gives the root a genuine strong self-reference.
    #[must_use]
    pub fn new_global() -> EnvRef {
        let root = Rc::new(RefCell::new(Environment {
            variables: HashMap::new(),
            constants: HashMap::new(),
            parent: None,
            global: None,
        }));
        root.borrow_mut().global = Some(root.clone());
        root
    }

    /// A block/loop-iteration child scope: shares the parent's `global`
    /// link and chains to `parent` for lookups.
    #[must_use]
    pub fn new_child(parent: &EnvRef) -> EnvRef {
        let global = parent.borrow().global.clone();
        Rc::new(RefCell::new(Environment {
            variables: HashMap::new(),
            constants: HashMap::new(),
            parent: Some(parent.clone()),
            global,
        }))
    }

    /// A callee scope for a lambda/method invocation: no parent link at
    /// all — lambdas do not close over lexical scope beyond the global
    /// frame (spec Design Note "Cyclic references... a callee scope's
    /// parent link is empty, not the caller's").
    #[must_use]
    pub fn new_detached(global: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Environment {
            variables: HashMap::new(),
            constants: HashMap::new(),
            parent: None,
            global: Some(global.clone()),
        }))
    }

    fn global_ref(&self) -> Option<EnvRef> {
        self.global.clone()
    }

    /// The global frame reachable from `env` — the root frame's `global`
    /// points to itself.
    #[must_use]
    pub fn global(env: &EnvRef) -> EnvRef {
        env.borrow().global_ref().unwrap_or_else(|| env.clone())
    }

    /// Looks up `name` among `constants` only, walking `parent` then
    /// `global` — used by `ClassDecl` to resolve a superclass name, which
    /// must come from the current scope's constants.
    pub fn get_const(env: &EnvRef, name: &str) -> Result<Value, VesperError> {
        let mut cursor = Some(env.clone());
        while let Some(frame) = cursor {
            let this = frame.borrow();
            if let Some(v) = this.constants.get(name) {
                return Ok(v.clone());
            }
            cursor = this.parent.clone();
        }
        if let Some(global) = env.borrow().global_ref() {
            if let Some(v) = global.borrow().constants.get(name) {
                return Ok(v.clone());
            }
        }
        Err(VesperError::Name(format!("unresolved identifier '{name}'")))
    }

    /// Inserts a mutable binding into *this* frame. Rejects shadowing
    /// within the same frame.
    pub fn declare_var(env: &EnvRef, name: &str, value: Value) -> Result<(), VesperError> {
        let mut this = env.borrow_mut();
        if this.variables.contains_key(name) || this.constants.contains_key(name) {
            return Err(VesperError::Name(format!("'{name}' is already declared in this scope")));
        }
        this.variables.insert(name.to_string(), value);
        Ok(())
    }

    /// Inserts an immutable binding into *this* frame.
    pub fn declare_const(env: &EnvRef, name: &str, value: Value) -> Result<(), VesperError> {
        let mut this = env.borrow_mut();
        if this.variables.contains_key(name) || this.constants.contains_key(name) {
            return Err(VesperError::Name(format!("'{name}' is already declared in this scope")));
        }
        this.constants.insert(name.to_string(), value);
        Ok(())
    }

    /// Looks up `name` walking `parent`, then falling back to `global`.
    pub fn get(env: &EnvRef, name: &str) -> Result<Value, VesperError> {
        let mut cursor = Some(env.clone());
        while let Some(frame) = cursor {
            let this = frame.borrow();
            if let Some(v) = this.variables.get(name).or_else(|| this.constants.get(name)) {
                return Ok(v.clone());
            }
            cursor = this.parent.clone();
        }
        if let Some(global) = env.borrow().global_ref() {
            let this = global.borrow();
            if let Some(v) = this.variables.get(name).or_else(|| this.constants.get(name)) {
                return Ok(v.clone());
            }
        }
        Err(VesperError::Name(format!("unresolved identifier '{name}'")))
    }

    /// Reassigns `name`: mutable bindings found in the `parent`/`global`
    /// chain are overwritten; a name that only exists as a constant
    /// anywhere in scope is a distinct error.
    pub fn assign(env: &EnvRef, name: &str, value: Value) -> Result<(), VesperError> {
        let mut cursor = Some(env.clone());
        while let Some(frame) = cursor {
            if frame.borrow().variables.contains_key(name) {
                frame.borrow_mut().variables.insert(name.to_string(), value);
                return Ok(());
            }
            cursor = frame.borrow().parent.clone();
        }
        if let Some(global) = env.borrow().global_ref() {
            if global.borrow().variables.contains_key(name) {
                global.borrow_mut().variables.insert(name.to_string(), value);
                return Ok(());
            }
        }

        if Self::is_constant_anywhere(env, name) {
            return Err(VesperError::Name(format!("cannot assign to constant '{name}'")));
        }
        Err(VesperError::Name(format!("unresolved identifier '{name}'")))
    }

    fn is_constant_anywhere(env: &EnvRef, name: &str) -> bool {
        let mut cursor = Some(env.clone());
        while let Some(frame) = cursor {
            if frame.borrow().constants.contains_key(name) {
                return true;
            }
            cursor = frame.borrow().parent.clone();
        }
        if let Some(global) = env.borrow().global_ref() {
            if global.borrow().constants.contains_key(name) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scope_falls_back_to_parent_then_global() {
        let global = Environment::new_global();
        Environment::declare_var(&global, "g", Value::Number(1.0)).unwrap();
        let child = Environment::new_child(&global);
        Environment::declare_var(&child, "c", Value::Number(2.0)).unwrap();
        assert_eq!(Environment::get(&child, "g").unwrap().display_string(), "1");
        assert_eq!(Environment::get(&child, "c").unwrap().display_string(), "2");
    }

    #[test]
    fn duplicate_declaration_in_same_frame_errors() {
        let global = Environment::new_global();
        Environment::declare_var(&global, "x", Value::Nil).unwrap();
        assert!(Environment::declare_var(&global, "x", Value::Nil).is_err());
        assert!(Environment::declare_const(&global, "x", Value::Nil).is_err());
    }

    #[test]
    fn assigning_to_constant_is_an_error() {
        let global = Environment::new_global();
        Environment::declare_const(&global, "k", Value::Number(1.0)).unwrap();
        let err = Environment::assign(&global, "k", Value::Number(2.0)).unwrap_err();
        assert!(matches!(err, VesperError::Name(_)));
        assert!(err.to_string().contains("constant"));
    }

    #[test]
    fn detached_scope_does_not_see_caller_locals() {
        let global = Environment::new_global();
        let caller = Environment::new_child(&global);
        Environment::declare_var(&caller, "local", Value::Number(1.0)).unwrap();
        let callee = Environment::new_detached(&global);
        assert!(Environment::get(&callee, "local").is_err());
    }

    #[test]
    fn assign_overwrites_and_read_back_matches() {
        let global = Environment::new_global();
        Environment::declare_var(&global, "x", Value::Number(1.0)).unwrap();
        Environment::assign(&global, "x", Value::Number(5.0)).unwrap();
        assert_eq!(Environment::get(&global, "x").unwrap().display_string(), "5");
    }

    #[test]
    fn root_frame_global_resolves_to_itself() {
        let root = Environment::new_global();
        assert!(Rc::ptr_eq(&Environment::global(&root), &root));
    }

    #[test]
    fn grandchild_scope_still_resolves_global_to_root() {
        let root = Environment::new_global();
        let child = Environment::new_child(&root);
        let grandchild = Environment::new_child(&child);
        assert!(Rc::ptr_eq(&Environment::global(&grandchild), &root));
    }
}
