//! Scope Tracker
//!
//! Open blocks form a strict LIFO stack. Depth is always the stack size, and
//! each depth owns one synthetic context variable in the generated code:
//! `data` at the root, `data$1`, `data$2`, ... for nested blocks.

use crate::validate::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// `{{#expr}}`: one scope per element, with `.`, `.index` and `.length` bound.
    Section,
    /// `{{^expr}}`: a single scope inheriting the parent's bindings only.
    Inverted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub depth: usize,
    pub kind: ScopeKind,
    pub expression: String,
    pub location: SourceLocation,
}

impl Scope {
    pub fn context_var(&self) -> String {
        context_var(self.depth)
    }
}

/// Name of the context variable visible at `depth`.
pub fn context_var(depth: usize) -> String {
    if depth == 0 {
        "data".to_string()
    } else {
        format!("data${}", depth)
    }
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Context variable of the innermost open scope (`data` when none is open).
    pub fn current_var(&self) -> String {
        context_var(self.depth())
    }

    pub fn current(&self) -> Option<&Scope> {
        self.scopes.last()
    }

    pub fn push(&mut self, kind: ScopeKind, expression: &str, location: SourceLocation) -> &Scope {
        let depth = self.depth() + 1;
        self.scopes.push(Scope {
            depth,
            kind,
            expression: expression.to_string(),
            location,
        });
        &self.scopes[depth - 1]
    }

    pub fn pop(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_var_names() {
        assert_eq!(context_var(0), "data");
        assert_eq!(context_var(1), "data$1");
        assert_eq!(context_var(12), "data$12");
    }

    #[test]
    fn test_depth_tracks_stack_size() {
        let mut stack = ScopeStack::new();
        assert_eq!(stack.current_var(), "data");

        let outer = stack.push(ScopeKind::Section, "items", SourceLocation::default());
        assert_eq!(outer.depth, 1);
        assert_eq!(outer.context_var(), "data$1");

        stack.push(ScopeKind::Inverted, "empty", SourceLocation::default());
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current_var(), "data$2");
        assert_eq!(stack.current().map(|s| s.kind), Some(ScopeKind::Inverted));

        let inner = stack.pop().unwrap();
        assert_eq!(inner.expression, "empty");
        assert_eq!(stack.current_var(), "data$1");
        stack.pop();
        assert!(stack.is_empty());
        assert!(stack.pop().is_none());
    }
}
