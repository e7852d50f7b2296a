//! Global String Interner
//!
//! Parameter and permutation key names are interned into [`Symbol`]s so that
//! validation and layout lookups compare integers instead of strings.

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact integer identifier of an interned string.
pub type Symbol = Spur;

/// Interns a string, returning its symbol.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up a string without interning it.
#[inline]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let a = intern("Transformation.World");
        let b = intern("Transformation.World");
        assert_eq!(a, b);
        assert_eq!(resolve(a), "Transformation.World");
        assert_eq!(get("Transformation.World"), Some(a));
    }
}
