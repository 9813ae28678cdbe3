use super::arena::Arena;
use super::hashmap::RobinHoodMap;
use super::string_map::{fnv1a64, FnvStrOps};
use crate::error::{Result, VitlError};

/// Dense id of an interned string. Ids start at 0 and never repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Deduplicates strings into an [`Arena`].
///
/// The text of every symbol lives in the arena and the lookup table holds
/// `&'a str` keys pointing there, so releasing a key is a no-op. The shared
/// borrow of the arena keeps it from being reset while the interner exists.
#[derive(Debug)]
pub struct StringInterner<'a> {
    arena: &'a Arena,
    ids: RobinHoodMap<&'a str, Symbol, FnvStrOps>,
    strings: Vec<&'a str>,
}

impl<'a> StringInterner<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            ids: RobinHoodMap::with_ops(FnvStrOps),
            strings: Vec::new(),
        }
    }

    /// Return the symbol for `s`, copying it into the arena on first sight.
    ///
    /// Table space is reserved before the arena copy, so a failure leaves
    /// the interner unchanged. Arena bytes are only consumed on success.
    pub fn intern(&mut self, s: &str) -> Result<Symbol> {
        if let Some(symbol) = self.get(s) {
            return Ok(symbol);
        }

        let next = u32::try_from(self.strings.len()).map_err(|_| {
            VitlError::InvalidArgument("interner symbol space exhausted".to_string())
        })?;
        self.strings
            .try_reserve(1)
            .map_err(|_| VitlError::oom(std::mem::size_of::<&str>(), 0))?;
        self.ids.reserve(1)?;

        let stored = self.arena.alloc_str(s)?;
        let symbol = Symbol(next);
        self.ids.insert(stored, symbol)?;
        self.strings.push(stored);
        Ok(symbol)
    }

    /// Symbol of an already-interned string.
    pub fn get(&self, s: &str) -> Option<Symbol> {
        self.ids
            .get_with(fnv1a64(s.as_bytes()), |k| k.as_bytes() == s.as_bytes())
            .map(|(_, symbol)| *symbol)
    }

    /// Text of a symbol, borrowed from the arena.
    pub fn resolve(&self, symbol: Symbol) -> Option<&'a str> {
        self.strings.get(symbol.index()).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
    }
}
