// src/analysis/types.rs
//
// Interned type storage using TyId handles for O(1) equality and cheap
// module caches. Every Module owns two arenas: an internal one used while
// checking and an interface one that outlives trimming. Handles are only
// meaningful relative to the arena that produced them; crossing arenas
// goes through `CloneState`.

use hashbrown::HashMap;
use smallvec::SmallVec;

use rustc_hash::FxHashMap;

/// Handle to an interned type within one arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TyId(u32);

impl TyId {
    pub const ERROR: TyId = TyId(0);
    pub const ANY: TyId = TyId(1);
    pub const NIL: TyId = TyId(2);
    pub const BOOLEAN: TyId = TyId(3);
    pub const NUMBER: TyId = TyId(4);
    pub const STRING: TyId = TyId(5);

    pub fn index(self) -> u32 {
        self.0
    }
}

/// SmallVec for type children - inline up to 4 covers most field lists
pub type TyIdVec = SmallVec<[TyId; 4]>;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Ty {
    /// Produced when checking could not determine a type at all.
    Error,
    /// The dynamic type of gradual checking.
    Any,
    Nil,
    Boolean,
    Number,
    String,
    /// Field names are stored sorted so structurally equal tables intern
    /// to the same handle.
    Table(SmallVec<[(String, TyId); 4]>),
    Function {
        params: TyIdVec,
        ret: TyId,
    },
}

/// Per-module interning arena with a freeze flag.
///
/// Freezing marks the arena immutable; it does not copy. Interning into a
/// frozen arena is an internal error.
#[derive(Debug, Clone)]
pub struct TypeArena {
    types: Vec<Ty>,
    dedup: HashMap<Ty, TyId>,
    frozen: bool,
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeArena {
    /// A fresh arena with the primitive types pre-interned at the fixed
    /// `TyId` constants, so primitives are stable across arenas.
    pub fn new() -> Self {
        let mut arena = Self {
            types: Vec::new(),
            dedup: HashMap::new(),
            frozen: false,
        };
        arena.seed_primitives();
        arena
    }

    fn seed_primitives(&mut self) {
        debug_assert!(self.types.is_empty());
        for ty in [
            Ty::Error,
            Ty::Any,
            Ty::Nil,
            Ty::Boolean,
            Ty::Number,
            Ty::String,
        ] {
            let id = TyId(self.types.len() as u32);
            self.dedup.insert(ty.clone(), id);
            self.types.push(ty);
        }
    }

    pub fn intern(&mut self, ty: Ty) -> TyId {
        assert!(!self.frozen, "intern into a frozen type arena");
        if let Some(&id) = self.dedup.get(&ty) {
            return id;
        }
        let id = TyId(self.types.len() as u32);
        self.dedup.insert(ty.clone(), id);
        self.types.push(ty);
        id
    }

    pub fn table(&mut self, mut fields: Vec<(String, TyId)>) -> TyId {
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        self.intern(Ty::Table(fields.into_iter().collect()))
    }

    pub fn function(&mut self, params: TyIdVec, ret: TyId) -> TyId {
        self.intern(Ty::Function { params, ret })
    }

    pub fn get(&self, id: TyId) -> &Ty {
        &self.types[id.0 as usize]
    }

    /// Number of interned types, including the primitive seed.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// Drop everything but the primitive seed. Requires an unfrozen arena.
    pub fn clear(&mut self) {
        assert!(!self.frozen, "clear a frozen type arena");
        self.types.clear();
        self.dedup.clear();
        self.seed_primitives();
    }

    pub fn display(&self, id: TyId) -> String {
        match self.get(id) {
            Ty::Error => "*error-type*".to_string(),
            Ty::Any => "any".to_string(),
            Ty::Nil => "nil".to_string(),
            Ty::Boolean => "boolean".to_string(),
            Ty::Number => "number".to_string(),
            Ty::String => "string".to_string(),
            Ty::Table(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(name, ty)| format!("{}: {}", name, self.display(*ty)))
                    .collect();
                format!("{{ {} }}", inner.join(", "))
            }
            Ty::Function { params, ret } => {
                let inner: Vec<String> = params.iter().map(|p| self.display(*p)).collect();
                format!("({}) -> {}", inner.join(", "), self.display(*ret))
            }
        }
    }
}

/// Records already-cloned handles so shared subtrees clone once and
/// repeated clones of the same source handle are stable.
#[derive(Debug, Default)]
pub struct CloneState {
    map: FxHashMap<TyId, TyId>,
}

impl CloneState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Clone `id` from `src` into `dst`, memoized through `state`.
pub fn clone_ty(src: &TypeArena, id: TyId, dst: &mut TypeArena, state: &mut CloneState) -> TyId {
    if let Some(&mapped) = state.map.get(&id) {
        return mapped;
    }

    let cloned = match src.get(id).clone() {
        ty @ (Ty::Error | Ty::Any | Ty::Nil | Ty::Boolean | Ty::Number | Ty::String) => {
            dst.intern(ty)
        }
        Ty::Table(fields) => {
            let fields = fields
                .into_iter()
                .map(|(name, field)| (name, clone_ty(src, field, dst, state)))
                .collect();
            dst.intern(Ty::Table(fields))
        }
        Ty::Function { params, ret } => {
            let params = params
                .into_iter()
                .map(|p| clone_ty(src, p, dst, state))
                .collect();
            let ret = clone_ty(src, ret, dst, state);
            dst.intern(Ty::Function { params, ret })
        }
    };

    state.map.insert(id, cloned);
    cloned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_stable_across_arenas() {
        let a = TypeArena::new();
        let b = TypeArena::new();
        assert_eq!(a.get(TyId::NUMBER), b.get(TyId::NUMBER));
        assert!(matches!(a.get(TyId::ANY), Ty::Any));
    }

    #[test]
    fn interning_deduplicates() {
        let mut arena = TypeArena::new();
        let t1 = arena.table(vec![("x".into(), TyId::NUMBER)]);
        let t2 = arena.table(vec![("x".into(), TyId::NUMBER)]);
        assert_eq!(t1, t2);
    }

    #[test]
    fn table_fields_are_order_insensitive() {
        let mut arena = TypeArena::new();
        let t1 = arena.table(vec![("a".into(), TyId::NUMBER), ("b".into(), TyId::STRING)]);
        let t2 = arena.table(vec![("b".into(), TyId::STRING), ("a".into(), TyId::NUMBER)]);
        assert_eq!(t1, t2);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn interning_into_a_frozen_arena_panics() {
        let mut arena = TypeArena::new();
        arena.freeze();
        arena.table(vec![]);
    }

    #[test]
    fn clone_rehomes_nested_types() {
        let mut src = TypeArena::new();
        let table = src.table(vec![("n".into(), TyId::NUMBER)]);
        let func = src.function(TyIdVec::from_slice(&[table]), table);

        let mut dst = TypeArena::new();
        let mut state = CloneState::new();
        let cloned = clone_ty(&src, func, &mut dst, &mut state);

        assert_eq!(dst.display(cloned), src.display(func));
        // memoized: cloning again yields the same handle
        assert_eq!(clone_ty(&src, func, &mut dst, &mut state), cloned);
    }
}
