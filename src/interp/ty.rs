//! The interned type table.
//!
//! Types are created once and referred to by [`TypeId`]; equality is
//! identity of the id. Struct, union and enum types are nominal: they are
//! interned by qualified name and their members are filled in when the
//! declaration body is checked.

use std::collections::HashMap;

/// An interned type. Equality is id equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Void,
    Any,
    Bool,
    Char,
    Int,
    Float,
    Length,
    NullPtr,
    Array {
        elem: TypeId,
        variadic: bool,
    },
    Pointer {
        elem: TypeId,
        mutable: bool,
    },
    Optional {
        elem: TypeId,
    },
    Function {
        params: Vec<TypeId>,
        ret: TypeId,
    },
    Struct {
        name: String,
        fields: Vec<(String, TypeId)>,
    },
    Union {
        name: String,
        /// Each case is a struct type.
        cases: Vec<(String, TypeId)>,
    },
    Enum {
        name: String,
        elem: TypeId,
    },
    TreeInlineObj,
    TreeBlockObj,
    LayoutObj,
    TreeInlineObjRef,
    TreeBlockObjRef,
    LayoutObjRef,
}

// Structural types are deduplicated through this key; nominal types are
// interned by name instead.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum StructuralKey {
    Array(TypeId, bool),
    Pointer(TypeId, bool),
    Optional(TypeId),
    Function(Vec<TypeId>, TypeId),
}

pub struct TypeInterner {
    types: Vec<TypeKind>,
    structural: HashMap<StructuralKey, TypeId>,
    nominal: HashMap<String, TypeId>,
}

macro_rules! primitive_accessors {
    ($($name:ident => $index:expr),* $(,)?) => {
        $(pub fn $name(&self) -> TypeId { TypeId($index) })*
    };
}

impl TypeInterner {
    pub fn new() -> Self {
        // The primitives occupy fixed slots.
        let types = vec![
            TypeKind::Void,
            TypeKind::Any,
            TypeKind::Bool,
            TypeKind::Char,
            TypeKind::Int,
            TypeKind::Float,
            TypeKind::Length,
            TypeKind::NullPtr,
            TypeKind::TreeInlineObj,
            TypeKind::TreeBlockObj,
            TypeKind::LayoutObj,
            TypeKind::TreeInlineObjRef,
            TypeKind::TreeBlockObjRef,
            TypeKind::LayoutObjRef,
        ];
        TypeInterner {
            types,
            structural: HashMap::new(),
            nominal: HashMap::new(),
        }
    }

    primitive_accessors! {
        void => 0,
        any => 1,
        bool_ => 2,
        char_ => 3,
        int => 4,
        float => 5,
        length => 6,
        nullptr => 7,
        tree_inline_obj => 8,
        tree_block_obj => 9,
        layout_obj => 10,
        tree_inline_obj_ref => 11,
        tree_block_obj_ref => 12,
        layout_obj_ref => 13,
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.types[id.0 as usize]
    }

    /// `string` is an alias of `array<char>`.
    pub fn string(&mut self) -> TypeId {
        self.array(self.char_(), false)
    }

    pub fn array(&mut self, elem: TypeId, variadic: bool) -> TypeId {
        self.structural_type(
            StructuralKey::Array(elem, variadic),
            TypeKind::Array { elem, variadic },
        )
    }

    pub fn pointer(&mut self, elem: TypeId, mutable: bool) -> TypeId {
        self.structural_type(
            StructuralKey::Pointer(elem, mutable),
            TypeKind::Pointer { elem, mutable },
        )
    }

    pub fn optional(&mut self, elem: TypeId) -> TypeId {
        self.structural_type(StructuralKey::Optional(elem), TypeKind::Optional { elem })
    }

    pub fn function(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.structural_type(
            StructuralKey::Function(params.clone(), ret),
            TypeKind::Function { params, ret },
        )
    }

    fn structural_type(&mut self, key: StructuralKey, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.structural.get(&key) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(kind);
        self.structural.insert(key, id);
        id
    }

    /// Interns a nominal type; re-interning the same qualified name yields
    /// the same id.
    pub fn declare_struct(&mut self, qualified_name: &str) -> TypeId {
        self.nominal_type(qualified_name, || TypeKind::Struct {
            name: qualified_name.to_string(),
            fields: Vec::new(),
        })
    }

    pub fn declare_union(&mut self, qualified_name: &str) -> TypeId {
        self.nominal_type(qualified_name, || TypeKind::Union {
            name: qualified_name.to_string(),
            cases: Vec::new(),
        })
    }

    pub fn declare_enum(&mut self, qualified_name: &str, elem: TypeId) -> TypeId {
        self.nominal_type(qualified_name, || TypeKind::Enum {
            name: qualified_name.to_string(),
            elem,
        })
    }

    fn nominal_type(&mut self, name: &str, make: impl FnOnce() -> TypeKind) -> TypeId {
        if let Some(&id) = self.nominal.get(name) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(make());
        self.nominal.insert(name.to_string(), id);
        id
    }

    pub fn set_struct_fields(&mut self, id: TypeId, fields: Vec<(String, TypeId)>) {
        if let TypeKind::Struct { fields: slot, .. } = &mut self.types[id.0 as usize] {
            *slot = fields;
        }
    }

    pub fn set_union_cases(&mut self, id: TypeId, cases: Vec<(String, TypeId)>) {
        if let TypeKind::Union { cases: slot, .. } = &mut self.types[id.0 as usize] {
            *slot = cases;
        }
    }

    // Queries.

    pub fn is_string(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Array { elem, variadic: false } if *elem == self.char_()
        )
    }

    pub fn array_element(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Array { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    pub fn pointer_element(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    pub fn optional_element(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Optional { elem } => Some(*elem),
            _ => None,
        }
    }

    pub fn struct_fields(&self, id: TypeId) -> Option<&[(String, TypeId)]> {
        match self.kind(id) {
            TypeKind::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn union_cases(&self, id: TypeId) -> Option<&[(String, TypeId)]> {
        match self.kind(id) {
            TypeKind::Union { cases, .. } => Some(cases),
            _ => None,
        }
    }

    pub fn enum_element(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Enum { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// Tree and layout objects may not be implicitly copied.
    pub fn is_cloneable(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::TreeInlineObj | TypeKind::TreeBlockObj | TypeKind::LayoutObj => false,
            TypeKind::Array { elem, .. } | TypeKind::Optional { elem } => self.is_cloneable(*elem),
            TypeKind::Struct { fields, .. } => {
                fields.iter().all(|(_, ty)| self.is_cloneable(*ty))
            }
            _ => true,
        }
    }

    /// A human-readable rendering for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        match self.kind(id) {
            TypeKind::Void => "void".to_string(),
            TypeKind::Any => "any".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Char => "char".to_string(),
            TypeKind::Int => "int".to_string(),
            TypeKind::Float => "float".to_string(),
            TypeKind::Length => "length".to_string(),
            TypeKind::NullPtr => "nullptr".to_string(),
            TypeKind::Array { .. } if self.is_string(id) => "string".to_string(),
            TypeKind::Array { elem, variadic } => {
                let suffix = if *variadic { "..." } else { "" };
                format!("[{}{}]", self.display(*elem), suffix)
            }
            TypeKind::Pointer { elem, mutable } => {
                if *mutable {
                    format!("&mut {}", self.display(*elem))
                } else {
                    format!("&{}", self.display(*elem))
                }
            }
            TypeKind::Optional { elem } => format!("?{}", self.display(*elem)),
            TypeKind::Function { params, ret } => {
                let params: Vec<String> = params.iter().map(|&p| self.display(p)).collect();
                format!("fn({}) -> {}", params.join(", "), self.display(*ret))
            }
            TypeKind::Struct { name, .. }
            | TypeKind::Union { name, .. }
            | TypeKind::Enum { name, .. } => name.clone(),
            TypeKind::TreeInlineObj => "inline object".to_string(),
            TypeKind::TreeBlockObj => "block object".to_string(),
            TypeKind::LayoutObj => "layout object".to_string(),
            TypeKind::TreeInlineObjRef => "&inline object".to_string(),
            TypeKind::TreeBlockObjRef => "&block object".to_string(),
            TypeKind::LayoutObjRef => "&layout object".to_string(),
        }
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_identity() {
        let mut types = TypeInterner::new();
        let a = types.array(types.int(), false);
        let b = types.array(types.int(), false);
        assert_eq!(a, b);

        let c = types.array(types.int(), true);
        assert_ne!(a, c);

        let p1 = types.pointer(types.int(), false);
        let p2 = types.pointer(types.int(), true);
        assert_ne!(p1, p2);
    }

    #[test]
    fn string_is_array_of_char() {
        let mut types = TypeInterner::new();
        let s = types.string();
        assert!(types.is_string(s));
        let ac = types.array(types.char_(), false);
        assert_eq!(s, ac);
    }

    #[test]
    fn nominal_interning_and_fields() {
        let mut types = TypeInterner::new();
        let s1 = types.declare_struct("S");
        let s2 = types.declare_struct("S");
        assert_eq!(s1, s2);

        types.set_struct_fields(s1, vec![("a".to_string(), types.int())]);
        assert_eq!(types.struct_fields(s1).unwrap().len(), 1);
    }

    #[test]
    fn cloneability() {
        let mut types = TypeInterner::new();
        assert!(types.is_cloneable(types.int()));
        assert!(!types.is_cloneable(types.tree_block_obj()));
        let arr = types.array(types.tree_inline_obj(), false);
        assert!(!types.is_cloneable(arr));
    }
}
