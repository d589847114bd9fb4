use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::member::{OpenField, OpenMethod};
use super::value::Value;

/// Registry name of the `null` literal's type.
pub const NULL_TYPE: &str = "null";

/// Built-in primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Int,
    Long,
    Double,
}

impl Primitive {
    pub const ALL: [Primitive; 4] = [
        Primitive::Bool,
        Primitive::Int,
        Primitive::Long,
        Primitive::Double,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "boolean",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Double => "double",
        }
    }

    #[must_use]
    pub fn boxed_name(self) -> &'static str {
        match self {
            Primitive::Bool => "Boolean",
            Primitive::Int => "Integer",
            Primitive::Long => "Long",
            Primitive::Double => "Double",
        }
    }

    /// Position on the numeric widening ladder `int -> long -> double`.
    /// `boolean` is not on the ladder.
    #[must_use]
    pub fn widening_rank(self) -> Option<u32> {
        match self {
            Primitive::Bool => None,
            Primitive::Int => Some(0),
            Primitive::Long => Some(1),
            Primitive::Double => Some(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Primitive(Primitive),
    /// Reference wrapper around a primitive (`Integer` for `int`).
    Boxed(Primitive),
    Reference,
    Array,
    /// Type of the `null` literal, assignable to every non-primitive type.
    Null,
}

/// Type descriptor. Immutable once the registry publishes it behind an `Arc`.
///
/// Identity is the type name: two descriptors with the same name are the same
/// type, which keeps array types built on demand comparable with each other.
#[derive(Debug, Clone)]
pub struct OpenClass {
    name: String,
    kind: ClassKind,
    superclass: Option<Arc<OpenClass>>,
    component: Option<Arc<OpenClass>>,
}

impl OpenClass {
    #[must_use]
    pub fn primitive(p: Primitive) -> Self {
        Self {
            name: p.name().to_owned(),
            kind: ClassKind::Primitive(p),
            superclass: None,
            component: None,
        }
    }

    #[must_use]
    pub fn boxed(p: Primitive, superclass: Option<Arc<OpenClass>>) -> Self {
        Self {
            name: p.boxed_name().to_owned(),
            kind: ClassKind::Boxed(p),
            superclass,
            component: None,
        }
    }

    #[must_use]
    pub fn reference(name: &str, superclass: Option<Arc<OpenClass>>) -> Self {
        Self {
            name: name.to_owned(),
            kind: ClassKind::Reference,
            superclass,
            component: None,
        }
    }

    #[must_use]
    pub fn null() -> Self {
        Self {
            name: NULL_TYPE.to_owned(),
            kind: ClassKind::Null,
            superclass: None,
            component: None,
        }
    }

    #[must_use]
    pub fn array(component: Arc<OpenClass>, superclass: Option<Arc<OpenClass>>) -> Self {
        Self {
            name: format!("{}[]", component.name),
            kind: ClassKind::Array,
            superclass,
            component: Some(component),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    #[must_use]
    pub fn superclass(&self) -> Option<&Arc<OpenClass>> {
        self.superclass.as_ref()
    }

    /// Component type of an array type.
    #[must_use]
    pub fn component(&self) -> Option<&Arc<OpenClass>> {
        self.component.as_ref()
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.kind == ClassKind::Array
    }

    #[must_use]
    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.kind {
            ClassKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.as_primitive().is_some()
    }

    /// Number of superclass hops from `self` up to `ancestor`, or `None` if
    /// `ancestor` is not a proper superclass.
    #[must_use]
    pub fn depth_to(&self, ancestor: &OpenClass) -> Option<u32> {
        let mut depth = 0;
        let mut current = self.superclass.as_deref();
        while let Some(class) = current {
            depth += 1;
            if class == ancestor {
                return Some(depth);
            }
            current = class.superclass.as_deref();
        }
        None
    }

    /// Direct assignability: the actual type is this type, or `null` into a
    /// non-primitive type. Anything else needs a conversion supplied by a
    /// cast resolver.
    #[must_use]
    pub fn is_assignable_from(&self, actual: &OpenClass) -> bool {
        self == actual || (actual.kind == ClassKind::Null && !self.is_primitive())
    }
}

impl PartialEq for OpenClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for OpenClass {}

impl Hash for OpenClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for OpenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Read-only type registry: type identity, array component unwrapping and
/// member enumeration.
///
/// [`TypeRegistry::new()`] pre-registers the built-in lattice: `Object`,
/// `Number`, `String`, the primitives and their boxed forms.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    classes: HashMap<String, Arc<OpenClass>>,
    methods: HashMap<String, Vec<Arc<OpenMethod>>>,
    fields: HashMap<String, Vec<Arc<OpenField>>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(OpenClass::null());
        let object = registry.register(OpenClass::reference("Object", None));
        let number = registry.register(OpenClass::reference("Number", Some(Arc::clone(&object))));
        registry.register(OpenClass::reference("String", Some(Arc::clone(&object))));
        for p in Primitive::ALL {
            registry.register(OpenClass::primitive(p));
            let parent = if p == Primitive::Bool {
                Arc::clone(&object)
            } else {
                Arc::clone(&number)
            };
            registry.register(OpenClass::boxed(p, Some(parent)));
        }
        registry
    }

    /// A registry with no types at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Publish a type. Re-registering a name replaces the earlier descriptor.
    pub fn register(&mut self, class: OpenClass) -> Arc<OpenClass> {
        let class = Arc::new(class);
        self.classes
            .insert(class.name.clone(), Arc::clone(&class));
        class
    }

    /// Look up a type by name. `"T[]"` resolves to the array of `T`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<OpenClass>> {
        if let Some(class) = self.classes.get(name) {
            return Some(Arc::clone(class));
        }
        let component = name.strip_suffix("[]")?;
        self.get(component).map(|c| self.array_of(&c))
    }

    #[must_use]
    pub fn primitive(&self, p: Primitive) -> Option<Arc<OpenClass>> {
        self.get(p.name())
    }

    #[must_use]
    pub fn array_of(&self, component: &Arc<OpenClass>) -> Arc<OpenClass> {
        Arc::new(OpenClass::array(
            Arc::clone(component),
            self.classes.get("Object").cloned(),
        ))
    }

    /// The static type of a literal value.
    #[must_use]
    pub fn type_of(&self, value: &Value) -> Option<Arc<OpenClass>> {
        match value {
            Value::Null => self.get(NULL_TYPE),
            Value::Bool(_) => self.primitive(Primitive::Bool),
            Value::Int(_) => self.primitive(Primitive::Int),
            Value::Float(_) => self.primitive(Primitive::Double),
            Value::String(_) => self.get("String"),
            Value::Array(items) => {
                let component = match items.first() {
                    Some(first) if !first.is_null() => self.type_of(first)?,
                    _ => self.get("Object")?,
                };
                Some(self.array_of(&component))
            }
            Value::Object(obj) => self.get(obj.class()),
        }
    }

    pub fn add_method(&mut self, method: OpenMethod) -> Arc<OpenMethod> {
        let method = Arc::new(method);
        self.methods
            .entry(method.declaring_class().to_owned())
            .or_default()
            .push(Arc::clone(&method));
        method
    }

    pub fn add_field(&mut self, field: OpenField) -> Arc<OpenField> {
        let field = Arc::new(field);
        self.fields
            .entry(field.declaring_class().to_owned())
            .or_default()
            .push(Arc::clone(&field));
        field
    }

    /// Methods named `name` declared on `class` or any of its superclasses,
    /// nearest declaration first.
    #[must_use]
    pub fn methods(&self, class: &OpenClass, name: &str) -> Vec<Arc<OpenMethod>> {
        let mut found = Vec::new();
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(methods) = self.methods.get(c.name()) {
                found.extend(methods.iter().filter(|m| m.name() == name).cloned());
            }
            current = c.superclass().map(|s| &**s);
        }
        found
    }

    #[must_use]
    pub fn field(&self, class: &OpenClass, name: &str) -> Option<Arc<OpenField>> {
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(field) = self
                .fields
                .get(c.name())
                .and_then(|fields| fields.iter().find(|f| f.name() == name))
            {
                return Some(Arc::clone(field));
            }
            current = c.superclass().map(|s| &**s);
        }
        None
    }
}
