use super::value::Value;

/// Byte range of a syntax node in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Node kinds produced by the (external) parser.
#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxKind {
    Literal(Value),
    /// A local variable, or a type name used as a static call target.
    Ident(String),
    /// Local declaration; optional single child is the initializer.
    Let { name: String, ty: String },
    /// `children[0] = children[1]`
    Assign,
    /// Statements evaluated in order; the value is the last statement's.
    Block,
    /// Explicit conversion of `children[0]`.
    Cast { ty: String },
    /// `children[0].name`
    Field { name: String },
    /// `children[0][children[1]]`
    Index,
    /// Unqualified call of a module function; children are the arguments.
    Call { name: String },
    /// `children[0].name(children[1..])`
    MemberCall { name: String },
}

/// A pre-parsed syntax node with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub kind: SyntaxKind,
    pub span: Span,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    #[must_use]
    pub fn new(kind: SyntaxKind, children: Vec<SyntaxNode>) -> Self {
        Self {
            kind,
            span: Span::default(),
            children,
        }
    }

    /// Set the source location.
    #[must_use]
    pub fn at(mut self, start: usize, end: usize) -> Self {
        self.span = Span::new(start, end);
        self
    }

    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::new(SyntaxKind::Literal(value.into()), vec![])
    }

    #[must_use]
    pub fn ident(name: &str) -> Self {
        Self::new(SyntaxKind::Ident(name.to_owned()), vec![])
    }

    #[must_use]
    pub fn let_(name: &str, ty: &str, init: Option<SyntaxNode>) -> Self {
        Self::new(
            SyntaxKind::Let {
                name: name.to_owned(),
                ty: ty.to_owned(),
            },
            init.into_iter().collect(),
        )
    }

    #[must_use]
    pub fn assign(target: SyntaxNode, value: SyntaxNode) -> Self {
        Self::new(SyntaxKind::Assign, vec![target, value])
    }

    #[must_use]
    pub fn block(statements: Vec<SyntaxNode>) -> Self {
        Self::new(SyntaxKind::Block, statements)
    }

    #[must_use]
    pub fn cast(ty: &str, operand: SyntaxNode) -> Self {
        Self::new(SyntaxKind::Cast { ty: ty.to_owned() }, vec![operand])
    }

    #[must_use]
    pub fn field(target: SyntaxNode, name: &str) -> Self {
        Self::new(
            SyntaxKind::Field {
                name: name.to_owned(),
            },
            vec![target],
        )
    }

    #[must_use]
    pub fn index(array: SyntaxNode, index: SyntaxNode) -> Self {
        Self::new(SyntaxKind::Index, vec![array, index])
    }

    #[must_use]
    pub fn call(name: &str, args: Vec<SyntaxNode>) -> Self {
        Self::new(
            SyntaxKind::Call {
                name: name.to_owned(),
            },
            args,
        )
    }

    #[must_use]
    pub fn member_call(target: SyntaxNode, name: &str, args: Vec<SyntaxNode>) -> Self {
        let mut children = Vec::with_capacity(args.len() + 1);
        children.push(target);
        children.extend(args);
        Self::new(
            SyntaxKind::MemberCall {
                name: name.to_owned(),
            },
            children,
        )
    }
}
