use std::fmt;

/// Fractional bits of the fixed-point representation used for `float` and
/// `double`.
pub const FIXED_FRACTION_BITS: u8 = 16;

/// Convert a decimal literal to 16.16 fixed-point, truncating toward zero.
pub fn to_fixed(value: f64) -> i32 {
    (value * (1u32 << FIXED_FRACTION_BITS) as f64) as i32
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Char,
    Short,
    Long,
    Float,
    Double,
    Void,
}

impl ValueType {
    /// `float` and `double` are stored as fixed-point words.
    pub fn is_fixed(self) -> bool {
        matches!(self, ValueType::Float | ValueType::Double)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Int => "int",
            ValueType::Char => "char",
            ValueType::Short => "short",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::Void => "void",
        };
        write!(f, "{s}")
    }
}

/// A declared type: base type plus pointer depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSpec {
    pub base: ValueType,
    pub refs: u8,
}

impl TypeSpec {
    pub fn new(base: ValueType, refs: u8) -> Self {
        Self { base, refs }
    }

    pub fn is_void(&self) -> bool {
        self.base == ValueType::Void && self.refs == 0
    }

    /// Fixed-point only applies to non-pointer values.
    pub fn is_fixed(&self) -> bool {
        self.refs == 0 && self.base.is_fixed()
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, "*".repeat(self.refs as usize))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeSpec,
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    Xor,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::LogicalAnd | BinOp::LogicalOr)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::LogicalAnd => "&&",
            BinOp::LogicalOr => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Deref,
    Ref,
    Not,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Deref => "*",
            UnOp::Ref => "&",
            UnOp::Not => "!",
        }
    }
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }
}

/// Per-occurrence liveness hint on identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Liveness {
    /// The most recent textual use seen so far.
    #[default]
    LastUse,
    /// A later occurrence of the same name exists.
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ── Expressions ─────────────────────────────────────────────────────
    Int(i32),
    /// Fixed-point literal, already scaled.
    Fixed(i32),
    Ident(String),
    Binary {
        op: BinOp,
        left: NodeId,
        right: NodeId,
    },
    /// `target = value`, or `target op= value` when `op` is set.
    Assign {
        op: Option<BinOp>,
        target: NodeId,
        value: NodeId,
    },
    Unary {
        op: UnOp,
        operand: NodeId,
    },
    Call {
        name: String,
        args: Vec<NodeId>,
    },
    Index {
        name: String,
        indices: Vec<NodeId>,
    },

    // ── Statements ──────────────────────────────────────────────────────
    Define {
        name: String,
        ty: TypeSpec,
        value: Option<NodeId>,
    },
    ArrayDef {
        name: String,
        ty: TypeSpec,
        dims: Vec<usize>,
        init: Vec<NodeId>,
    },
    Function {
        name: String,
        ret: TypeSpec,
        params: Vec<Param>,
        /// `None` for a header-only declaration.
        body: Option<Vec<NodeId>>,
        inline: bool,
    },
    If {
        branches: Vec<(NodeId, Vec<NodeId>)>,
        otherwise: Option<Vec<NodeId>>,
    },
    While {
        cond: NodeId,
        body: Vec<NodeId>,
    },
    For {
        init: Option<NodeId>,
        cond: Option<NodeId>,
        step: Option<NodeId>,
        body: Vec<NodeId>,
    },
    Return(Option<NodeId>),
    Break,
    Continue,
    Asm(String),
    Group(Vec<NodeId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub line: usize,
    pub track: Liveness,
}

/// Owns every node of one translation unit.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind, line: usize) -> NodeId {
        self.nodes.push(Node {
            kind,
            line,
            track: Liveness::default(),
        });
        NodeId((self.nodes.len() - 1) as u32)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn line(&self, id: NodeId) -> usize {
        self.node(id).line
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render an expression with full parenthesisation, for diagnostics and
    /// tests.
    pub fn render(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Int(n) => n.to_string(),
            NodeKind::Fixed(n) => format!("{}f", *n as f64 / 65536.0),
            NodeKind::Ident(name) => name.clone(),
            NodeKind::Binary { op, left, right } => {
                format!("({} {} {})", self.render(*left), op.symbol(), self.render(*right))
            }
            NodeKind::Assign { op, target, value } => format!(
                "({} {}= {})",
                self.render(*target),
                op.map_or("", |o| o.symbol()),
                self.render(*value)
            ),
            NodeKind::Unary { op, operand } => {
                format!("{}{}", op.symbol(), self.render(*operand))
            }
            NodeKind::Call { name, args } => {
                let args: Vec<String> = args.iter().map(|a| self.render(*a)).collect();
                format!("{name}({})", args.join(", "))
            }
            NodeKind::Index { name, indices } => {
                let mut s = name.clone();
                for i in indices {
                    s.push_str(&format!("[{}]", self.render(*i)));
                }
                s
            }
            other => format!("<{}>", statement_name(other)),
        }
    }
}

fn statement_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Define { .. } => "define",
        NodeKind::ArrayDef { .. } => "array",
        NodeKind::Function { .. } => "function",
        NodeKind::If { .. } => "if",
        NodeKind::While { .. } => "while",
        NodeKind::For { .. } => "for",
        NodeKind::Return(_) => "return",
        NodeKind::Break => "break",
        NodeKind::Continue => "continue",
        NodeKind::Asm(_) => "asm",
        NodeKind::Group(_) => "group",
        _ => "expr",
    }
}

/// Output of the statement parser.
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    pub ast: Ast,
    pub statements: Vec<NodeId>,
}

impl ParsedProgram {
    /// Reorder top-level statements so straight-line code runs first:
    /// non-inline function definitions move to the end (in source order),
    /// followed by a call to `main` when one is defined.
    pub fn order_for_codegen(&mut self) {
        let (mut code, functions): (Vec<NodeId>, Vec<NodeId>) =
            self.statements.iter().partition(|&&id| {
                !matches!(
                    self.ast.kind(id),
                    NodeKind::Function { body: Some(_), inline: false, .. }
                )
            });

        let main_line = functions.iter().find_map(|&id| match self.ast.kind(id) {
            NodeKind::Function { name, .. } if name == "main" => Some(self.ast.line(id)),
            _ => None,
        });

        code.extend(functions);
        if let Some(line) = main_line {
            let call = self.ast.add(
                NodeKind::Call {
                    name: "main".to_string(),
                    args: Vec::new(),
                },
                line,
            );
            code.push(call);
        }
        self.statements = code;
    }
}
