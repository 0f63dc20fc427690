//! Strongly typed decision programs.
//!
//! A program is an expression tree over floats and booleans whose root yields
//! the boolean "mitigate?" decision. Trees are generated, recombined and mutated
//! by a [`Language`] that knows the argument signature, and evaluated through a
//! type-checked [`Program`].

use anyhow::{Result, bail};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type flowing along a tree edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Float,
    Bool,
}

/// Argument value passed to a program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn ty(self) -> Type {
        match self {
            Value::Float(_) => Type::Float,
            Value::Bool(_) => Type::Bool,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Value::Float(x) => x,
            Value::Bool(b) => f64::from(u8::from(b)),
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Value::Float(x) => x != 0.0,
            Value::Bool(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Lt,
    Gt,
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Arg { index: usize, ty: Type },
    Float(f64),
    Bool(bool),
    Not(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Logic(LogicOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    IfThenElse(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn output_type(&self) -> Type {
        match self {
            Expr::Arg { ty, .. } => *ty,
            Expr::Float(_) | Expr::Arith(..) => Type::Float,
            Expr::Bool(_)
            | Expr::Not(_)
            | Expr::Logic(..)
            | Expr::Compare(..)
            | Expr::IfThenElse(..) => Type::Bool,
        }
    }

    /// Types expected from the children, in order.
    pub fn input_types(&self) -> &'static [Type] {
        match self {
            Expr::Arg { .. } | Expr::Float(_) | Expr::Bool(_) => &[],
            Expr::Not(_) => &[Type::Bool],
            Expr::Arith(..) | Expr::Compare(..) => &[Type::Float, Type::Float],
            Expr::Logic(..) => &[Type::Bool, Type::Bool],
            Expr::IfThenElse(..) => &[Type::Bool, Type::Bool, Type::Bool],
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Arg { .. } | Expr::Float(_) | Expr::Bool(_) => Vec::new(),
            Expr::Not(a) => vec![a],
            Expr::Arith(_, a, b) | Expr::Logic(_, a, b) | Expr::Compare(_, a, b) => vec![a, b],
            Expr::IfThenElse(c, a, b) => vec![c, a, b],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Arg { .. } | Expr::Float(_) | Expr::Bool(_) => Vec::new(),
            Expr::Not(a) => vec![a.as_mut()],
            Expr::Arith(_, a, b) | Expr::Logic(_, a, b) | Expr::Compare(_, a, b) => {
                vec![a.as_mut(), b.as_mut()]
            }
            Expr::IfThenElse(c, a, b) => vec![c.as_mut(), a.as_mut(), b.as_mut()],
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(|child| child.size()).sum::<usize>()
    }

    /// Depth of the deepest node, a lone terminal having height 0.
    pub fn height(&self) -> usize {
        self.children()
            .iter()
            .map(|child| 1 + child.height())
            .max()
            .unwrap_or(0)
    }

    /// Output types of all nodes in preorder.
    pub fn preorder_types(&self) -> Vec<Type> {
        let mut types = Vec::with_capacity(self.size());
        self.collect_types(&mut types);
        types
    }

    fn collect_types(&self, types: &mut Vec<Type>) {
        types.push(self.output_type());
        for child in self.children() {
            child.collect_types(types);
        }
    }

    /// Subtree rooted at the `idx`-th node in preorder.
    pub fn subtree(&self, mut idx: usize) -> Option<&Expr> {
        if idx == 0 {
            return Some(self);
        }
        idx -= 1;
        for child in self.children() {
            let size = child.size();
            if idx < size {
                return child.subtree(idx);
            }
            idx -= size;
        }
        None
    }

    pub fn subtree_mut(&mut self, mut idx: usize) -> Option<&mut Expr> {
        if idx == 0 {
            return Some(self);
        }
        idx -= 1;
        for child in self.children_mut() {
            let size = child.size();
            if idx < size {
                return child.subtree_mut(idx);
            }
            idx -= size;
        }
        None
    }

    /// Check strict typing against an argument signature, returning the output type.
    pub fn check(&self, signature: &[Type]) -> Result<Type> {
        if let Expr::Arg { index, ty } = *self {
            let Some(&expected) = signature.get(index) else {
                bail!(
                    "argument {index} out of range for arity {}",
                    signature.len()
                );
            };
            if expected != ty {
                bail!("argument {index} is {expected:?}, but used as {ty:?}");
            }
        }
        for (child, &expected) in self.children().into_iter().zip(self.input_types()) {
            let found = child.check(signature)?;
            if found != expected {
                bail!("expected a {expected:?} subtree, but found {found:?}");
            }
        }
        Ok(self.output_type())
    }

    pub fn eval_bool(&self, args: &[Value]) -> bool {
        match self {
            Expr::Arg { index, .. } => args[*index].as_bool(),
            Expr::Bool(b) => *b,
            Expr::Not(a) => !a.eval_bool(args),
            Expr::Logic(LogicOp::And, a, b) => a.eval_bool(args) && b.eval_bool(args),
            Expr::Logic(LogicOp::Or, a, b) => a.eval_bool(args) || b.eval_bool(args),
            Expr::Compare(op, a, b) => {
                let (x, y) = (a.eval_float(args), b.eval_float(args));
                match op {
                    CmpOp::Eq => x == y,
                    CmpOp::Lt => x < y,
                    CmpOp::Gt => x > y,
                }
            }
            Expr::IfThenElse(c, a, b) => {
                if c.eval_bool(args) {
                    a.eval_bool(args)
                } else {
                    b.eval_bool(args)
                }
            }
            Expr::Float(_) | Expr::Arith(..) => self.eval_float(args) != 0.0,
        }
    }

    pub fn eval_float(&self, args: &[Value]) -> f64 {
        match self {
            Expr::Arg { index, .. } => args[*index].as_f64(),
            Expr::Float(x) => *x,
            Expr::Arith(op, a, b) => {
                let (x, y) = (a.eval_float(args), b.eval_float(args));
                match op {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    ArithOp::Mul => x * y,
                }
            }
            _ => f64::from(u8::from(self.eval_bool(args))),
        }
    }

    /// Prefix rendering with argument names, e.g. `or(TRAVELER, gt(DEGREE, 5))`.
    pub fn display<'a>(&'a self, names: &'a [&'a str]) -> Display<'a> {
        Display { expr: self, names }
    }
}

/// Helper returned by [`Expr::display`].
pub struct Display<'a> {
    expr: &'a Expr,
    names: &'a [&'a str],
}

impl fmt::Display for Display<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.expr {
            Expr::Arg { index, .. } => {
                return match self.names.get(*index) {
                    Some(name) => write!(f, "{name}"),
                    None => write!(f, "ARG{index}"),
                };
            }
            Expr::Float(x) => return write!(f, "{x}"),
            Expr::Bool(b) => return write!(f, "{b}"),
            Expr::Not(_) => "not",
            Expr::Arith(ArithOp::Add, ..) => "add",
            Expr::Arith(ArithOp::Sub, ..) => "sub",
            Expr::Arith(ArithOp::Mul, ..) => "mul",
            Expr::Logic(LogicOp::And, ..) => "and",
            Expr::Logic(LogicOp::Or, ..) => "or",
            Expr::Compare(CmpOp::Eq, ..) => "eq",
            Expr::Compare(CmpOp::Lt, ..) => "lt",
            Expr::Compare(CmpOp::Gt, ..) => "gt",
            Expr::IfThenElse(..) => "if_then_else",
        };
        write!(f, "{name}(")?;
        for (i, child) in self.expr.children().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", child.display(self.names))?;
        }
        write!(f, ")")
    }
}

/// A type-checked boolean program bound to an argument signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    expr: Expr,
    signature: Vec<Type>,
}

impl Program {
    pub fn compile(expr: Expr, signature: &[Type]) -> Result<Self> {
        let ty = expr.check(signature)?;
        if ty != Type::Bool {
            bail!("program must yield a Bool decision, but yields {ty:?}");
        }
        Ok(Self {
            expr,
            signature: signature.to_vec(),
        })
    }

    /// Program that ignores its arguments and always returns `decision`.
    pub fn constant(decision: bool, signature: &[Type]) -> Self {
        Self {
            expr: Expr::Bool(decision),
            signature: signature.to_vec(),
        }
    }

    pub fn signature(&self) -> &[Type] {
        &self.signature
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn decide(&self, args: &[Value]) -> bool {
        debug_assert_eq!(args.len(), self.signature.len());
        self.expr.eval_bool(args)
    }
}

/// Tree generation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Every branch reaches the sampled height.
    Full,
    /// Branches may stop early at a terminal.
    Grow,
}

#[derive(Debug, Clone, Copy)]
enum Primitive {
    Arith(ArithOp),
    Logic(LogicOp),
    Not,
    Compare(CmpOp),
    IfThenElse,
}

const FLOAT_PRIMITIVES: [Primitive; 3] = [
    Primitive::Arith(ArithOp::Add),
    Primitive::Arith(ArithOp::Sub),
    Primitive::Arith(ArithOp::Mul),
];

const BOOL_PRIMITIVES: [Primitive; 7] = [
    Primitive::Logic(LogicOp::And),
    Primitive::Logic(LogicOp::Or),
    Primitive::Not,
    Primitive::Compare(CmpOp::Eq),
    Primitive::Compare(CmpOp::Lt),
    Primitive::Compare(CmpOp::Gt),
    Primitive::IfThenElse,
];

#[derive(Debug, Clone, Copy)]
enum Terminal {
    Arg(usize),
    /// Uniform real constant in `[0, 1000)`.
    RandFloat,
    /// Uniform integer constant in `[0, 33]`.
    RandInt,
    Bool(bool),
}

const RAND_FLOAT_MAX: f64 = 1000.0;
const RAND_INT_MAX: u32 = 33;

/// Primitive set over a fixed argument signature.
#[derive(Debug, Clone)]
pub struct Language {
    signature: Vec<Type>,
    float_terminals: Vec<Terminal>,
    bool_terminals: Vec<Terminal>,
    terminal_ratio: f64,
}

impl Language {
    pub fn new(signature: &[Type]) -> Self {
        let mut float_terminals = vec![Terminal::RandFloat, Terminal::RandInt];
        let mut bool_terminals = vec![Terminal::Bool(false), Terminal::Bool(true)];
        for (index, &ty) in signature.iter().enumerate() {
            match ty {
                Type::Float => float_terminals.push(Terminal::Arg(index)),
                Type::Bool => bool_terminals.push(Terminal::Arg(index)),
            }
        }
        let n_terminals = (float_terminals.len() + bool_terminals.len()) as f64;
        let n_primitives = (FLOAT_PRIMITIVES.len() + BOOL_PRIMITIVES.len()) as f64;
        Self {
            signature: signature.to_vec(),
            terminal_ratio: n_terminals / (n_terminals + n_primitives),
            float_terminals,
            bool_terminals,
        }
    }

    /// Generate a tree of type `ty` with height sampled uniformly in `min_depth..=max_depth`.
    pub fn generate<R: Rng>(
        &self,
        ty: Type,
        min_depth: usize,
        max_depth: usize,
        method: Method,
        rng: &mut R,
    ) -> Expr {
        let height = rng.random_range(min_depth..=max_depth);
        self.grow_node(ty, 0, min_depth, height, method, rng)
    }

    /// Ramped half-and-half: grow or full with equal probability.
    pub fn half_and_half<R: Rng>(&self, min_depth: usize, max_depth: usize, rng: &mut R) -> Expr {
        let method = if rng.random_bool(0.5) {
            Method::Grow
        } else {
            Method::Full
        };
        self.generate(Type::Bool, min_depth, max_depth, method, rng)
    }

    fn grow_node<R: Rng>(
        &self,
        ty: Type,
        depth: usize,
        min_depth: usize,
        height: usize,
        method: Method,
        rng: &mut R,
    ) -> Expr {
        let stop = match method {
            Method::Full => depth >= height,
            Method::Grow => {
                depth >= height || (depth >= min_depth && rng.random::<f64>() < self.terminal_ratio)
            }
        };
        if stop {
            return self.terminal(ty, rng);
        }

        let primitives: &[Primitive] = match ty {
            Type::Float => &FLOAT_PRIMITIVES,
            Type::Bool => &BOOL_PRIMITIVES,
        };
        let primitive = primitives[rng.random_range(0..primitives.len())];
        let sub = |ty: Type, rng: &mut R| {
            Box::new(self.grow_node(ty, depth + 1, min_depth, height, method, rng))
        };
        match primitive {
            Primitive::Arith(op) => {
                Expr::Arith(op, sub(Type::Float, rng), sub(Type::Float, rng))
            }
            Primitive::Logic(op) => Expr::Logic(op, sub(Type::Bool, rng), sub(Type::Bool, rng)),
            Primitive::Not => Expr::Not(sub(Type::Bool, rng)),
            Primitive::Compare(op) => {
                Expr::Compare(op, sub(Type::Float, rng), sub(Type::Float, rng))
            }
            Primitive::IfThenElse => Expr::IfThenElse(
                sub(Type::Bool, rng),
                sub(Type::Bool, rng),
                sub(Type::Bool, rng),
            ),
        }
    }

    fn terminal<R: Rng>(&self, ty: Type, rng: &mut R) -> Expr {
        let terminals = match ty {
            Type::Float => &self.float_terminals,
            Type::Bool => &self.bool_terminals,
        };
        match terminals[rng.random_range(0..terminals.len())] {
            Terminal::Arg(index) => Expr::Arg {
                index,
                ty: self.signature[index],
            },
            Terminal::RandFloat => Expr::Float(rng.random::<f64>() * RAND_FLOAT_MAX),
            Terminal::RandInt => Expr::Float(f64::from(rng.random_range(0..=RAND_INT_MAX))),
            Terminal::Bool(b) => Expr::Bool(b),
        }
    }

    /// Swap two randomly chosen non-root subtrees of the same output type.
    ///
    /// Returns `false`, leaving both trees untouched, if they share no such type.
    pub fn crossover<R: Rng>(&self, a: &mut Expr, b: &mut Expr, rng: &mut R) -> bool {
        let types_a = a.preorder_types();
        let types_b = b.preorder_types();
        let common: Vec<Type> = [Type::Float, Type::Bool]
            .into_iter()
            .filter(|ty| types_a[1..].contains(ty) && types_b[1..].contains(ty))
            .collect();
        let Some(&ty) = common.choose(rng) else {
            return false;
        };

        let pick = |types: &[Type], rng: &mut R| {
            let idxs: Vec<usize> = (1..types.len()).filter(|&i| types[i] == ty).collect();
            idxs[rng.random_range(0..idxs.len())]
        };
        let idx_a = pick(&types_a, rng);
        let idx_b = pick(&types_b, rng);
        match (a.subtree_mut(idx_a), b.subtree_mut(idx_b)) {
            (Some(sub_a), Some(sub_b)) => {
                std::mem::swap(sub_a, sub_b);
                true
            }
            _ => false,
        }
    }

    /// Replace a random subtree with a fresh full tree of the same type.
    pub fn mutate<R: Rng>(&self, expr: &mut Expr, max_depth: usize, rng: &mut R) {
        let idx = rng.random_range(0..expr.size());
        if let Some(node) = expr.subtree_mut(idx) {
            let ty = node.output_type();
            *node = self.generate(ty, 0, max_depth, Method::Full, rng);
        }
    }
}
