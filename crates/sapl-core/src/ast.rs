//! Policy abstract syntax tree.
//!
//! This is the input of the compiler. Producing it from document text is
//! the job of a parser outside this workspace; the tree is serde-enabled so
//! pre-parsed documents can be exchanged as JSON.

use serde::{Deserialize, Serialize};

use crate::algorithm::CombiningAlgorithm;
use crate::decision::Decision;
use crate::error::SourceLocation;
use crate::value::Value;

/// Names bound to the parts of the authorization subscription.
pub const SUBSCRIPTION_ELEMENTS: [&str; 4] = ["subject", "action", "resource", "environment"];

/// True for identifiers that can never be redefined.
pub fn is_reserved_identifier(name: &str) -> bool {
    SUBSCRIPTION_ELEMENTS.contains(&name)
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    #[serde(flatten)]
    pub kind: ExpressionKind,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOperator {
    /// Lazy `||`
    Or,
    /// Lazy `&&`
    And,
    /// Eager `|`
    EagerOr,
    /// Eager `&`
    EagerAnd,
    Xor,
    Equal,
    NotEqual,
    /// `=~`
    Regex,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    In,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::EagerOr => "|",
            Self::EagerAnd => "&",
            Self::Xor => "^",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::In => "in",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExpressionKind {
    Undefined,
    Literal {
        value: Value,
    },
    Array {
        items: Vec<Expression>,
    },
    Object {
        entries: Vec<ObjectEntry>,
    },
    Identifier {
        name: String,
    },
    /// `@`
    RelativeValue,
    /// `#`
    RelativeLocation,
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    FunctionCall {
        name: String,
        #[serde(default)]
        arguments: Vec<Expression>,
    },
    Path {
        base: Box<Expression>,
        steps: Vec<Step>,
    },
    Filter {
        base: Box<Expression>,
        filter: FilterComponent,
    },
    /// `base :: template`
    Subtemplate {
        base: Box<Expression>,
        template: Box<Expression>,
    },
    /// `<pip.attribute(args)[options]>` and its head variant `|<...>`.
    EnvironmentAttribute {
        finder: AttributeFinder,
        #[serde(default)]
        head: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFinder {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<Expression>,
    #[serde(default)]
    pub options: Option<Box<Expression>>,
}

// =============================================================================
// Steps
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepKind {
    Key {
        key: String,
    },
    EscapedKey {
        key: String,
    },
    Wildcard,
    Index {
        index: i64,
    },
    Slice {
        #[serde(default)]
        from: Option<i64>,
        #[serde(default)]
        to: Option<i64>,
        #[serde(default)]
        step: Option<i64>,
    },
    /// `[(expression)]`, selecting by computed key or index.
    Expression {
        expression: Box<Expression>,
    },
    /// `[?(condition)]`
    Condition {
        condition: Box<Expression>,
    },
    IndexUnion {
        indices: Vec<i64>,
    },
    AttributeUnion {
        keys: Vec<String>,
    },
    RecursiveKey {
        key: String,
    },
    RecursiveWildcard,
    RecursiveIndex {
        index: i64,
    },
    /// `.<pip.attribute(args)[options]>` and `.|<...>`.
    Attribute {
        finder: AttributeFinder,
        #[serde(default)]
        head: bool,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Key { .. } => "key",
            Self::EscapedKey { .. } => "escaped key",
            Self::Wildcard => "wildcard",
            Self::Index { .. } => "index",
            Self::Slice { .. } => "slice",
            Self::Expression { .. } => "expression",
            Self::Condition { .. } => "condition",
            Self::IndexUnion { .. } => "index union",
            Self::AttributeUnion { .. } => "attribute union",
            Self::RecursiveKey { .. } => "recursive key",
            Self::RecursiveWildcard => "recursive wildcard",
            Self::RecursiveIndex { .. } => "recursive index",
            Self::Attribute { .. } => "attribute finder",
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterComponent {
    /// `value |- [each] fn(args)`
    Simple {
        #[serde(default)]
        each: bool,
        function: String,
        #[serde(default)]
        arguments: Vec<Expression>,
    },
    /// `value |- { stmt, ... }`
    Extended { statements: Vec<FilterStatement> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStatement {
    #[serde(default)]
    pub each: bool,
    /// Path relative to the filtered value; empty targets the value itself.
    #[serde(default)]
    pub target: Vec<Step>,
    pub function: String,
    #[serde(default)]
    pub arguments: Vec<Expression>,
    #[serde(default)]
    pub location: SourceLocation,
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entitlement {
    Permit,
    Deny,
}

impl Entitlement {
    pub fn decision(&self) -> Decision {
        match self {
            Self::Permit => Decision::Permit,
            Self::Deny => Decision::Deny,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDefinition {
    pub name: String,
    pub expression: Expression,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "camelCase")]
pub enum Statement {
    /// `var name = expression;`
    Definition(ValueDefinition),
    Condition { expression: Expression },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub name: String,
    pub entitlement: Entitlement,
    #[serde(default)]
    pub target: Option<Expression>,
    #[serde(default)]
    pub body: Vec<Statement>,
    #[serde(default)]
    pub obligations: Vec<Expression>,
    #[serde(default)]
    pub advice: Vec<Expression>,
    #[serde(default)]
    pub transformation: Option<Expression>,
    #[serde(default)]
    pub location: SourceLocation,
}

impl Policy {
    pub fn new(name: impl Into<String>, entitlement: Entitlement) -> Self {
        Self {
            name: name.into(),
            entitlement,
            target: None,
            body: Vec::new(),
            obligations: Vec::new(),
            advice: Vec::new(),
            transformation: None,
            location: SourceLocation::default(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Expression) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.body.push(Statement::Condition {
            expression: condition,
        });
        self
    }

    #[must_use]
    pub fn with_definition(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.body.push(Statement::Definition(ValueDefinition {
            name: name.into(),
            location: expression.location.clone(),
            expression,
        }));
        self
    }

    #[must_use]
    pub fn with_obligation(mut self, obligation: Expression) -> Self {
        self.obligations.push(obligation);
        self
    }

    #[must_use]
    pub fn with_advice(mut self, advice: Expression) -> Self {
        self.advice.push(advice);
        self
    }

    #[must_use]
    pub fn with_transformation(mut self, transformation: Expression) -> Self {
        self.transformation = Some(transformation);
        self
    }

    /// True when obligations, advice or a transformation are present.
    pub fn has_constraints(&self) -> bool {
        !self.obligations.is_empty() || !self.advice.is_empty() || self.transformation.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySet {
    pub name: String,
    pub algorithm: CombiningAlgorithm,
    #[serde(default)]
    pub target: Option<Expression>,
    #[serde(default)]
    pub definitions: Vec<ValueDefinition>,
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "import", rename_all = "camelCase")]
pub enum Import {
    /// `import library.function [as alias]`
    Function {
        library: String,
        function: String,
        #[serde(default)]
        alias: Option<String>,
    },
    /// `import library as alias`
    Library { library: String, alias: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DocumentElement {
    Policy(Policy),
    PolicySet(PolicySet),
}

/// One parsed SAPL document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub imports: Vec<Import>,
    pub element: DocumentElement,
}

impl Document {
    pub fn policy(policy: Policy) -> Self {
        Self {
            imports: Vec::new(),
            element: DocumentElement::Policy(policy),
        }
    }

    pub fn policy_set(policy_set: PolicySet) -> Self {
        Self {
            imports: Vec::new(),
            element: DocumentElement::PolicySet(policy_set),
        }
    }

    #[must_use]
    pub fn with_import(mut self, import: Import) -> Self {
        self.imports.push(import);
        self
    }

    pub fn name(&self) -> &str {
        match &self.element {
            DocumentElement::Policy(policy) => &policy.name,
            DocumentElement::PolicySet(set) => &set.name,
        }
    }

    pub fn target(&self) -> Option<&Expression> {
        match &self.element {
            DocumentElement::Policy(policy) => policy.target.as_ref(),
            DocumentElement::PolicySet(set) => set.target.as_ref(),
        }
    }

    pub fn location(&self) -> &SourceLocation {
        match &self.element {
            DocumentElement::Policy(policy) => &policy.location,
            DocumentElement::PolicySet(set) => &set.location,
        }
    }
}

// =============================================================================
// Construction helpers
// =============================================================================

impl Expression {
    pub fn new(kind: ExpressionKind) -> Self {
        Self {
            kind,
            location: SourceLocation::default(),
        }
    }

    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::new(ExpressionKind::Literal {
            value: value.into(),
        })
    }

    pub fn undefined() -> Self {
        Self::new(ExpressionKind::Undefined)
    }

    pub fn array(items: Vec<Expression>) -> Self {
        Self::new(ExpressionKind::Array { items })
    }

    pub fn object<K: Into<String>>(entries: Vec<(K, Expression)>) -> Self {
        Self::new(ExpressionKind::Object {
            entries: entries
                .into_iter()
                .map(|(key, value)| ObjectEntry {
                    key: key.into(),
                    value,
                })
                .collect(),
        })
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::new(ExpressionKind::Identifier { name: name.into() })
    }

    pub fn relative_value() -> Self {
        Self::new(ExpressionKind::RelativeValue)
    }

    pub fn relative_location() -> Self {
        Self::new(ExpressionKind::RelativeLocation)
    }

    pub fn unary(operator: UnaryOperator, operand: Expression) -> Self {
        Self::new(ExpressionKind::Unary {
            operator,
            operand: Box::new(operand),
        })
    }

    pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Self {
        Self::new(ExpressionKind::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn call(name: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Self::new(ExpressionKind::FunctionCall {
            name: name.into(),
            arguments,
        })
    }

    pub fn path(base: Expression, steps: Vec<Step>) -> Self {
        Self::new(ExpressionKind::Path {
            base: Box::new(base),
            steps,
        })
    }

    pub fn filter(base: Expression, filter: FilterComponent) -> Self {
        Self::new(ExpressionKind::Filter {
            base: Box::new(base),
            filter,
        })
    }

    pub fn subtemplate(base: Expression, template: Expression) -> Self {
        Self::new(ExpressionKind::Subtemplate {
            base: Box::new(base),
            template: Box::new(template),
        })
    }

    pub fn environment_attribute(finder: AttributeFinder, head: bool) -> Self {
        Self::new(ExpressionKind::EnvironmentAttribute { finder, head })
    }
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            location: SourceLocation::default(),
        }
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self::new(StepKind::Key { key: key.into() })
    }

    pub fn index(index: i64) -> Self {
        Self::new(StepKind::Index { index })
    }

    pub fn wildcard() -> Self {
        Self::new(StepKind::Wildcard)
    }

    pub fn slice(from: Option<i64>, to: Option<i64>, step: Option<i64>) -> Self {
        Self::new(StepKind::Slice { from, to, step })
    }

    pub fn condition(condition: Expression) -> Self {
        Self::new(StepKind::Condition {
            condition: Box::new(condition),
        })
    }

    pub fn attribute(finder: AttributeFinder, head: bool) -> Self {
        Self::new(StepKind::Attribute { finder, head })
    }
}

impl AttributeFinder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            options: None,
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<Expression>) -> Self {
        self.arguments = arguments;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Expression) -> Self {
        self.options = Some(Box::new(options));
        self
    }
}

impl FilterComponent {
    pub fn simple(function: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Self::Simple {
            each: false,
            function: function.into(),
            arguments,
        }
    }

    pub fn each(function: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Self::Simple {
            each: true,
            function: function.into(),
            arguments,
        }
    }
}

impl FilterStatement {
    pub fn new(target: Vec<Step>, function: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Self {
            each: false,
            target,
            function: function.into(),
            arguments,
            location: SourceLocation::default(),
        }
    }

    #[must_use]
    pub fn each(mut self) -> Self {
        self.each = true;
        self
    }
}
