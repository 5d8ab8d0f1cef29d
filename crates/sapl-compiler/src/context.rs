//! Compile-time state.
//!
//! A `CompilationContext` lives for the compilation of one configuration.
//! Import tables are reset per document and local definitions are scoped, so
//! nothing one document binds is visible to the next.

use std::collections::HashMap;
use std::sync::Arc;

use sapl_core::ast::{Document, Import, is_reserved_identifier};
use sapl_core::{
    AuthorizationSubscription, CompileError, CompiledExpression, EvaluationContext, FunctionBroker, SourceLocation,
};

use crate::Result;

pub struct CompilationContext {
    pdp_id: String,
    configuration_id: String,
    function_broker: Option<Arc<dyn FunctionBroker>>,
    document_name: Option<String>,
    function_imports: HashMap<String, String>,
    library_aliases: HashMap<String, String>,
    scopes: Vec<HashMap<String, CompiledExpression>>,
    relative_depth: usize,
    ordinal: usize,
}

impl CompilationContext {
    pub fn new(pdp_id: impl Into<String>, configuration_id: impl Into<String>) -> Self {
        Self {
            pdp_id: pdp_id.into(),
            configuration_id: configuration_id.into(),
            function_broker: None,
            document_name: None,
            function_imports: HashMap::new(),
            library_aliases: HashMap::new(),
            scopes: Vec::new(),
            relative_depth: 0,
            ordinal: 0,
        }
    }

    /// Enables constant folding of function calls.
    #[must_use]
    pub fn with_function_broker(mut self, broker: Arc<dyn FunctionBroker>) -> Self {
        self.function_broker = Some(broker);
        self
    }

    #[must_use]
    pub fn pdp_id(&self) -> &str {
        &self.pdp_id
    }

    #[must_use]
    pub fn configuration_id(&self) -> &str {
        &self.configuration_id
    }

    #[must_use]
    pub fn document_name(&self) -> Option<&str> {
        self.document_name.as_deref()
    }

    /// Hands out document-order ordinals for voters.
    pub fn next_ordinal(&mut self) -> usize {
        let ordinal = self.ordinal;
        self.ordinal += 1;
        ordinal
    }

    // =========================================================================
    // Documents and imports
    // =========================================================================

    /// Resets per-document state and installs the document's imports.
    pub fn enter_document(&mut self, document: &Document) -> Result<()> {
        self.document_name = Some(document.name().to_string());
        self.function_imports.clear();
        self.library_aliases.clear();
        self.scopes.clear();
        self.relative_depth = 0;

        let location = document.location().clone();
        for import in &document.imports {
            match import {
                Import::Function {
                    library,
                    function,
                    alias,
                } => {
                    let short = alias.clone().unwrap_or_else(|| function.clone());
                    self.bind_import(&location, short, format!("{library}.{function}"))?;
                }
                Import::Library { library, alias } => {
                    if self.library_aliases.contains_key(alias) || self.function_imports.contains_key(alias) {
                        return Err(CompileError::name_collision(
                            &location,
                            format!("Import alias '{alias}' is already bound"),
                        ));
                    }
                    self.library_aliases.insert(alias.clone(), library.clone());
                }
            }
        }
        Ok(())
    }

    fn bind_import(&mut self, location: &SourceLocation, short: String, qualified: String) -> Result<()> {
        if self.function_imports.contains_key(&short) || self.library_aliases.contains_key(&short) {
            return Err(CompileError::name_collision(
                location,
                format!("Import '{qualified}' collides with an earlier import of '{short}'"),
            ));
        }
        self.function_imports.insert(short, qualified);
        Ok(())
    }

    /// Fully qualified name for a function or attribute identifier.
    pub fn resolve_name(&self, name: &str) -> String {
        if let Some(qualified) = self.function_imports.get(name) {
            return qualified.clone();
        }
        if let Some((prefix, rest)) = name.split_once('.')
            && let Some(library) = self.library_aliases.get(prefix)
        {
            return format!("{library}.{rest}");
        }
        name.to_string()
    }

    // =========================================================================
    // Local definitions
    // =========================================================================

    /// Runs `body` with a fresh scope for local definitions.
    pub fn scoped<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.scopes.push(HashMap::new());
        let result = body(self);
        self.scopes.pop();
        result
    }

    pub fn define_local(
        &mut self,
        name: &str,
        value: CompiledExpression,
        location: &SourceLocation,
    ) -> Result<()> {
        if is_reserved_identifier(name) {
            return Err(CompileError::reserved_identifier(location, name));
        }
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string(), value);
                Ok(())
            }
            None => Err(CompileError::invariant(format!(
                "definition of '{name}' outside of any scope"
            ))),
        }
    }

    /// Innermost local definition of `name`.
    pub fn lookup_local(&self, name: &str) -> Option<&CompiledExpression> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // =========================================================================
    // Relative scope
    // =========================================================================

    /// Runs `body` in a position where `@` and `#` are bound.
    pub fn relative<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.relative_depth += 1;
        let result = body(self);
        self.relative_depth -= 1;
        result
    }

    #[must_use]
    pub fn relative_allowed(&self) -> bool {
        self.relative_depth > 0
    }

    // =========================================================================
    // Constant folding
    // =========================================================================

    /// Context for evaluating constant sub-expressions at compile time.
    ///
    /// Only available with a function broker. The subscription is empty, so
    /// callers must only fold expressions that do not read it.
    pub fn folding_context(&self) -> Option<EvaluationContext> {
        let broker = self.function_broker.clone()?;
        let subscription = AuthorizationSubscription::new(
            sapl_core::Value::UNDEFINED,
            sapl_core::Value::UNDEFINED,
            sapl_core::Value::UNDEFINED,
        );
        Some(
            EvaluationContext::builder(subscription)
                .pdp_id(&self.pdp_id)
                .configuration_id(&self.configuration_id)
                .function_broker(broker)
                .build(),
        )
    }
}
