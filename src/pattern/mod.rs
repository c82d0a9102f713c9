//! Compile Phase
//!
//! Everything that runs once per generation request: template compilation,
//! the ban-list automaton, and assembly of the wire constraint.
//!
//! # Architecture
//!
//! ```text
//! template ──> parser ──> TemplateCompiler ──┐
//!                                            ├──> Assembler ──> WireConstraint
//! ban list ──> BanList::compile ─────────────┤
//! base text ──> select_overlap ──> suffix ───┘
//! ```
//!
//! [`plan_constraint`] runs the whole pipeline and also produces the
//! runtime matchers the stream side needs (prefix, head, overlap).

pub mod assembler;
pub mod banlist;
pub mod compiler;
pub mod dialect;
pub mod newline;

use std::fmt;

pub use assembler::{
    widen_newlines, Assembler, AssemblyError, AssemblyOptions, CompiledConstraint,
    ContinuationToken, Fallback, WireConstraint,
};
pub use banlist::BanList;
pub use compiler::{
    compile_template, CompileError, CompileOptions, CompiledTemplate, TemplateCompiler,
};
pub use dialect::{Capabilities, Dialect, QuoteMode, Syntax};
pub use newline::{choose_newline_token, decode_newlines, encode_newlines};

use crate::config::PrefillConfig;
use crate::slot::Template;
use crate::stream::reconcile::select_overlap;

/// A condition that was repaired during the compile phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A slot was replaced by the permissive pattern
    DegradedSlot(CompileError),
    /// The ban list could not be turned into a pattern
    BanListDropped { phrases: usize },
    /// The assembled pattern was replaced
    AssemblyFallback { fallback: Fallback, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DegradedSlot(err) => write!(f, "{} (slot matches any text)", err),
            Diagnostic::BanListDropped { phrases } => {
                write!(f, "ban list of {} phrases was not applied", phrases)
            }
            Diagnostic::AssemblyFallback { fallback, reason } => {
                write!(f, "pattern replaced by {:?} fallback: {}", fallback, reason)
            }
        }
    }
}

/// Runtime view of the continuation anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapPlan {
    /// Trailing slice of the base text the model is asked to repeat
    pub text: String,
    /// Unanchored runtime pattern for `text`
    pub pattern: String,
}

/// Everything one generation request needs
#[derive(Debug, Clone)]
pub struct ConstraintPlan {
    pub template: Template,
    pub newline_token: String,
    /// Template as sent to the provider
    pub compiled: CompiledTemplate,
    pub constraint: CompiledConstraint,
    pub wire: WireConstraint,
    /// Template pattern for decoded text (straight quotes, real newlines)
    pub runtime_pattern: String,
    /// Same, for the spans before the first keep marker
    pub runtime_head: String,
    pub overlap: Option<OverlapPlan>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ConstraintPlan {
    pub fn curly_quotes(&self) -> bool {
        self.compiled.curly_quotes
    }
}

/// Compile a template (and optional continuation base) into a constraint.
///
/// Never fails: degraded slots, a dropped ban list and assembly fallbacks
/// are reported in [`ConstraintPlan::diagnostics`].
pub fn plan_constraint(
    template_text: &str,
    continuation_base: Option<&str>,
    config: &PrefillConfig,
) -> ConstraintPlan {
    let dialect = config.compiler.dialect;
    let template = Template::parse(template_text);
    let newline_token = choose_newline_token(
        &config.compiler.newline_tokens,
        &[template_text, continuation_base.unwrap_or_default()],
    );
    let mut diagnostics = Vec::new();

    let options = CompileOptions::new(dialect, &newline_token)
        .with_quotes(config.compiler.quote_mode)
        .with_names(&config.compiler.known_names);
    let compiler = TemplateCompiler::new(options.clone());
    let compiled = compiler.compile(&template);
    diagnostics.extend(compiled.degraded.iter().cloned().map(Diagnostic::DegradedSlot));

    let runtime = TemplateCompiler::new(options.with_quotes(QuoteMode::Escaped)).compile(&template);
    let runtime_pattern = widen_newlines(&runtime.pattern, &newline_token);
    let runtime_head = widen_newlines(&runtime.head_pattern, &newline_token);

    let mut suffix = None;
    let overlap = continuation_base.map(|base| {
        let text = select_overlap(base, config.reconcile.overlap_chars).to_string();
        suffix = Some(compiler.syntax().literal(&text, &newline_token));
        let plain = Syntax::new(dialect).literal(&text, &newline_token);
        OverlapPlan {
            pattern: widen_newlines(&plain, &newline_token),
            text,
        }
    });

    let ban_list = config.ban_list();
    let token = match ban_list.compile(dialect) {
        Some(token) => token,
        None => {
            if !ban_list.is_empty() {
                diagnostics.push(Diagnostic::BanListDropped {
                    phrases: ban_list.len(),
                });
            }
            ContinuationToken::any()
        }
    };

    let assembler = Assembler::new(AssemblyOptions {
        dialect,
        min_continuation_chars: config.assembly.min_continuation_chars,
        newline_token: newline_token.clone(),
    });
    let constraint = assembler.assemble(&compiled.pattern, suffix.as_deref(), &token);
    if let Some(fallback) = constraint.fallback {
        let reason = constraint
            .rejected
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();
        diagnostics.push(Diagnostic::AssemblyFallback { fallback, reason });
    }
    let wire = constraint.to_wire(&config.assembly.schema_description);

    log::info!(
        target: "structured_prefill::compile",
        "planned constraint: {} slots, newline token {:?}, {} diagnostics{}",
        template.slots().count(),
        newline_token,
        diagnostics.len(),
        if overlap.is_some() { ", continuation" } else { "" }
    );

    ConstraintPlan {
        template,
        newline_token,
        compiled,
        constraint,
        wire,
        runtime_pattern,
        runtime_head,
        overlap,
        diagnostics,
    }
}
