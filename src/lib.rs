//! # mail-forge – Nunjucks email template compiler
//!
//! Turns author-facing email templates into client-safe HTML while leaving
//! the template syntax (`{{ … }}`, `{% … %}`) in place for the runtime
//! renderer. The pipeline stages are:
//!
//! 1. **Layouts** – resolve `extends`/`block` inheritance ([`layout`])
//! 2. **Includes** – splice partials, cycle-safe and root-confined ([`include`])
//! 3. **Protect** – hide template syntax behind placeholders ([`guard`])
//! 4. **Normalize** – rewrite `<container>`, `<row>`, `<columns>` and
//!    `<button>` into table markup ([`normalize`], over [`dom`])
//! 5. **Inline CSS** – write stylesheet rules onto elements ([`style`])
//! 6. **Restore** – put the template syntax back ([`guard`])
//!
//! [`pipeline::Compiler`] runs the stages for one template or a whole source
//! tree.

pub mod config;
pub mod dom;
pub mod error;
pub mod guard;
pub mod include;
pub mod layout;
pub mod normalize;
pub mod pipeline;
pub mod style;
pub mod template;
pub mod templates;

// Re-exports for convenience
pub use config::CompileConfig;
pub use error::{CompileError, RenderDegraded};
pub use pipeline::{BatchReport, CompiledOutput, Compiler};
