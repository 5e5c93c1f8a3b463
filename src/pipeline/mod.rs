//! Candidate production: specification, synthesis, validation and repair.

pub mod enhance;
pub mod fallback;
pub mod generate;
pub mod quick_fix;
pub mod scene;
pub mod validate;

pub use enhance::{EnhancementError, SceneSpec, SpecEnhancer, TechnicalSpecification};
pub use fallback::create_safe_fallback_scene;
pub use generate::{Candidate, CodeGenerator, GenerationError, RetryInput};
pub use quick_fix::{FixError, QuickFixer};
pub use validate::{validate, IssueCategory, Severity, SeverityCounts, ValidationIssue};
