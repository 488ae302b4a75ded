//! examples of usage of RustedModelKit
/// System construction, code generation and staged solving examples
pub mod sys_examples;
