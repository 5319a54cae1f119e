//! The question-answering agent: model output parsing, the guarded tool set,
//! and the bounded step loop that ties them together.

pub mod evidence;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod runner;
pub mod tools;
pub mod validator;
