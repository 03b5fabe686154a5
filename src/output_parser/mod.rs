//! # Response Parser
//!
//! Turns raw model output into a JSON value. Handles reasoning blocks,
//! markdown fences, surrounding prose, and common almost-JSON mistakes
//! without another model call. Purely syntactic.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`ResponseParser`] | Extract a JSON value, optionally repairing it |
//! | [`parse_json_value`] | Shorthand with the default strict parser |
//! | [`parse_choice`] | Pick one option (e.g. a schema id) out of an answer |
//! | [`strip_think_tags`] | Remove `<think>` blocks |
//! | [`try_repair_json`] | Fix common model JSON errors |

pub mod choice;
pub mod error;
pub mod extract;
pub mod json;
pub mod repair;

pub use choice::parse_choice;
pub use error::ParseError;
pub use extract::{preprocess, strip_think_tags};
pub use json::{parse_json_value, ParsedResponse, ResponseParser};
pub use repair::try_repair_json;
