//! XML text helpers shared by the package serializers.

pub mod escape;

pub use escape::{escape_attr, escape_text, resolve_reference, unescape_xml};
