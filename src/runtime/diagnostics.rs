//! Uncaught script exceptions, rendered for the editor.

use deno_core::v8;
use std::fmt;

/// An uncaught exception with the location the engine attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub resource: Option<String>,
    pub line: Option<usize>,
    pub start_column: usize,
    pub end_column: usize,
    pub source_line: Option<String>,
}

impl Diagnostic {
    /// A diagnostic with no location.
    pub fn bare(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource: None,
            line: None,
            start_column: 0,
            end_column: 0,
            source_line: None,
        }
    }

    /// Capture the exception caught by `tc`, if any.
    pub(crate) fn capture(tc: &mut v8::TryCatch<v8::HandleScope>) -> Option<Self> {
        let exception = tc.exception()?;
        let message = exception
            .to_string(tc)
            .map(|s| s.to_rust_string_lossy(tc))
            .unwrap_or_else(|| "uncaught exception".to_string());

        let Some(info) = tc.message() else {
            return Some(Self::bare(message));
        };

        let resource = info
            .get_script_resource_name(tc)
            .filter(|name| !name.is_null_or_undefined())
            .map(|name| name.to_rust_string_lossy(tc));
        let line = info.get_line_number(tc);
        let source_line = info
            .get_source_line(tc)
            .map(|source| source.to_rust_string_lossy(tc));

        Some(Self {
            message,
            resource,
            line,
            start_column: info.get_start_column(),
            end_column: info.get_end_column(),
            source_line,
        })
    }

    /// `resource:line: message`, then the offending source line and a caret
    /// underline under the reported column range.
    pub fn render(&self) -> String {
        let mut out = match (&self.resource, self.line) {
            (Some(resource), Some(line)) => format!("{}:{}: {}", resource, line, self.message),
            (None, Some(line)) => format!("<unknown>:{}: {}", line, self.message),
            (Some(resource), None) => format!("{}: {}", resource, self.message),
            (None, None) => self.message.clone(),
        };

        if let Some(source) = &self.source_line {
            out.push('\n');
            out.push_str(source);
            out.push('\n');
            let width = self.end_column.saturating_sub(self.start_column).max(1);
            out.push_str(&" ".repeat(self.start_column));
            out.push_str(&"^".repeat(width));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_location() {
        let diagnostic = Diagnostic {
            message: "SyntaxError: Unexpected token ')'".into(),
            resource: Some("bad.js".into()),
            line: Some(3),
            start_column: 8,
            end_column: 9,
            source_line: Some("var x = );".into()),
        };
        assert_eq!(
            diagnostic.render(),
            "bad.js:3: SyntaxError: Unexpected token ')'\nvar x = );\n        ^"
        );
    }

    #[test]
    fn test_render_wide_underline() {
        let diagnostic = Diagnostic {
            message: "ReferenceError: nope is not defined".into(),
            resource: Some("<execute>".into()),
            line: Some(1),
            start_column: 0,
            end_column: 4,
            source_line: Some("nope()".into()),
        };
        let rendered = diagnostic.render();
        assert!(rendered.ends_with("nope()\n^^^^"));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn test_render_bare() {
        assert_eq!(Diagnostic::bare("boom").render(), "boom");
        assert_eq!(Diagnostic::bare("boom").to_string(), "boom");
    }
}
