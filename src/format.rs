//! Content-type classification.
//!
//! The set of formats is closed: adding one means adding a [`DocumentFormat`]
//! variant, and every `match` over it stops compiling until the new case is
//! handled.

use std::fmt;

/// The four outcomes of classifying a declared MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    /// `text/plain`
    PlainText,
    /// `application/pdf`
    Pdf,
    /// any `image/*`
    Image,
    /// anything else; rejected before extraction starts
    Unsupported,
}

impl DocumentFormat {
    /// Classify a declared content type.
    ///
    /// Parameters (`; charset=utf-8`) and surrounding whitespace are ignored
    /// and the comparison is case-insensitive. No side effects.
    pub fn classify(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/plain" => DocumentFormat::PlainText,
            "application/pdf" => DocumentFormat::Pdf,
            s => match s.strip_prefix("image/") {
                Some(subtype) if !subtype.is_empty() => DocumentFormat::Image,
                _ => DocumentFormat::Unsupported,
            },
        }
    }

    pub fn is_supported(self) -> bool {
        self != DocumentFormat::Unsupported
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentFormat::PlainText => "plain-text",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Image => "image",
            DocumentFormat::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_supported_types() {
        assert_eq!(DocumentFormat::classify("text/plain"), DocumentFormat::PlainText);
        assert_eq!(
            DocumentFormat::classify("text/plain; charset=utf-8"),
            DocumentFormat::PlainText
        );
        assert_eq!(DocumentFormat::classify("application/pdf"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::classify("APPLICATION/PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::classify("image/png"), DocumentFormat::Image);
        assert_eq!(DocumentFormat::classify("image/jpeg"), DocumentFormat::Image);
        assert_eq!(DocumentFormat::classify(" image/webp "), DocumentFormat::Image);
    }

    #[test]
    fn rejects_everything_else() {
        for ct in [
            "",
            "text/html",
            "text/markdown",
            "application/zip",
            "application/octet-stream",
            "image/",
            "imagery/png",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ] {
            assert_eq!(
                DocumentFormat::classify(ct),
                DocumentFormat::Unsupported,
                "{ct:?} should be unsupported"
            );
        }
    }
}
