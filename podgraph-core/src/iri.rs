//! Absolute IRI checks
//!
//! Statements produced by the pipeline must carry absolute IRIs in subject,
//! predicate and graph position. An absolute IRI here is anything with an
//! RFC 3986 scheme (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"`) followed
//! by a non-empty remainder without whitespace.

/// Returns the scheme of `iri` if it has one.
pub fn scheme(iri: &str) -> Option<&str> {
    let colon = iri.find(':')?;
    let scheme = &iri[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}

/// Check whether `iri` is an absolute IRI.
///
/// Blank node labels (`_:b0`) and compact IRIs whose prefix was never
/// expanded still pass the scheme test when the prefix looks like a scheme,
/// so callers are expected to expand against the request context first.
pub fn is_absolute(iri: &str) -> bool {
    match scheme(iri) {
        Some(s) => {
            let rest = &iri[s.len() + 1..];
            !rest.is_empty() && !iri.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
