//! RDF statements
//!
//! A statement is one triple in a named graph. IRIs are always stored in
//! expanded form; compaction against a context never happens at this layer.

use crate::error::{CoreError, Result};
use crate::iri;
use crate::vocab::DEFAULT_GRAPH;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Object position of a statement
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RdfObject {
    /// Reference to another node by absolute IRI
    Iri(String),
    /// Literal in lexical form; datatype and language live on the statement
    Literal(String),
}

impl RdfObject {
    /// Lexical value or IRI of the object
    pub fn as_str(&self) -> &str {
        match self {
            RdfObject::Iri(s) | RdfObject::Literal(s) => s,
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, RdfObject::Iri(_))
    }
}

impl fmt::Display for RdfObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdfObject::Iri(iri) => write!(f, "<{iri}>"),
            RdfObject::Literal(value) => write!(f, "{value:?}"),
        }
    }
}

/// One RDF triple within a graph
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdfStatement {
    pub subject: String,
    pub predicate: String,
    pub object: RdfObject,
    /// Graph IRI, empty for the default graph
    #[serde(default)]
    pub graph: String,
    /// Datatype IRI of a literal object; `None` means `xsd:string` or IRI object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl RdfStatement {
    /// Statement whose object is another node
    pub fn iri(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: RdfObject::Iri(object.into()),
            graph: DEFAULT_GRAPH.to_string(),
            data_type: None,
            language: None,
        }
    }

    /// Statement whose object is a plain string literal
    pub fn literal(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: RdfObject::Literal(value.into()),
            graph: DEFAULT_GRAPH.to_string(),
            data_type: None,
            language: None,
        }
    }

    pub fn with_graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = graph.into();
        self
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Check the IRI invariants of this statement.
    ///
    /// Subject, predicate and graph must be absolute IRIs when non-empty, and
    /// an IRI object must be absolute as well. Only the graph may be empty.
    pub fn validate(&self) -> Result<()> {
        check_iri("subject", &self.subject, false)?;
        check_iri("predicate", &self.predicate, false)?;
        check_iri("graph", &self.graph, true)?;
        if let RdfObject::Iri(object) = &self.object {
            check_iri("object", object, false)?;
        }
        Ok(())
    }
}

fn check_iri(position: &'static str, value: &str, allow_empty: bool) -> Result<()> {
    if (allow_empty && value.is_empty()) || iri::is_absolute(value) {
        Ok(())
    } else {
        Err(CoreError::InvalidIri {
            position,
            iri: value.to_string(),
        })
    }
}

impl fmt::Display for RdfStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> {}", self.subject, self.predicate, self.object)?;
        if let Some(lang) = &self.language {
            write!(f, "@{lang}")?;
        } else if let Some(dt) = &self.data_type {
            write!(f, "^^<{dt}>")?;
        }
        if !self.graph.is_empty() {
            write!(f, " <{}>", self.graph)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::xsd;

    #[test]
    fn test_valid_statement() {
        let st = RdfStatement::literal("http://example.org/1", "http://example.org/name", "Bob");
        assert!(st.validate().is_ok());

        let st = RdfStatement::iri(
            "http://example.org/1",
            "http://example.org/knows",
            "http://example.org/2",
        )
        .with_graph("http://example.org/g");
        assert!(st.validate().is_ok());
    }

    #[test]
    fn test_relative_subject_rejected() {
        let st = RdfStatement::literal("ex1", "http://example.org/name", "Bob");
        let err = st.validate().unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidIri {
                position: "subject",
                iri: "ex1".to_string()
            }
        );
    }

    #[test]
    fn test_relative_graph_rejected() {
        let st = RdfStatement::literal("http://example.org/1", "http://example.org/name", "Bob")
            .with_graph("g1");
        assert!(st.validate().is_err());
    }

    #[test]
    fn test_literal_object_not_checked() {
        let st = RdfStatement::literal("http://example.org/1", "http://example.org/note", "not an iri");
        assert!(st.validate().is_ok());
    }

    #[test]
    fn test_display_typed_literal() {
        let st = RdfStatement::literal("http://example.org/1", "http://example.org/age", "42")
            .with_data_type(xsd::INTEGER);
        assert_eq!(
            st.to_string(),
            "<http://example.org/1> <http://example.org/age> \"42\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn test_serde_shape() {
        let st = RdfStatement::literal("http://example.org/1", "http://example.org/name", "Bob");
        let json = serde_json::to_value(&st).unwrap();
        assert_eq!(json["object"]["literal"], "Bob");
        assert_eq!(json["graph"], "");
        assert!(json.get("dataType").is_none());
    }
}
