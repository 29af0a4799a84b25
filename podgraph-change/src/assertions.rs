//! Precondition assertion evaluation
//!
//! Assertions are read-only queries checked before anything is materialized.
//! They run concurrently with a bounded worker count and fail fast: the first
//! failure is returned immediately and results of checks still in flight are
//! dropped. The buffer is never touched.

use crate::buffer::ChangeRequestTxBuffer;
use crate::error::{ChangeError, Result};
use crate::processor::Processor;
use crate::query::{has_results, QueryEngine, QueryRequest};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use podgraph_core::{Assertion, AssertionKind, ChangeRequest};
use std::sync::Arc;

/// Default number of assertions checked concurrently
pub const DEFAULT_ASSERTION_PARALLELISM: usize = 4;

/// Checks the request's assertions against the query capability
pub struct AssertionEvaluator {
    query: Arc<dyn QueryEngine>,
    parallelism: usize,
}

impl AssertionEvaluator {
    pub fn new(query: Arc<dyn QueryEngine>) -> Self {
        Self {
            query,
            parallelism: DEFAULT_ASSERTION_PARALLELISM,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Check every assertion of `request`, failing on the first violation
    pub async fn evaluate(&self, request: &ChangeRequest) -> Result<()> {
        let checks: Vec<_> = request
            .assertions
            .iter()
            .enumerate()
            .map(|(index, assertion)| self.check(request, index, assertion))
            .collect();
        stream::iter(checks)
            .buffer_unordered(self.parallelism)
            .try_for_each(|_| futures::future::ready(Ok(())))
            .await
    }

    async fn check(
        &self,
        request: &ChangeRequest,
        index: usize,
        assertion: &Assertion,
    ) -> Result<()> {
        if let AssertionKind::Unrecognized(kind) = &assertion.kind {
            return Err(ChangeError::validation(format!(
                "assertion #{index} has unrecognized type '{kind}'"
            )));
        }

        let response = self
            .query
            .query(QueryRequest {
                context: &request.context,
                pod_id: &request.pod_id,
                slice_id: request.slice_id.as_deref(),
                query: &assertion.query,
                variables: None,
            })
            .await
            .map_err(|e| query_error(index, e))?;
        let data = response.into_data().map_err(|e| query_error(index, e))?;
        let non_empty = has_results(&data);
        tracing::debug!(index, kind = %assertion.kind, non_empty, "assertion evaluated");

        match assertion.kind {
            AssertionKind::AssertEmptyResult if non_empty => {
                Err(ChangeError::AssertionFailed(format!(
                    "assertion #{index} expected an empty result for query '{}'",
                    assertion.query
                )))
            }
            AssertionKind::AssertNonEmptyResult if !non_empty => {
                Err(ChangeError::AssertionFailed(format!(
                    "assertion #{index} expected a non-empty result for query '{}'",
                    assertion.query
                )))
            }
            _ => Ok(()),
        }
    }
}

fn query_error(index: usize, err: ChangeError) -> ChangeError {
    let detail = match err {
        ChangeError::Query(msg) => msg,
        other => other.to_string(),
    };
    ChangeError::Query(format!("assertion #{index} query is malformed: {detail}"))
}

#[async_trait]
impl Processor for AssertionEvaluator {
    fn name(&self) -> &str {
        "assertions"
    }

    async fn process(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()> {
        let request = buffer.request();
        if request.assertions.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            count = request.assertions.len(),
            parallelism = self.parallelism,
            "evaluating assertions"
        );
        self.evaluate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FixtureQueryEngine, QueryResponse};
    use podgraph_core::ChangeStatusCode;
    use serde_json::json;

    fn engine() -> Arc<FixtureQueryEngine> {
        Arc::new(
            FixtureQueryEngine::new()
                .with_response("{ empty }", QueryResponse::data(json!({"empty": []})))
                .with_response("{ full }", QueryResponse::data(json!({"full": [{"id": 1}]})))
                .with_response("{ unbound }", QueryResponse::data(json!({"rows": [{}]})))
                .with_response("{ broken }", QueryResponse::error("parse error")),
        )
    }

    fn request(assertions: Vec<Assertion>) -> ChangeRequest {
        let mut req = ChangeRequest::new("pod-1").with_insert(json!({"@id": "http://e.org/1"}));
        req.assertions = assertions;
        req
    }

    #[tokio::test]
    async fn test_passing_assertions() {
        let eval = AssertionEvaluator::new(engine());
        let req = request(vec![
            Assertion::empty_result("{ empty }"),
            Assertion::non_empty_result("{ full }"),
        ]);
        assert!(eval.evaluate(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_expected_but_found() {
        let eval = AssertionEvaluator::new(engine());
        let err = eval
            .evaluate(&request(vec![Assertion::empty_result("{ full }")]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), ChangeStatusCode::AssertionFailed);
    }

    #[tokio::test]
    async fn test_non_empty_expected_but_missing() {
        let eval = AssertionEvaluator::new(engine());
        let err = eval
            .evaluate(&request(vec![Assertion::non_empty_result("{ empty }")]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), ChangeStatusCode::AssertionFailed);
    }

    #[tokio::test]
    async fn test_rows_without_bindings_count_as_empty() {
        let eval = AssertionEvaluator::new(engine());
        assert!(eval
            .evaluate(&request(vec![Assertion::empty_result("{ unbound }")]))
            .await
            .is_ok());
        let err = eval
            .evaluate(&request(vec![Assertion::non_empty_result("{ unbound }")]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), ChangeStatusCode::AssertionFailed);
    }

    #[tokio::test]
    async fn test_query_error_is_validation_error() {
        let eval = AssertionEvaluator::new(engine());
        let err = eval
            .evaluate(&request(vec![Assertion::empty_result("{ broken }")]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), ChangeStatusCode::ValidationError);
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn test_unrecognized_type() {
        let eval = AssertionEvaluator::new(engine());
        let err = eval
            .evaluate(&request(vec![Assertion {
                kind: AssertionKind::Unrecognized("AssertMaybe".into()),
                query: "{ full }".into(),
            }]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), ChangeStatusCode::ValidationError);
    }

    #[tokio::test]
    async fn test_never_mutates_buffer() {
        let eval = AssertionEvaluator::new(engine()).with_parallelism(1);
        let mut buffer =
            ChangeRequestTxBuffer::open(request(vec![Assertion::non_empty_result("{ full }")]));
        eval.process(&mut buffer).await.unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.statistics().total(), 0);
    }
}
