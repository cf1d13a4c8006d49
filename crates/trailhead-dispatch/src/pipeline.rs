//! Pipeline stages wrapped around every request handler.
//!
//! A pipeline is an ordered list of [`Behavior`]s followed by the handler.
//! Each behavior receives the request plus a [`Next`] continuation and
//! decides whether, and when, to call it. The first behavior in the list is
//! the outermost one:
//!
//! ```text
//! caller → stage₁ → stage₂ → … → handler
//!        ←        ←        ← … ←
//! ```
//!
//! The dispatcher composes the chain once, when a message type is first
//! dispatched, and reuses it for every later call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{DispatchError, Request, RequestHandler};

/// One layer of a request pipeline.
#[async_trait]
pub trait Behavior<R: Request>: Send + Sync + 'static {
    /// Handles `request`, usually by calling `next.run(request)` somewhere
    /// in the middle.
    async fn handle(
        &self,
        request: R,
        next: Next<'_, R>,
    ) -> Result<R::Response, DispatchError>;
}

/// The remainder of a pipeline, from the current stage inwards.
pub struct Next<'a, R: Request> {
    chain: &'a [Arc<dyn Behavior<R>>],
    handler: &'a dyn RequestHandler<R>,
}

impl<'a, R: Request> Next<'a, R> {
    pub(crate) fn new(
        chain: &'a [Arc<dyn Behavior<R>>],
        handler: &'a dyn RequestHandler<R>,
    ) -> Self {
        Self { chain, handler }
    }

    /// Runs the rest of the pipeline.
    pub async fn run(self, request: R) -> Result<R::Response, DispatchError> {
        match self.chain.split_first() {
            Some((stage, rest)) => {
                stage.handle(request, Next::new(rest, self.handler)).await
            }
            None => self.handler.handle(request).await,
        }
    }
}

/// Validates a request before it reaches the handler.
#[async_trait]
pub trait PreProcessor<R: Request>: Send + Sync + 'static {
    /// Returns `Err(reason)` to reject the request.
    async fn process(&self, request: &R) -> Result<(), String>;
}

/// Observes a successful response on its way back to the caller.
#[async_trait]
pub trait PostProcessor<R: Request>: Send + Sync + 'static {
    async fn process(&self, request_name: &'static str, response: &R::Response);
}

/// The standard stages a dispatcher applies to every message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Logs any error coming out of the inner chain and returns it unchanged.
    ErrorLogging,
    /// Warns when the inner chain takes longer than the threshold.
    SlowCallLogging(Duration),
    /// Runs the type's pre-processors; the first rejection stops the request.
    PreProcessing,
    /// Runs the type's post-processors on a successful response.
    PostProcessing,
}

impl Stage {
    /// The slow-call threshold used by [`Stage::defaults`].
    pub const DEFAULT_SLOW_CALL: Duration = Duration::from_millis(500);

    /// `[ErrorLogging, SlowCallLogging(500ms), PreProcessing, PostProcessing]`
    pub fn defaults() -> Vec<Stage> {
        vec![
            Stage::ErrorLogging,
            Stage::SlowCallLogging(Self::DEFAULT_SLOW_CALL),
            Stage::PreProcessing,
            Stage::PostProcessing,
        ]
    }

    pub(crate) fn behavior<R: Request>(
        &self,
        pre: &[Arc<dyn PreProcessor<R>>],
        post: &[Arc<dyn PostProcessor<R>>],
    ) -> Arc<dyn Behavior<R>> {
        match *self {
            Stage::ErrorLogging => Arc::new(ErrorLogging),
            Stage::SlowCallLogging(threshold) => {
                Arc::new(SlowCallLogging { threshold })
            }
            Stage::PreProcessing => Arc::new(PreProcessing {
                processors: pre.to_vec(),
            }),
            Stage::PostProcessing => Arc::new(PostProcessing {
                processors: post.to_vec(),
            }),
        }
    }
}

struct ErrorLogging;

#[async_trait]
impl<R: Request> Behavior<R> for ErrorLogging {
    async fn handle(
        &self,
        request: R,
        next: Next<'_, R>,
    ) -> Result<R::Response, DispatchError> {
        let result = next.run(request).await;
        if let Err(e) = &result {
            if e.is_configuration() {
                tracing::error!(request = R::name(), error = %e, "dispatch misconfigured");
            } else {
                tracing::warn!(request = R::name(), error = %e, "dispatch failed");
            }
        }
        result
    }
}

struct SlowCallLogging {
    threshold: Duration,
}

#[async_trait]
impl<R: Request> Behavior<R> for SlowCallLogging {
    async fn handle(
        &self,
        request: R,
        next: Next<'_, R>,
    ) -> Result<R::Response, DispatchError> {
        let started = Instant::now();
        let result = next.run(request).await;
        let elapsed = started.elapsed();
        if elapsed > self.threshold {
            tracing::warn!(
                request = R::name(),
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "slow dispatch"
            );
        }
        result
    }
}

struct PreProcessing<R: Request> {
    processors: Vec<Arc<dyn PreProcessor<R>>>,
}

#[async_trait]
impl<R: Request> Behavior<R> for PreProcessing<R> {
    async fn handle(
        &self,
        request: R,
        next: Next<'_, R>,
    ) -> Result<R::Response, DispatchError> {
        for processor in &self.processors {
            if let Err(reason) = processor.process(&request).await {
                return Err(DispatchError::Rejected {
                    request: R::name(),
                    reason,
                });
            }
        }
        next.run(request).await
    }
}

struct PostProcessing<R: Request> {
    processors: Vec<Arc<dyn PostProcessor<R>>>,
}

#[async_trait]
impl<R: Request> Behavior<R> for PostProcessing<R> {
    async fn handle(
        &self,
        request: R,
        next: Next<'_, R>,
    ) -> Result<R::Response, DispatchError> {
        let response = next.run(request).await?;
        for processor in &self.processors {
            processor.process(R::name(), &response).await;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(u32);

    impl Request for Echo {
        type Response = u32;
    }

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler<Echo> for EchoHandler {
        async fn handle(&self, request: Echo) -> Result<u32, DispatchError> {
            Ok(request.0)
        }
    }

    struct Double;

    #[async_trait]
    impl Behavior<Echo> for Double {
        async fn handle(
            &self,
            request: Echo,
            next: Next<'_, Echo>,
        ) -> Result<u32, DispatchError> {
            Ok(next.run(request).await? * 2)
        }
    }

    struct Reject;

    #[async_trait]
    impl PreProcessor<Echo> for Reject {
        async fn process(&self, request: &Echo) -> Result<(), String> {
            if request.0 == 0 {
                Err("zero".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_next_run_with_empty_chain_calls_handler() {
        let next = Next::<Echo>::new(&[], &EchoHandler);
        assert_eq!(next.run(Echo(7)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_next_run_applies_every_behavior() {
        let chain: Vec<Arc<dyn Behavior<Echo>>> =
            vec![Arc::new(Double), Arc::new(Double)];
        let next = Next::new(&chain, &EchoHandler);
        assert_eq!(next.run(Echo(3)).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_pre_processing_rejects_before_handler() {
        let pre: Vec<Arc<dyn PreProcessor<Echo>>> = vec![Arc::new(Reject)];
        let chain = vec![Stage::PreProcessing.behavior::<Echo>(&pre, &[])];

        let err = Next::new(&chain, &EchoHandler)
            .run(Echo(0))
            .await
            .unwrap_err();
        assert!(
            matches!(err, DispatchError::Rejected { reason, .. } if reason == "zero")
        );

        let ok = Next::new(&chain, &EchoHandler).run(Echo(5)).await;
        assert_eq!(ok.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_logging_stages_pass_results_through() {
        let chain = vec![
            Stage::ErrorLogging.behavior::<Echo>(&[], &[]),
            Stage::SlowCallLogging(Duration::ZERO).behavior::<Echo>(&[], &[]),
        ];
        let next = Next::new(&chain, &EchoHandler);
        assert_eq!(next.run(Echo(9)).await.unwrap(), 9);
    }

    #[test]
    fn test_stage_defaults_order() {
        assert_eq!(
            Stage::defaults(),
            vec![
                Stage::ErrorLogging,
                Stage::SlowCallLogging(Duration::from_millis(500)),
                Stage::PreProcessing,
                Stage::PostProcessing,
            ]
        );
    }
}
