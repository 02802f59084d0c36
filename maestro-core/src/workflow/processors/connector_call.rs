//! connector-call step processor

use async_trait::async_trait;
use std::sync::Arc;

use crate::connector::ConnectorInvoker;
use crate::error::{MaestroError, Result};
use crate::workflow::model::{StepKind, WorkflowStep};
use crate::workflow::template;

use super::{ProcessorContext, StepProcessor};

/// Executes connector-call steps against the injected invoker.
pub struct ConnectorCallProcessor {
    connectors: Arc<dyn ConnectorInvoker>,
}

impl ConnectorCallProcessor {
    pub fn new(connectors: Arc<dyn ConnectorInvoker>) -> Self {
        Self { connectors }
    }
}

#[async_trait]
impl StepProcessor for ConnectorCallProcessor {
    fn step_type(&self) -> &'static str {
        "connector-call"
    }

    async fn process(
        &self,
        step: &WorkflowStep,
        ctx: &ProcessorContext,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let StepKind::ConnectorCall {
            connector,
            operation,
            statement,
            parameters,
        } = &step.kind
        else {
            return Err(MaestroError::UnsupportedStepType(step.type_name().to_string()));
        };

        let tpl = ctx.template_context();
        let resolved_parameters = template::resolve_map(parameters, &tpl);
        let resolved_statement = statement.as_ref().map(|s| template::resolve(s, &tpl));

        let response = self
            .connectors
            .invoke(
                connector,
                operation,
                resolved_statement.as_deref(),
                &resolved_parameters,
            )
            .await?;

        let mut output = serde_json::Map::new();
        output.insert("response".to_string(), response);
        output.insert("connector".to_string(), serde_json::json!(connector));
        output.insert("operation".to_string(), serde_json::json!(operation));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorHandler, ConnectorRegistry};
    use crate::workflow::model::Workflow;
    use crate::workflow::processors::test_support::context_for;

    struct FlightsHandler;

    #[async_trait]
    impl ConnectorHandler for FlightsHandler {
        async fn call(
            &self,
            operation: &str,
            _statement: Option<&str>,
            parameters: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value> {
            assert_eq!(operation, "search_flights");
            Ok(serde_json::json!({
                "flights": [{"to": parameters["destination"], "price": 420}]
            }))
        }
    }

    #[tokio::test]
    async fn test_connector_invocation_with_templates() {
        let registry: Arc<dyn ConnectorInvoker> =
            Arc::new(ConnectorRegistry::new().register("travel-api", Arc::new(FlightsHandler)));
        let processor = ConnectorCallProcessor::new(registry);

        let mut parameters = serde_json::Map::new();
        parameters.insert(
            "destination".to_string(),
            serde_json::json!("{{input.destination}}"),
        );

        let workflow = Workflow::new(
            "t",
            vec![WorkflowStep::connector_call(
                "search-flights",
                "travel-api",
                "search_flights",
                parameters,
            )],
        );

        let mut input = serde_json::Map::new();
        input.insert("destination".to_string(), serde_json::json!("PAR"));
        let ctx = context_for(&workflow, input);

        let output = processor
            .process(&workflow.spec.steps[0], &ctx)
            .await
            .unwrap();

        assert_eq!(output["connector"], "travel-api");
        assert_eq!(output["operation"], "search_flights");
        assert_eq!(output["response"]["flights"][0]["to"], "PAR");
    }

    #[tokio::test]
    async fn test_unknown_connector_fails_step() {
        let registry: Arc<dyn ConnectorInvoker> = Arc::new(ConnectorRegistry::new());
        let processor = ConnectorCallProcessor::new(registry);

        let workflow = Workflow::new(
            "t",
            vec![WorkflowStep::connector_call(
                "lookup",
                "missing-api",
                "op",
                serde_json::Map::new(),
            )],
        );
        let ctx = context_for(&workflow, serde_json::Map::new());

        let err = processor
            .process(&workflow.spec.steps[0], &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "connector_error");
    }
}
