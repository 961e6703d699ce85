//! Drains the request queue, runs each attempt through the engine on a
//! blocking task, and publishes the response before acknowledging the
//! delivery.

use crate::{
    error::{BrokerError, Result},
    object_store::ObjectStore,
    schema::{attempt_status_code, case_status_code, Request, Response, TestResult},
};
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use rankode_common::chain::chain;
use rankode_engine::{RunRequestBuilder, RunResult, SandboxEngine};
use std::{sync::Arc, time::Duration};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(15);

pub struct BrokerConfig {
    pub amqp_url: String,
    pub request_queue: String,
    pub response_queue: String,
    pub workers_count: usize,
}

/// Owns the AMQP connection and drives the consume loop. Reconnects with a
/// fixed backoff on any connection-level failure; a single bad message
/// never tears down the loop, it only fails that one request.
pub struct Broker {
    config: BrokerConfig,
    engine: Arc<SandboxEngine>,
    store: Arc<dyn ObjectStore>,
}

impl Broker {
    pub fn new(config: BrokerConfig, engine: Arc<SandboxEngine>, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, engine, store }
    }

    /// Runs forever, reconnecting on disconnect, until `shutdown` resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.run_once(&mut shutdown).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::error!("broker connection lost: {}; reconnecting in {:?}", e, RECONNECT_BACKOFF);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

    async fn run_once(&self, shutdown: &mut tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let connection = Connection::connect(
            &self.config.amqp_url,
            ConnectionProperties::default()
                .with_executor(tokio_executor_trait::Tokio::current())
                .with_reactor(tokio_reactor_trait::Tokio),
        )
        .await?;

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.config.workers_count as u16, BasicQosOptions::default())
            .await?;
        channel
            .queue_declare(&self.config.request_queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        channel
            .queue_declare(&self.config.response_queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.config.request_queue,
                "rankode-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                next = consumer.next() => {
                    let delivery = match next {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(e)) => return Err(BrokerError::Amqp(e)),
                        None => return Ok(()),
                    };

                    if let Err(e) = self.handle_delivery(&channel, delivery.data.clone()).await {
                        log::error!("failed to process delivery: {}", e);
                    }
                    delivery.ack(BasicAckOptions::default()).await?;
                }
            }
        }
    }

    async fn handle_delivery(&self, channel: &Channel, body: Vec<u8>) -> Result<()> {
        if body.is_empty() {
            return Err(BrokerError::EmptyDelivery);
        }

        let request: Request = serde_json::from_slice(&body)?;
        let response = self.execute(request).await;
        let payload = serde_json::to_vec(&response).expect("Response always serializes");

        channel
            .basic_publish(
                "",
                &self.config.response_queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?
            .await?;

        Ok(())
    }

    async fn execute(&self, request: Request) -> Response {
        let id = request.id;

        match self.build_run_request(&request).await {
            Ok((run_request, test_ids)) => {
                let engine = self.engine.clone();
                let result = tokio::task::spawn_blocking(move || engine.run(&run_request))
                    .await
                    .unwrap_or_else(|e| RunResult::internal_error(format!("engine task panicked: {}", e)));
                to_response(id, &test_ids, result)
            }
            Err(e) => Response {
                id,
                status: attempt_status_code(rankode_engine::AttemptStatus::InternalError),
                error: chain(e.into()),
                memory_usage: 0,
                tests: Vec::new(),
            },
        }
    }

    /// Returns the engine request along with the originating `test_cases[].id`
    /// values, sorted the same way as the inputs, so results can be reported
    /// back against the caller's own test ids.
    async fn build_run_request(&self, request: &Request) -> Result<(rankode_engine::RunRequest, Vec<i64>)> {
        let mut ordered = request.test_cases.clone();
        ordered.sort_by_key(|t| t.order);

        let mut inputs = Vec::with_capacity(ordered.len());
        let mut test_ids = Vec::with_capacity(ordered.len());
        for case in &ordered {
            let bytes = self.store.get(&case.input_file_name).await.map_err(|source| BrokerError::ObjectStore {
                name: case.input_file_name.clone(),
                source,
            })?;
            inputs.push(String::from_utf8_lossy(&bytes).into_owned());
            test_ids.push(case.id);
        }

        let mut verification_code = None;
        if let Some(name) = &request.verification_file_name {
            let bytes = self
                .store
                .get(name)
                .await
                .map_err(|source| BrokerError::ObjectStore { name: name.clone(), source })?;
            verification_code = Some(String::from_utf8_lossy(&bytes).into_owned());
        }

        let run_request = RunRequestBuilder::default()
            .language(request.language.clone())
            .code(request.code.clone())
            .verification_code(verification_code)
            .inputs(inputs)
            .timeout(Duration::from_millis(request.timeout as u64))
            .memory_limit(request.memory_limit as u64)
            .max_file_size(request.max_output_size as u64)
            .max_output_size(request.max_output_size as u64)
            .build()
            .expect("all required fields set");

        Ok((run_request, test_ids))
    }
}

fn to_response(id: i64, test_ids: &[i64], result: RunResult) -> Response {
    let tests = result
        .per_case()
        .iter()
        .zip(test_ids.iter())
        .map(|(case, test_id)| TestResult {
            test_id: *test_id,
            status: case_status_code(case.status),
            output: case.output.clone(),
            execution_time: case.execution_time.as_millis() as i64,
        })
        .collect();

    Response {
        id,
        status: attempt_status_code(*result.attempt_status()),
        error: result.error().clone(),
        memory_usage: *result.memory_usage() as i64,
        tests,
    }
}
