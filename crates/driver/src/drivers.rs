//! The `drivers` module contains implementations of the [Driver] trait.

use crate::{Challenger, Driver, Guardian, LedgerGateway, OutputSubmitter, ValidatorConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Defines a new [Driver] implementation around an orchestrator.
#[macro_export]
macro_rules! define_driver {
    ($name:ident, $agent:ty, $inner:expr) => {
        #[doc = concat!("Variant of the [Driver] trait: [", stringify!($name), "]")]
        pub struct $name {
            /// The configuration for all of the drivers.
            pub config: Arc<ValidatorConfig>,
            /// The ledger the driver watches.
            pub ledger: Arc<dyn LedgerGateway>,
            /// The orchestrator the driver hands work to.
            pub agent: $agent,
        }

        #[async_trait]
        impl Driver for $name {
            async fn start_loop(self) -> Result<()> {
                #[allow(clippy::redundant_closure_call)]
                $inner(self).await
            }
        }

        impl $name {
            #[doc = concat!("Creates a new instance of the [", stringify!($name), "] driver.")]
            pub fn new(config: Arc<ValidatorConfig>, ledger: Arc<dyn LedgerGateway>, agent: $agent) -> Self {
                Self {
                    config,
                    ledger,
                    agent,
                }
            }
        }
    };
}

/// Returns the first L1 block of the finalization window ending at `head_l1`. Events older than
/// that concern finalized outputs only.
async fn finalization_window_start(
    config: &ValidatorConfig,
    ledger: &dyn LedgerGateway,
    head_l1: u64,
) -> Result<u64> {
    let period = ledger.finalization_period_seconds().await?;
    Ok(head_l1.saturating_sub(config.l1_blocks_in(period)).max(1))
}

/// Returns the first output the output monitor hands to the challenger at startup. Outputs whose
/// creation period is over cannot be challenged anymore, so only the trailing run of outputs that
/// are still open is rescanned. The genesis output is never challenged.
async fn first_output_to_handle(ledger: &dyn LedgerGateway, next_output_index: u64) -> Result<u64> {
    let mut index = next_output_index;
    while index > 1 && ledger.is_in_creation_period(index - 1).await? {
        index -= 1;
    }
    Ok(index.max(1))
}

define_driver!(
    OutputMonitorDriver,
    Challenger,
    (|driver: OutputMonitorDriver| {
        async move {
            tracing::info!(target: "output-monitor-driver", "Starting output monitor...");
            let mut checkpoint = None;
            let mut interval = tokio::time::interval(driver.config.output_poll_interval);

            loop {
                interval.tick().await;
                let next_output_index = match driver.ledger.next_output_index().await {
                    Ok(index) => index,
                    Err(e) => {
                        tracing::error!(target: "output-monitor-driver", "Failed to fetch next output index: {:#}", e);
                        continue;
                    }
                };
                let from = match checkpoint {
                    Some(index) => index,
                    None => match first_output_to_handle(driver.ledger.as_ref(), next_output_index).await {
                        Ok(index) => {
                            tracing::info!(target: "output-monitor-driver", "Starting from output {} (next output index {})", index, next_output_index);
                            index
                        }
                        Err(e) => {
                            tracing::error!(target: "output-monitor-driver", "Failed to find the first open output: {:#}", e);
                            continue;
                        }
                    },
                };

                for output_index in from..next_output_index {
                    tracing::debug!(target: "output-monitor-driver", "Dispatching output {}", output_index);
                    let challenger = driver.agent.clone();
                    tokio::spawn(async move { challenger.handle_output(output_index).await });
                }
                checkpoint = Some(from.max(next_output_index));
            }
        }
    })
);

define_driver!(
    ChallengeDriver,
    Challenger,
    (|driver: ChallengeDriver| {
        async move {
            tracing::info!(target: "challenge-driver", "Starting challenge driver...");
            let mut next_block = None;
            let mut interval = tokio::time::interval(driver.config.challenge_poll_interval);

            loop {
                interval.tick().await;
                let scan = async {
                    let head = driver.ledger.latest_l1_block().await?;
                    let from = match next_block {
                        Some(block) => block,
                        None => finalization_window_start(&driver.config, driver.ledger.as_ref(), head).await?,
                    };
                    if from > head {
                        return Ok::<_, anyhow::Error>(head);
                    }

                    for event in driver.ledger.challenge_created_events(from, head).await? {
                        if driver.agent.role_in(event.asserter, event.challenger).is_none() {
                            continue;
                        }
                        tracing::info!(target: "challenge-driver", "Found related challenge against output {}", event.output_index);
                        let challenger = driver.agent.clone();
                        tokio::spawn(async move {
                            challenger
                                .handle_challenge(event.output_index, event.asserter, event.challenger)
                                .await
                        });
                    }
                    Ok(head)
                };

                match scan.await {
                    Ok(head) => next_block = Some(head + 1),
                    Err(e) => {
                        tracing::error!(target: "challenge-driver", "Failed to scan ChallengeCreated events: {:#}", e);
                    }
                }
            }
        }
    })
);

define_driver!(
    GuardianDriver,
    Guardian,
    (|driver: GuardianDriver| {
        async move {
            tracing::info!(target: "guardian-driver", "Starting guardian driver...");
            let mut next_block = None;
            let mut checkpoint = None;
            let mut interval = tokio::time::interval(driver.config.guardian_poll_interval);

            loop {
                interval.tick().await;
                let scan = async {
                    let head = driver.ledger.latest_l1_block().await?;
                    let from = match next_block {
                        Some(block) => block,
                        None => finalization_window_start(&driver.config, driver.ledger.as_ref(), head).await?,
                    };

                    if from <= head {
                        for event in driver.ledger.validation_requested_events(from, head).await? {
                            let guardian = driver.agent.clone();
                            tokio::spawn(async move { guardian.process_output_validation(event).await });
                        }
                        for event in driver.ledger.deletion_requested_events(from, head).await? {
                            let guardian = driver.agent.clone();
                            tokio::spawn(async move { guardian.process_output_deletion(event).await });
                        }
                        for event in driver.ledger.challenge_created_events(from, head).await? {
                            let guardian = driver.agent.clone();
                            tokio::spawn(async move { guardian.process_challenger_timeout(event).await });
                        }
                    }
                    Ok::<_, anyhow::Error>(head)
                };

                match scan.await {
                    Ok(head) => next_block = Some(head + 1),
                    Err(e) => {
                        tracing::error!(target: "guardian-driver", "Failed to scan council events: {:#}", e);
                        continue;
                    }
                }

                match driver.agent.outputs_to_inspect(checkpoint).await {
                    Ok(Some(batch)) => {
                        for output_index in batch.outputs {
                            let guardian = driver.agent.clone();
                            let (from, to) = (batch.from_l1, batch.to_l1);
                            tokio::spawn(async move { guardian.inspect_output(output_index, from, to).await });
                        }
                        checkpoint = Some(batch.checkpoint);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(target: "guardian-driver", "Failed to find outputs to inspect: {}", e);
                    }
                }
            }
        }
    })
);

define_driver!(
    OutputSubmitterDriver,
    OutputSubmitter,
    (|driver: OutputSubmitterDriver| {
        async move {
            tracing::info!(target: "output-submitter-driver", "Starting output submitter...");
            loop {
                let wait = match driver.agent.try_submit_l2_output().await {
                    Ok(wait) => wait,
                    Err(e) => {
                        tracing::error!(target: "output-submitter-driver", "Failed to submit output: {}", e);
                        driver.config.submitter_retry_interval
                    }
                };
                tokio::time::sleep(wait).await;
            }
        }
    })
);
