//! Composition of supervised topic consumers.

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::consumer::{ConsumerContext, TopicBinding, TopicConsumer};
use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::{RestartPolicy, SupervisorExit, supervise};

/// The set of topic consumers to run.
pub struct Pipeline {
    context: ConsumerContext,
    bindings: Vec<TopicBinding>,
    policy: RestartPolicy,
}

impl Pipeline {
    #[must_use]
    pub fn new(context: ConsumerContext, bindings: Vec<TopicBinding>, policy: RestartPolicy) -> Self {
        Self {
            context,
            bindings,
            policy,
        }
    }

    /// Topics every consumer subscribes to, in binding order.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.topic.clone()).collect()
    }

    /// Spawn one supervised task per binding.
    #[must_use]
    pub fn start(self, shutdown: &ShutdownCoordinator) -> PipelineHandle {
        let tasks = self
            .bindings
            .into_iter()
            .map(|binding| {
                let topic = binding.topic.clone();
                let consumer = TopicConsumer::new(binding, self.context.clone());
                let listener = shutdown.listener();
                let session_listener = listener.clone();

                let task = tokio::spawn(supervise(
                    format!("consumer:{topic}"),
                    self.policy,
                    listener,
                    move || {
                        let consumer = consumer.clone();
                        let listener = session_listener.clone();
                        async move { consumer.run_session(listener).await }
                    },
                ));
                (topic, task)
            })
            .collect::<Vec<_>>();

        info!(tasks = tasks.len(), "pipeline started");
        PipelineHandle { tasks }
    }
}

/// Running pipeline tasks.
#[derive(Debug)]
pub struct PipelineHandle {
    tasks: Vec<(String, JoinHandle<SupervisorExit>)>,
}

impl PipelineHandle {
    /// Number of supervised tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to stop and report how each ended.
    ///
    /// A task that could not be joined is reported as a fault.
    pub async fn join(self) -> Vec<(String, SupervisorExit)> {
        let mut exits = Vec::with_capacity(self.tasks.len());

        for (topic, task) in self.tasks {
            let exit = match task.await {
                Ok(exit) => exit,
                Err(err) => {
                    error!(topic = %topic, error = %err, "consumer task aborted");
                    SupervisorExit::GaveUp {
                        restarts: 0,
                        last_error: crate::error::PipelineError::UnexpectedFault(err.to_string()),
                    }
                }
            };
            info!(topic = %topic, exit = ?exit, "consumer task stopped");
            exits.push((topic, exit));
        }

        exits
    }
}
