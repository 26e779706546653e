//! Transactional task-flow engine. A flow is an ordered list of named steps
//! over a typed context; steps run strictly sequentially and a failure stops
//! the flow. [`TaskFlow::revert`] then invokes the compensating action of
//! every step that completed, in reverse insertion order, against the
//! context exactly as the completed steps left it.

use crate::errors::Error;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Future returned by a step callback.
pub(crate) type StepResult<'a> = BoxFuture<'a, Result<(), Error>>;

/// A step callback: an orchestrator method over the flow context.
pub(crate) type StepFn<S, C> = for<'a> fn(&'a S, &'a mut C) -> StepResult<'a>;

struct Task<S, C> {
    name: &'static str,
    forward: StepFn<S, C>,
    revert: Option<StepFn<S, C>>,
}

/// An ordered, compensable sequence of steps owned by `S` over context `C`.
pub(crate) struct TaskFlow<S, C> {
    name: &'static str,
    owner: Arc<S>,
    tasks: Vec<Task<S, C>>,
    completed: usize,
}

impl<S, C> TaskFlow<S, C> {
    pub(crate) fn new(name: &'static str, owner: Arc<S>) -> Self {
        Self {
            name,
            owner,
            tasks: Vec::new(),
            completed: 0,
        }
    }

    /// Append a step with no compensating action.
    pub(crate) fn add_task(&mut self, name: &'static str, forward: StepFn<S, C>) {
        self.tasks.push(Task {
            name,
            forward,
            revert: None,
        });
    }

    /// Append a step with a compensating action, invoked by [`Self::revert`]
    /// once the step has completed successfully.
    pub(crate) fn add_task_with_revert(
        &mut self,
        name: &'static str,
        forward: StepFn<S, C>,
        revert: StepFn<S, C>,
    ) {
        self.tasks.push(Task {
            name,
            forward,
            revert: Some(revert),
        });
    }

    /// Run the steps in insertion order. Stops at the first failure and
    /// reports it as [`Error::TaskFailed`]; the caller decides whether to
    /// invoke [`Self::revert`].
    pub(crate) async fn run(&mut self, context: &mut C) -> Result<(), Error> {
        for index in 0..self.tasks.len() {
            let name = self.tasks[index].name;
            let forward = self.tasks[index].forward;
            tracing::debug!(flow = self.name, task = name, "running task");
            if let Err(error) = forward(&self.owner, context).await {
                tracing::error!(flow = self.name, task = name, %error, "task failed");
                return Err(Error::TaskFailed {
                    flow: self.name.to_string(),
                    step: name.to_string(),
                    source: Box::new(error),
                });
            }
            self.completed = index + 1;
        }
        Ok(())
    }

    /// Invoke the compensating actions of the completed steps in reverse
    /// insertion order. Best effort: a failing revert is logged and the
    /// remaining reverts still run.
    pub(crate) async fn revert(&mut self, context: &mut C) {
        for index in (0..self.completed).rev() {
            let name = self.tasks[index].name;
            let Some(revert) = self.tasks[index].revert else {
                continue;
            };
            tracing::debug!(flow = self.name, task = name, "reverting task");
            if let Err(error) = revert(&self.owner, context).await {
                tracing::error!(
                    flow = self.name,
                    task = name,
                    %error,
                    "revert failed, continuing with the remaining reverts"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use futures::FutureExt;

    #[derive(Default)]
    struct Recorder {
        events: Vec<&'static str>,
        written: Vec<&'static str>,
    }

    struct Steps {
        fail_at: Option<&'static str>,
        fail_revert_of: Option<&'static str>,
    }

    impl Steps {
        fn step<'a>(
            &'a self,
            name: &'static str,
            ctx: &'a mut Recorder,
        ) -> Result<(), Error> {
            ctx.events.push(name);
            if self.fail_at == Some(name) {
                return Err(Error::InvalidParams {
                    reason: name.to_string(),
                });
            }
            ctx.written.push(name);
            Ok(())
        }

        fn a<'a>(&'a self, ctx: &'a mut Recorder) -> StepResult<'a> {
            async move { self.step("a", ctx) }.boxed()
        }
        fn b<'a>(&'a self, ctx: &'a mut Recorder) -> StepResult<'a> {
            async move { self.step("b", ctx) }.boxed()
        }
        fn c<'a>(&'a self, ctx: &'a mut Recorder) -> StepResult<'a> {
            async move { self.step("c", ctx) }.boxed()
        }
        fn revert_a<'a>(&'a self, ctx: &'a mut Recorder) -> StepResult<'a> {
            async move { self.unstep("revert-a", ctx) }.boxed()
        }
        fn revert_b<'a>(&'a self, ctx: &'a mut Recorder) -> StepResult<'a> {
            async move { self.unstep("revert-b", ctx) }.boxed()
        }
        fn unstep<'a>(
            &'a self,
            name: &'static str,
            ctx: &'a mut Recorder,
        ) -> Result<(), Error> {
            ctx.events.push(name);
            if self.fail_revert_of == Some(name) {
                return Err(Error::InvalidParams {
                    reason: name.to_string(),
                });
            }
            Ok(())
        }
    }

    fn flow(steps: Steps) -> TaskFlow<Steps, Recorder> {
        let mut flow = TaskFlow::new("test-flow", Arc::new(steps));
        flow.add_task_with_revert("a", Steps::a, Steps::revert_a);
        flow.add_task_with_revert("b", Steps::b, Steps::revert_b);
        flow.add_task("c", Steps::c);
        flow
    }

    #[tokio::test]
    async fn runs_all_tasks_in_order() {
        let mut flow = flow(Steps {
            fail_at: None,
            fail_revert_of: None,
        });
        let mut ctx = Recorder::default();
        flow.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.events, ["a", "b", "c"]);
        // The accumulator carries every completed step's writes.
        assert_eq!(ctx.written, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failure_stops_the_flow_and_names_the_step() {
        let mut flow = flow(Steps {
            fail_at: Some("b"),
            fail_revert_of: None,
        });
        let mut ctx = Recorder::default();
        let error = flow.run(&mut ctx).await.unwrap_err();
        match error {
            Error::TaskFailed { flow, step, .. } => {
                assert_eq!(flow, "test-flow");
                assert_eq!(step, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.events, ["a", "b"]);
    }

    #[tokio::test]
    async fn revert_unwinds_only_the_completed_prefix_in_reverse() {
        let mut flow = flow(Steps {
            fail_at: Some("c"),
            fail_revert_of: None,
        });
        let mut ctx = Recorder::default();
        flow.run(&mut ctx).await.unwrap_err();
        flow.revert(&mut ctx).await;
        // "c" failed, so only a and b revert, b first.
        assert_eq!(ctx.events, ["a", "b", "c", "revert-b", "revert-a"]);
    }

    #[tokio::test]
    async fn failing_revert_does_not_stop_earlier_reverts() {
        let mut flow = flow(Steps {
            fail_at: Some("c"),
            fail_revert_of: Some("revert-b"),
        });
        let mut ctx = Recorder::default();
        flow.run(&mut ctx).await.unwrap_err();
        flow.revert(&mut ctx).await;
        assert_eq!(ctx.events, ["a", "b", "c", "revert-b", "revert-a"]);
    }
}
