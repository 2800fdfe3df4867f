//! Fan-out of native operations across targets
//!
//! Every (target, operation) pair runs on a blocking thread. A failure never
//! cancels siblings: all work is joined before the first error, in target
//! order, is reported.

use super::{IssueMode, ProxyBackend, SysProxyError, Target};
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;

type TaskResult = Result<(), SysProxyError>;

/// Run `ops` against every target and wait for all of them.
pub async fn apply<B: ProxyBackend>(
    backend: Arc<B>,
    targets: &[Target],
    ops: &[B::Op],
) -> Result<(), SysProxyError> {
    if ops.is_empty() {
        return Ok(());
    }

    // Everything is spawned before anything is awaited.
    let spawned: Vec<(Target, Vec<JoinHandle<TaskResult>>)> = targets
        .iter()
        .map(|target| {
            let handles = match backend.issue_mode() {
                IssueMode::Parallel => ops
                    .iter()
                    .map(|op| spawn_one(Arc::clone(&backend), target.clone(), op.clone()))
                    .collect(),
                IssueMode::Sequential => vec![spawn_in_order(
                    Arc::clone(&backend),
                    target.clone(),
                    ops.to_vec(),
                )],
            };
            (target.clone(), handles)
        })
        .collect();

    let mut first_error = None;
    for (target, handles) in spawned {
        for joined in join_all(handles).await {
            let outcome = joined.unwrap_or_else(|err| {
                Err(SysProxyError::native(&target, "native operation task", err))
            });
            if let Err(err) = outcome {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::warn!(%target, "additional failure: {err}");
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn spawn_one<B: ProxyBackend>(backend: Arc<B>, target: Target, op: B::Op) -> JoinHandle<TaskResult> {
    tokio::task::spawn_blocking(move || run_op(backend.as_ref(), &target, &op))
}

/// Runs one target's ops in order on one blocking thread.
///
/// No op depends on an earlier one succeeding, so a failure does not stop
/// the rest. The first failure is returned; later ones are logged.
fn spawn_in_order<B: ProxyBackend>(
    backend: Arc<B>,
    target: Target,
    ops: Vec<B::Op>,
) -> JoinHandle<TaskResult> {
    tokio::task::spawn_blocking(move || {
        let mut first_error = None;
        for op in &ops {
            if let Err(err) = run_op(backend.as_ref(), &target, op) {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::warn!(%target, "additional failure: {err}");
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}

fn run_op<B: ProxyBackend>(backend: &B, target: &Target, op: &B::Op) -> TaskResult {
    tracing::debug!(%target, %op, "issuing native operation");
    backend
        .execute(target, op)
        .map_err(|err| SysProxyError::native(target, op, err))
}
