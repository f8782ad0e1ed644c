//
// Copyright (C) 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Serializes all mutation of a `State` (a `CallRegistry`, in this core) onto a single
//! logical task, matching the scheduling model of §5: "all state transitions occur on
//! one logical task ... while suspended, other inbound events are processed". Grounded
//! on `simnet::actor::Actor<State>` -- a channel plus a single consumer owning `State` --
//! but rebuilt on a `tokio` task and `tokio::sync::mpsc` instead of an OS thread and
//! `std::sync::mpsc`, since this core's operations are `async fn`s that suspend on
//! external collaborators rather than blocking calls.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
type Task<State> = Box<dyn for<'a> FnOnce(&'a mut State) -> BoxFuture<'a> + Send>;

/// A handle to a running actor. Cloning shares the same underlying task and mailbox.
pub struct Actor<State> {
    sender: mpsc::UnboundedSender<Task<State>>,
}

impl<State> Clone for Actor<State> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Owns the spawned task; dropping or calling `stop` lets the actor's mailbox drain and
/// then drop `State`.
pub struct ActorHandle {
    join_handle: JoinHandle<()>,
}

impl ActorHandle {
    /// Closes the mailbox (no new tasks accepted) and waits for in-flight tasks to
    /// finish and `State` to drop.
    pub async fn stop(self) {
        // The Actor's sender is dropped by the caller before calling this; here we just
        // wait for the consumer loop to observe the closed channel and exit.
        let _ = self.join_handle.await;
    }
}

impl<State: Send + 'static> Actor<State> {
    /// Spawns the consumer task that owns `state` for the rest of its life. Returns the
    /// dispatch handle and a separate `ActorHandle` for shutdown, the same split
    /// `simnet::actor::Actor`/`Stopper` draws between "send work" and "own lifecycle".
    pub fn spawn(mut state: State) -> (Self, ActorHandle) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task<State>>();
        let join_handle = tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                task(&mut state).await;
            }
        });
        (Self { sender }, ActorHandle { join_handle })
    }

    /// Enqueues a task and returns immediately; the actor runs it in mailbox order.
    /// Errors (mailbox closed) are logged and dropped -- there is no caller to report
    /// back to.
    pub fn dispatch<F>(&self, task: F)
    where
        F: for<'a> FnOnce(&'a mut State) -> BoxFuture<'a> + Send + 'static,
    {
        if self.sender.send(Box::new(task)).is_err() {
            log::warn!("actor: dispatch after mailbox closed, dropping task");
        }
    }

    /// Enqueues a task and awaits its result, suspending the caller (not the actor's
    /// other queued work) until it completes. Returns `None` if the actor has already
    /// stopped.
    pub async fn call<F, R>(&self, task: F) -> Option<R>
    where
        F: for<'a> FnOnce(&'a mut State) -> Pin<Box<dyn Future<Output = R> + Send + 'a>>
            + Send
            + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Task<State> = Box::new(move |state: &mut State| {
            Box::pin(async move {
                let result = task(state).await;
                let _ = tx.send(result);
            }) as BoxFuture<'_>
        });
        if self.sender.send(wrapped).is_err() {
            return None;
        }
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatched_tasks_run_in_order() {
        let (actor, handle) = Actor::spawn(Vec::<u32>::new());
        for i in 0..5u32 {
            actor.dispatch(move |state: &mut Vec<u32>| {
                Box::pin(async move {
                    state.push(i);
                })
            });
        }
        let snapshot = actor
            .call(|state: &mut Vec<u32>| Box::pin(async move { state.clone() }))
            .await
            .unwrap();
        assert_eq!(snapshot, vec![0, 1, 2, 3, 4]);
        drop(actor);
        handle.stop().await;
    }
}
