// ABOUTME: Result-shape coercion normalizing values, deferreds, push sources and pull streams
// ABOUTME: Bridges push-based producers into the canonical pull sequence with wake-on-push buffering
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Stream Coercion
//!
//! Raw handlers may answer in any of five shapes (see [`ResultShape`]).
//! Everything is normalized in two layers:
//!
//! 1. [`to_push_source`] turns values, deferreds and subscribables into a
//!    [`PushSource`]; push sources pass through untouched.
//! 2. [`to_pull_sequence`] turns a push source into a [`CanonicalSequence`]
//!    through an unbounded FIFO; pull sequences pass through untouched.
//!
//! [`coerce`] chains both and is what the resolver uses.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::types::{BridgeError, CanonicalSequence};

/// One event travelling from a push producer to the pull side
enum Signal<T> {
    Next(T),
    Error(BridgeError),
    Complete,
}

/// Sink handed to push producers
///
/// `error` and `complete` consume the emitter, so a producer can signal at
/// most one terminal event. Dropping an emitter without either ends the
/// sequence as a normal completion.
pub struct Emitter<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
}

impl<T> Emitter<T> {
    /// Push a value. Returns `false` once the consumer has gone away.
    pub fn next(&self, value: T) -> bool {
        self.tx.send(Signal::Next(value)).is_ok()
    }

    /// Terminate the sequence with an error
    pub fn error(self, error: BridgeError) {
        let _ = self.tx.send(Signal::Error(error));
    }

    /// Terminate the sequence normally
    pub fn complete(self) {
        let _ = self.tx.send(Signal::Complete);
    }

    /// Whether the consumer has dropped the sequence
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

type Producer<T> = Box<dyn FnOnce(Emitter<T>) -> Option<BoxFuture<'static, ()>> + Send>;

/// A push-based stream: a producer that delivers values to an [`Emitter`]
///
/// Nothing runs until the source is subscribed, which happens on the first
/// pull of the sequence it is bridged into.
pub struct PushSource<T> {
    producer: Producer<T>,
}

impl<T: Send + 'static> PushSource<T> {
    /// Source whose producer runs synchronously at subscription time
    ///
    /// The producer may move the emitter into a spawned task or thread to
    /// keep emitting after it returns.
    pub fn new<F>(subscribe: F) -> Self
    where
        F: FnOnce(Emitter<T>) + Send + 'static,
    {
        Self {
            producer: Box::new(move |emitter| {
                subscribe(emitter);
                None
            }),
        }
    }

    /// Source whose producer is an async task driven by the consuming sequence
    pub fn from_task<F, Fut>(task: F) -> Self
    where
        F: FnOnce(Emitter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            producer: Box::new(move |emitter| Some(Box::pin(task(emitter)))),
        }
    }

    /// Source emitting every item of `values` and then completing
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
    {
        Self::new(move |emitter| {
            for value in values {
                if !emitter.next(value) {
                    return;
                }
            }
            emitter.complete();
        })
    }

    fn subscribe(self, emitter: Emitter<T>) -> Option<BoxFuture<'static, ()>> {
        (self.producer)(emitter)
    }
}

impl<T> fmt::Debug for PushSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSource").finish_non_exhaustive()
    }
}

/// A foreign push-based object exposing a subscribe operation
///
/// The return value of `subscribe` carries no contract; values reach the
/// bridge only through the emitter.
pub trait Subscribable<T>: Send {
    /// Start delivering values to `emitter`
    fn subscribe(self: Box<Self>, emitter: Emitter<T>);
}

/// Every result shape a raw handler may produce
pub enum ResultShape<T> {
    /// A plain value, emitted once
    Value(T),
    /// A future single value
    Deferred(BoxFuture<'static, Result<T, BridgeError>>),
    /// A foreign subscribable
    Subscribable(Box<dyn Subscribable<T>>),
    /// A native push source
    Push(PushSource<T>),
    /// An already pull-based sequence
    Pull(CanonicalSequence<T>),
}

impl<T: Send + 'static> ResultShape<T> {
    /// Wrap a plain value
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Wrap a future resolving to a single value
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, BridgeError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    /// Wrap a foreign subscribable
    pub fn subscribable(source: impl Subscribable<T> + 'static) -> Self {
        Self::Subscribable(Box::new(source))
    }

    /// Wrap a push source
    pub fn push(source: PushSource<T>) -> Self {
        Self::Push(source)
    }

    /// Wrap a pull-based stream
    pub fn pull<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, BridgeError>> + Send + 'static,
    {
        Self::Pull(Box::pin(stream))
    }

    /// Short name of the shape, used in diagnostics
    pub const fn shape_name(&self) -> &'static str {
        match self {
            Self::Value(_) => "plain value",
            Self::Deferred(_) => "deferred",
            Self::Subscribable(_) => "subscribable",
            Self::Push(_) => "push source",
            Self::Pull(_) => "pull sequence",
        }
    }
}

impl<T> fmt::Debug for ResultShape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Value(_) => "Value",
            Self::Deferred(_) => "Deferred",
            Self::Subscribable(_) => "Subscribable",
            Self::Push(_) => "Push",
            Self::Pull(_) => "Pull",
        };
        f.debug_tuple(name).finish_non_exhaustive()
    }
}

/// Normalize a push-shaped result into a [`PushSource`]
///
/// Push sources are returned as-is. A deferred emits its resolved value and
/// completes, or emits its error. A plain value emits once and completes.
pub fn to_push_source<T: Send + 'static>(
    shape: ResultShape<T>,
) -> Result<PushSource<T>, BridgeError> {
    match shape {
        ResultShape::Push(source) => Ok(source),
        ResultShape::Subscribable(source) => {
            Ok(PushSource::new(move |emitter| source.subscribe(emitter)))
        }
        ResultShape::Deferred(future) => Ok(PushSource::from_task(move |emitter| async move {
            match future.await {
                Ok(value) => {
                    emitter.next(value);
                    emitter.complete();
                }
                Err(e) => emitter.error(e),
            }
        })),
        ResultShape::Value(value) => Ok(PushSource::new(move |emitter| {
            emitter.next(value);
            emitter.complete();
        })),
        other @ ResultShape::Pull(_) => Err(BridgeError::unsupported_result_shape(
            other.shape_name(),
            "a push source, subscribable, deferred or plain value",
        )),
    }
}

/// Normalize a push source or pull stream into a [`CanonicalSequence`]
pub fn to_pull_sequence<T: Send + 'static>(
    shape: ResultShape<T>,
) -> Result<CanonicalSequence<T>, BridgeError> {
    match shape {
        ResultShape::Pull(stream) => Ok(stream),
        ResultShape::Push(source) => Ok(Box::pin(PushBridge::new(source))),
        other => Err(BridgeError::unsupported_result_shape(
            other.shape_name(),
            "a push source or pull sequence",
        )),
    }
}

/// Normalize any result shape into a [`CanonicalSequence`]
pub fn coerce<T: Send + 'static>(shape: ResultShape<T>) -> Result<CanonicalSequence<T>, BridgeError> {
    match shape {
        ResultShape::Pull(stream) => Ok(stream),
        other => to_pull_sequence(ResultShape::Push(to_push_source(other)?)),
    }
}

/// Drain a sequence and return its final value, if any
///
/// The first error ends the drain and is returned.
pub async fn last_value<T>(mut sequence: CanonicalSequence<T>) -> Result<Option<T>, BridgeError> {
    let mut last = None;
    while let Some(item) = sequence.next().await {
        last = Some(item?);
    }
    Ok(last)
}

enum BridgeState<T> {
    Idle(PushSource<T>),
    Subscribed {
        rx: mpsc::UnboundedReceiver<Signal<T>>,
        driver: Option<BoxFuture<'static, ()>>,
    },
    Done,
}

/// Pull-side adapter over a [`PushSource`]
///
/// Values buffer in an unbounded channel in emission order. When the buffer
/// is empty the consumer parks on the channel and is woken by the next push
/// or by termination. Async producers are polled from here, so dropping the
/// sequence drops the producer with it.
///
/// All fields are `Unpin`, so `PushBridge` is `Unpin` and the `Stream`
/// impl can reach its state through `Pin<&mut Self>`.
pub struct PushBridge<T> {
    state: BridgeState<T>,
}

impl<T: Send + 'static> PushBridge<T> {
    /// Bridge a push source; it is subscribed on the first poll
    pub fn new(source: PushSource<T>) -> Self {
        Self {
            state: BridgeState::Idle(source),
        }
    }
}

impl<T: Send + 'static> Stream for PushBridge<T> {
    type Item = Result<T, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if matches!(this.state, BridgeState::Idle(_)) {
            if let BridgeState::Idle(source) = mem::replace(&mut this.state, BridgeState::Done) {
                let (tx, rx) = mpsc::unbounded_channel();
                let driver = source.subscribe(Emitter { tx });
                this.state = BridgeState::Subscribed { rx, driver };
            }
        }

        let BridgeState::Subscribed { rx, driver } = &mut this.state else {
            return Poll::Ready(None);
        };

        if let Some(task) = driver {
            if task.as_mut().poll(cx).is_ready() {
                *driver = None;
            }
        }

        match rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Signal::Error(e))) => {
                this.state = BridgeState::Done;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Signal::Complete) | None) => {
                this.state = BridgeState::Done;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
