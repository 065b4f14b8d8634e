// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Type-indexed event fan-out.
//!
//! A [`Broadcaster`] delivers every emitted event to every live
//! subscription over bounded channels. The [`EventBus`] keys one
//! broadcaster per event type, created lazily on first use.

use futures::channel::mpsc;
use futures::lock::Mutex;
use futures::prelude::*;
use log::trace;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Multi-consumer broadcast of a single event type.
pub struct Broadcaster<T> {
    inner: Arc<Mutex<Inner<T>>>,
    capacity: usize,
}

struct Inner<T> {
    subscribers: Vec<mpsc::Sender<T>>,
    closed: bool,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Broadcaster {
            inner: self.inner.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> Default for Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a broadcaster whose per-subscriber channels hold up to
    /// `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        Broadcaster {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: Vec::new(),
                closed: false,
            })),
            capacity,
        }
    }

    /// Registers a new independent consumer.
    ///
    /// After [`Broadcaster::shutdown`] the returned subscription is
    /// immediately finished.
    pub async fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock().await;
        if !inner.closed {
            inner.subscribers.push(sender);
        }
        // A closed broadcaster drops the sender right away, so the
        // subscription yields no items.
        Subscription { receiver }
    }

    /// Delivers `event` to every live subscriber.
    ///
    /// Subscribers whose channel has been dropped are pruned; a slow
    /// subscriber exerts back-pressure on the emitter.
    pub async fn emit(&self, event: T) {
        let mut senders = {
            let inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.subscribers.clone()
        };

        let mut gone = false;
        for sender in senders.iter_mut() {
            if sender.send(event.clone()).await.is_err() {
                gone = true;
            }
        }

        if gone {
            let mut inner = self.inner.lock().await;
            let before = inner.subscribers.len();
            inner.subscribers.retain(|s| !s.is_closed());
            trace!("pruned {} dead subscriber(s)", before - inner.subscribers.len());
        }
    }

    /// Closes every live channel; existing consumers drain to the end,
    /// new subscriptions finish immediately.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.subscribers.clear();
    }
}

/// A lazy sequence of events of type `T`.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

/// Per-type broadcasters, constructed lazily the first time a type is
/// subscribed to or emitted.
pub struct EventBus {
    broadcasters: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        EventBus {
            broadcasters: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    async fn broadcaster<T>(&self) -> Broadcaster<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut map = self.broadcasters.lock().await;
        let entry = map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Broadcaster::<T>::new(self.capacity)));
        entry
            .downcast_ref::<Broadcaster<T>>()
            .expect("broadcaster map is keyed by TypeId")
            .clone()
    }

    /// Subscribes to all events of type `T`.
    pub async fn subscribe<T>(&self) -> Subscription<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.broadcaster::<T>().await.subscribe().await
    }

    /// Emits an event to all subscribers of its type.
    pub async fn emit<T>(&self, event: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.broadcaster::<T>().await.emit(event).await
    }

    /// Shuts down the fan-out of events of type `T`.
    pub async fn shutdown<T>(&self)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.broadcaster::<T>().await.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    #[derive(Clone, Debug, PartialEq)]
    struct Connected(u32);

    #[derive(Clone, Debug, PartialEq)]
    struct Disconnected(u32);

    #[test]
    fn fan_out_to_all_subscribers() {
        task::block_on(async {
            let bus = Broadcaster::<Connected>::default();
            let mut first = bus.subscribe().await;
            let mut second = bus.subscribe().await;

            bus.emit(Connected(1)).await;

            assert_eq!(first.next().await, Some(Connected(1)));
            assert_eq!(second.next().await, Some(Connected(1)));
        })
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        task::block_on(async {
            let bus = Broadcaster::<Connected>::default();
            let first = bus.subscribe().await;
            let mut second = bus.subscribe().await;

            drop(first);
            bus.emit(Connected(7)).await;
            bus.emit(Connected(8)).await;

            assert_eq!(second.next().await, Some(Connected(7)));
            assert_eq!(second.next().await, Some(Connected(8)));
        })
    }

    #[test]
    fn shutdown_ends_existing_and_future_subscriptions() {
        task::block_on(async {
            let bus = Broadcaster::<Connected>::default();
            let mut live = bus.subscribe().await;

            bus.emit(Connected(1)).await;
            bus.shutdown().await;

            // Buffered events drain, then the stream finishes.
            assert_eq!(live.next().await, Some(Connected(1)));
            assert_eq!(live.next().await, None);

            let mut fresh = bus.subscribe().await;
            assert_eq!(fresh.next().await, None);

            // Emitting after shutdown is a no-op.
            bus.emit(Connected(2)).await;
        })
    }

    #[test]
    fn bus_keeps_types_separate() {
        task::block_on(async {
            let bus = EventBus::default();
            let mut connected = bus.subscribe::<Connected>().await;
            let mut disconnected = bus.subscribe::<Disconnected>().await;

            bus.emit(Connected(1)).await;
            bus.emit(Disconnected(2)).await;

            assert_eq!(connected.next().await, Some(Connected(1)));
            assert_eq!(disconnected.next().await, Some(Disconnected(2)));
        })
    }
}
