//! Boundary between the decoder and whatever transports the readings.
//!
//! The decoder knows nothing about MQTT. A [`PublishSink`] takes
//! `(topic, body, retain)` triples and [`publish_reading`] turns a
//! [`Reading`] into one message per quantity.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;
use heapless::String;

use crate::{Reading, Status};

pub const TOPIC_CAPACITY: usize = 32;
pub const BODY_CAPACITY: usize = 128;

pub trait PublishSink {
    type Error;

    fn publish(&mut self, topic: &str, body: &str, retain: bool) -> Result<(), Self::Error>;
}

impl<S: PublishSink + ?Sized> PublishSink for &mut S {
    type Error = S::Error;

    fn publish(&mut self, topic: &str, body: &str, retain: bool) -> Result<(), Self::Error> {
        (**self).publish(topic, body, retain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topics {
    pub humidity: &'static str,
    pub temperature: &'static str,
    pub free_heap: &'static str,
}

impl Default for Topics {
    fn default() -> Self {
        Topics {
            humidity: "/humidity",
            temperature: "/temperature",
            free_heap: "/free_heap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError<E> {
    #[error("sink rejected the message")]
    Sink(E),
    #[error("message body does not fit in the body buffer")]
    BodyOverflow,
}

/// Publishes humidity and temperature of `reading` as two messages.
///
/// Timed out readings are skipped and `Ok(false)` is returned. Readings with
/// a checksum error are published like good ones.
///
/// Humidity goes out first. If the temperature publish then fails, the
/// humidity message has already been handed to the sink and is not taken
/// back, so an `Err` does not mean nothing was published.
pub fn publish_reading<S: PublishSink>(
    mut sink: S,
    topics: &Topics,
    reading: &Reading,
) -> Result<bool, TelemetryError<S::Error>> {
    if reading.status == Status::TimeoutError {
        return Ok(false);
    }

    let body = quantity_body("relative_humidity", reading.humidity)?;
    sink.publish(topics.humidity, &body, false).map_err(TelemetryError::Sink)?;

    let body = quantity_body("temperature", reading.temperature)?;
    sink.publish(topics.temperature, &body, false).map_err(TelemetryError::Sink)?;

    Ok(true)
}

/// Publishes the number of free heap bytes as a bare decimal body.
pub fn publish_free_heap<S: PublishSink>(
    mut sink: S,
    topics: &Topics,
    free_bytes: usize,
) -> Result<(), TelemetryError<S::Error>> {
    let mut body: String<BODY_CAPACITY> = String::new();
    write!(body, "{}", free_bytes).map_err(|_| TelemetryError::BodyOverflow)?;
    sink.publish(topics.free_heap, &body, false)
        .map_err(TelemetryError::Sink)
}

fn quantity_body<E>(key: &str, value: f32) -> Result<String<BODY_CAPACITY>, TelemetryError<E>> {
    let mut body = String::new();
    write!(body, "{{\"{}\":\"{:.2}\"}}", key, value).map_err(|_| TelemetryError::BodyOverflow)?;
    Ok(body)
}

/// An owned message, ready to be handed to another task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String<TOPIC_CAPACITY>,
    pub body: String<BODY_CAPACITY>,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelSinkError {
    #[error("topic does not fit in the topic buffer")]
    TopicTooLong,
    #[error("body does not fit in the body buffer")]
    BodyTooLong,
    #[error("channel is full")]
    Full,
}

/// Queues messages on an embassy channel without waiting.
pub struct ChannelSink<'a, M: RawMutex, const N: usize> {
    sender: Sender<'a, M, Message, N>,
}

impl<'a, M: RawMutex, const N: usize> ChannelSink<'a, M, N> {
    pub fn new(sender: Sender<'a, M, Message, N>) -> Self {
        ChannelSink { sender }
    }
}

impl<M: RawMutex, const N: usize> PublishSink for ChannelSink<'_, M, N> {
    type Error = ChannelSinkError;

    fn publish(&mut self, topic: &str, body: &str, retain: bool) -> Result<(), Self::Error> {
        let message = Message {
            topic: String::try_from(topic).map_err(|_| ChannelSinkError::TopicTooLong)?,
            body: String::try_from(body).map_err(|_| ChannelSinkError::BodyTooLong)?,
            retain,
        };
        self.sender.try_send(message).map_err(|_| {
            warn!("telemetry channel full, dropping message for {}", topic);
            ChannelSinkError::Full
        })
    }
}
